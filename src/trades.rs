//! Two-party barter trades. A trade is proposed against two trade-listed
//! products, accepted or rejected by the receiving seller, and completed
//! in a single transaction that moves stock both ways and mints a derived
//! product for each side.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, to_bson, DateTime as BsonDateTime};
use serde::Deserialize;

use crate::auth::{require_role, AuthUser};
use crate::error::ApiError;
use crate::models::{
    Product, Role, Trade, TradeAuditEntry, TradeHistoryEntry, TradeMetrics, TradeStatus,
};
use crate::notify::notify_trade;
use crate::products::find_product;
use crate::state::AppState;
use crate::store::{abort_txn, begin_txn, commit_txn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TradeProposal {
    product_from: String,
    product_to: String,
    quantity_from: i64,
    quantity_to: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuantityUpdate {
    quantity_from: Option<i64>,
    quantity_to: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TradeListQuery {
    status: Option<String>,
}

fn trade_json(t: &Trade) -> serde_json::Value {
    serde_json::json!({
        "id": t.id.map(|i| i.to_hex()),
        "sellerFrom": t.seller_from.to_hex(),
        "sellerTo": t.seller_to.to_hex(),
        "productFrom": t.product_from.to_hex(),
        "productTo": t.product_to.to_hex(),
        "quantityFrom": t.quantity_from,
        "quantityTo": t.quantity_to,
        "status": t.status,
        "metrics": t.metrics,
        "audit": t.audit,
        "acceptedAt": t.accepted_at.map(|d| d.to_chrono().to_rfc3339()),
        "completedAt": t.completed_at.map(|d| d.to_chrono().to_rfc3339()),
        "createdAt": t.created_at.to_chrono().to_rfc3339(),
    })
}

async fn find_trade(state: &AppState, id: ObjectId) -> Result<Trade, ApiError> {
    state
        .trades()
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| ApiError::not_found("Trade not found"))
}

fn participant_check(trade: &Trade, u: &AuthUser) -> Result<(), ApiError> {
    if trade.seller_from != u.user_id && trade.seller_to != u.user_id && !u.is_admin() {
        return Err(ApiError::forbidden("Not a participant in this trade"));
    }
    Ok(())
}

fn audit(event: &str, actor: ObjectId) -> TradeAuditEntry {
    TradeAuditEntry {
        event: event.to_string(),
        actor_id: Some(actor),
        timestamp: BsonDateTime::now(),
        quantity_from: None,
        quantity_to: None,
        stock_from_before: None,
        stock_from_after: None,
        stock_to_before: None,
        stock_to_after: None,
        note: None,
    }
}

pub(crate) async fn propose_trade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TradeProposal>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    if req.quantity_from <= 0 || req.quantity_to <= 0 {
        return Err(ApiError::bad_request("Trade quantities must be positive"));
    }

    let product_from = find_product(&state, ObjectId::parse_str(&req.product_from)?).await?;
    let product_to = find_product(&state, ObjectId::parse_str(&req.product_to)?).await?;

    if product_from.seller_id != u.user_id {
        return Err(ApiError::forbidden("You can only offer your own product"));
    }
    if product_to.seller_id == u.user_id {
        return Err(ApiError::bad_request("Cannot trade with yourself"));
    }
    if !product_from.available_for_trade || !product_to.available_for_trade {
        return Err(ApiError::bad_request("Both products must be listed for trading"));
    }
    if product_from.stock < req.quantity_from {
        return Err(ApiError::bad_request("Not enough stock of the offered product"));
    }
    if product_to.stock < req.quantity_to {
        return Err(ApiError::bad_request("Not enough stock of the requested product"));
    }

    let from_id = product_from.id.ok_or_else(|| ApiError::not_found("Product not found"))?;
    let to_id = product_to.id.ok_or_else(|| ApiError::not_found("Product not found"))?;

    let metrics = TradeMetrics::compute(
        product_from.price,
        req.quantity_from,
        product_to.price,
        req.quantity_to,
    );
    let trade = Trade {
        id: None,
        seller_from: u.user_id,
        seller_to: product_to.seller_id,
        product_from: from_id,
        product_to: to_id,
        quantity_from: req.quantity_from,
        quantity_to: req.quantity_to,
        status: TradeStatus::Pending,
        metrics,
        audit: vec![audit("proposed", u.user_id)],
        accepted_at: None,
        completed_at: None,
        created_at: BsonDateTime::now(),
    };

    let inserted = state.trades().insert_one(&trade).await?;
    let trade_id = inserted
        .inserted_id
        .as_object_id()
        .ok_or_else(|| ApiError::new(http::StatusCode::INTERNAL_SERVER_ERROR, "bad inserted id"))?;

    notify_trade(&state, trade.seller_to, trade_id, "pending", "proposed to you").await;
    tracing::info!(trade_id = %trade_id, seller_from = %u.user_id, "trade proposed");
    Ok(Json(serde_json::json!({
        "id": trade_id.to_hex(),
        "status": TradeStatus::Pending,
        "metrics": trade.metrics,
    })))
}

pub(crate) async fn list_trades(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<TradeListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let mut filter = doc! {
        "$or": [{ "sellerFrom": u.user_id }, { "sellerTo": u.user_id }],
    };
    if let Some(status) = &q.status {
        filter.insert("status", status);
    }
    let trades: Vec<Trade> = state
        .trades()
        .find(filter)
        .sort(doc! { "createdAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "trades": trades.iter().map(trade_json).collect::<Vec<_>>(),
    })))
}

pub(crate) async fn completed_trades(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let trades: Vec<Trade> = state
        .trades()
        .find(doc! {
            "$or": [{ "sellerFrom": u.user_id }, { "sellerTo": u.user_id }],
            "status": "completed",
        })
        .sort(doc! { "completedAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "trades": trades.iter().map(trade_json).collect::<Vec<_>>(),
    })))
}

pub(crate) async fn get_trade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let trade = find_trade(&state, ObjectId::parse_str(&id)?).await?;
    participant_check(&trade, &u)?;
    Ok(Json(trade_json(&trade)))
}

/// The proposer may adjust quantities while the trade is still pending;
/// fairness metrics are recomputed from current prices.
pub(crate) async fn update_trade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<QuantityUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let trade_id = ObjectId::parse_str(&id)?;
    let trade = find_trade(&state, trade_id).await?;
    if trade.seller_from != u.user_id {
        return Err(ApiError::forbidden("Only the proposer can update a trade"));
    }
    if trade.status != TradeStatus::Pending {
        return Err(ApiError::bad_request("Only pending trades can be updated"));
    }

    let quantity_from = req.quantity_from.unwrap_or(trade.quantity_from);
    let quantity_to = req.quantity_to.unwrap_or(trade.quantity_to);
    if quantity_from <= 0 || quantity_to <= 0 {
        return Err(ApiError::bad_request("Trade quantities must be positive"));
    }

    let product_from = find_product(&state, trade.product_from).await?;
    let product_to = find_product(&state, trade.product_to).await?;
    if product_from.stock < quantity_from || product_to.stock < quantity_to {
        return Err(ApiError::bad_request("Requested quantities exceed available stock"));
    }

    let metrics = TradeMetrics::compute(
        product_from.price,
        quantity_from,
        product_to.price,
        quantity_to,
    );
    let mut entry = audit("updated", u.user_id);
    entry.quantity_from = Some(quantity_from);
    entry.quantity_to = Some(quantity_to);

    state
        .trades()
        .update_one(
            doc! { "_id": trade_id, "status": "pending" },
            doc! {
                "$set": {
                    "quantityFrom": quantity_from,
                    "quantityTo": quantity_to,
                    "metrics": to_bson(&metrics).map_err(anyhow::Error::from)?,
                },
                "$push": { "audit": to_bson(&entry).map_err(anyhow::Error::from)? },
            },
        )
        .await?;

    notify_trade(&state, trade.seller_to, trade_id, "pending", "updated").await;
    Ok(Json(serde_json::json!({
        "id": trade_id.to_hex(),
        "quantityFrom": quantity_from,
        "quantityTo": quantity_to,
        "metrics": metrics,
    })))
}

async fn transition_trade(
    state: &AppState,
    u: &AuthUser,
    trade: &Trade,
    next: TradeStatus,
    extra: mongodb::bson::Document,
) -> Result<(), ApiError> {
    if !trade.status.can_transition_to(next) {
        return Err(ApiError::bad_request(format!(
            "Cannot move a {} trade to {}",
            trade.status, next
        )));
    }
    let trade_id = trade.id.ok_or_else(|| ApiError::not_found("Trade not found"))?;
    let mut set = doc! { "status": next.to_string() };
    set.extend(extra);
    let result = state
        .trades()
        .update_one(
            doc! { "_id": trade_id, "status": trade.status.to_string() },
            doc! {
                "$set": set,
                "$push": { "audit": to_bson(&audit(&next.to_string(), u.user_id)).map_err(anyhow::Error::from)? },
            },
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::bad_request("Trade status changed, please retry"));
    }
    Ok(())
}

pub(crate) async fn accept_trade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let trade = find_trade(&state, ObjectId::parse_str(&id)?).await?;
    if trade.seller_to != u.user_id {
        return Err(ApiError::forbidden("Only the receiving seller can accept"));
    }

    // Re-check stock at acceptance time; listings move between proposal
    // and acceptance.
    let product_from = find_product(&state, trade.product_from).await?;
    let product_to = find_product(&state, trade.product_to).await?;
    if product_from.stock < trade.quantity_from || product_to.stock < trade.quantity_to {
        return Err(ApiError::bad_request("Stock no longer covers this trade"));
    }

    transition_trade(
        &state,
        &u,
        &trade,
        TradeStatus::Accepted,
        doc! { "acceptedAt": BsonDateTime::now() },
    )
    .await?;

    let trade_id = trade.id.ok_or_else(|| ApiError::not_found("Trade not found"))?;
    notify_trade(&state, trade.seller_from, trade_id, "accepted", "accepted").await;
    tracing::info!(trade_id = %trade_id, "trade accepted");
    Ok(Json(serde_json::json!({ "id": trade_id.to_hex(), "status": TradeStatus::Accepted })))
}

pub(crate) async fn reject_trade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let trade = find_trade(&state, ObjectId::parse_str(&id)?).await?;
    if trade.seller_to != u.user_id {
        return Err(ApiError::forbidden("Only the receiving seller can reject"));
    }
    transition_trade(&state, &u, &trade, TradeStatus::Rejected, doc! {}).await?;

    let trade_id = trade.id.ok_or_else(|| ApiError::not_found("Trade not found"))?;
    notify_trade(&state, trade.seller_from, trade_id, "rejected", "rejected").await;
    Ok(Json(serde_json::json!({ "id": trade_id.to_hex(), "status": TradeStatus::Rejected })))
}

pub(crate) async fn cancel_trade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let trade = find_trade(&state, ObjectId::parse_str(&id)?).await?;
    participant_check(&trade, &u)?;
    transition_trade(&state, &u, &trade, TradeStatus::Cancelled, doc! {}).await?;

    let trade_id = trade.id.ok_or_else(|| ApiError::not_found("Trade not found"))?;
    let other = if trade.seller_from == u.user_id {
        trade.seller_to
    } else {
        trade.seller_from
    };
    notify_trade(&state, other, trade_id, "cancelled", "cancelled").await;
    Ok(Json(serde_json::json!({ "id": trade_id.to_hex(), "status": TradeStatus::Cancelled })))
}

/// A product minted for the receiving side when a trade completes. It
/// carries the traded quantity as its whole stock and a back-link to
/// the trade it came from.
fn derived_product(
    source: &Product,
    new_owner: ObjectId,
    quantity: i64,
    trade_id: ObjectId,
    now: BsonDateTime,
) -> Result<Product, ApiError> {
    let source_id = source.id.ok_or_else(|| ApiError::not_found("Product not found"))?;
    Ok(Product {
        id: None,
        name: source.name.clone(),
        description: source.description.clone(),
        price: source.price,
        images: source.images.clone(),
        category: source.category,
        freshness: source.freshness,
        unit_of_measurement: source.unit_of_measurement,
        stock: quantity,
        available_for_trade: false,
        is_active: quantity > 0,
        seller_id: new_owner,
        trade_history: Vec::new(),
        origin: Some(crate::models::ProductOrigin {
            trade_id,
            original_product_id: source_id,
            original_seller_id: source.seller_id,
            acquired_at: now,
        }),
        created_at: now,
    })
}

/// Complete an accepted trade: deduct both quantities, record the swap
/// on both source products, and mint the two derived products, all in
/// one transaction.
pub(crate) async fn complete_trade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let trade = find_trade(&state, ObjectId::parse_str(&id)?).await?;
    participant_check(&trade, &u)?;
    if trade.status != TradeStatus::Accepted {
        return Err(ApiError::bad_request("Only accepted trades can be completed"));
    }
    let trade_id = trade.id.ok_or_else(|| ApiError::not_found("Trade not found"))?;
    let now = BsonDateTime::now();

    let mut session = begin_txn(&state).await?;
    let result = async {
        let product_from = state
            .products()
            .find_one(doc! { "_id": trade.product_from })
            .session(&mut session)
            .await?
            .ok_or_else(|| ApiError::bad_request("Offered product no longer exists"))?;
        let product_to = state
            .products()
            .find_one(doc! { "_id": trade.product_to })
            .session(&mut session)
            .await?
            .ok_or_else(|| ApiError::bad_request("Requested product no longer exists"))?;

        let history_from = TradeHistoryEntry {
            trade_id,
            traded_from: trade.seller_from,
            traded_to: trade.seller_to,
            quantity: trade.quantity_from,
            date: now,
        };
        let history_to = TradeHistoryEntry {
            trade_id,
            traded_from: trade.seller_to,
            traded_to: trade.seller_from,
            quantity: trade.quantity_to,
            date: now,
        };

        // Guarded decrements keep stock non-negative even if the trade
        // raced an order on the same product.
        let moved = state
            .products()
            .update_one(
                doc! { "_id": trade.product_from, "stock": { "$gte": trade.quantity_from } },
                vec![
                    doc! { "$set": {
                        "stock": { "$add": ["$stock", -trade.quantity_from] },
                        "isActive": { "$gt": [{ "$add": ["$stock", -trade.quantity_from] }, 0] },
                        "tradeHistory": { "$concatArrays": ["$tradeHistory", [to_bson(&history_from).map_err(anyhow::Error::from)?]] },
                    } },
                ],
            )
            .session(&mut session)
            .await?;
        if moved.matched_count == 0 {
            return Err(ApiError::bad_request("Not enough stock of the offered product"));
        }
        let moved = state
            .products()
            .update_one(
                doc! { "_id": trade.product_to, "stock": { "$gte": trade.quantity_to } },
                vec![
                    doc! { "$set": {
                        "stock": { "$add": ["$stock", -trade.quantity_to] },
                        "isActive": { "$gt": [{ "$add": ["$stock", -trade.quantity_to] }, 0] },
                        "tradeHistory": { "$concatArrays": ["$tradeHistory", [to_bson(&history_to).map_err(anyhow::Error::from)?]] },
                    } },
                ],
            )
            .session(&mut session)
            .await?;
        if moved.matched_count == 0 {
            return Err(ApiError::bad_request("Not enough stock of the requested product"));
        }

        // Each side receives the other's goods as a fresh product record.
        let received_by_to = derived_product(&product_from, trade.seller_to, trade.quantity_from, trade_id, now)?;
        let received_by_from = derived_product(&product_to, trade.seller_from, trade.quantity_to, trade_id, now)?;
        state
            .products()
            .insert_one(&received_by_to)
            .session(&mut session)
            .await?;
        state
            .products()
            .insert_one(&received_by_from)
            .session(&mut session)
            .await?;

        let mut entry = audit("completed", u.user_id);
        entry.quantity_from = Some(trade.quantity_from);
        entry.quantity_to = Some(trade.quantity_to);
        entry.stock_from_before = Some(product_from.stock);
        entry.stock_from_after = Some(product_from.stock - trade.quantity_from);
        entry.stock_to_before = Some(product_to.stock);
        entry.stock_to_after = Some(product_to.stock - trade.quantity_to);

        let updated = state
            .trades()
            .update_one(
                doc! { "_id": trade_id, "status": "accepted" },
                doc! {
                    "$set": { "status": "completed", "completedAt": now },
                    "$push": { "audit": to_bson(&entry).map_err(anyhow::Error::from)? },
                },
            )
            .session(&mut session)
            .await?;
        if updated.matched_count == 0 {
            return Err(ApiError::bad_request("Trade status changed, please retry"));
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => commit_txn(session).await?,
        Err(e) => {
            abort_txn(session).await;
            return Err(e);
        }
    }

    notify_trade(&state, trade.seller_from, trade_id, "completed", "completed").await;
    notify_trade(&state, trade.seller_to, trade_id, "completed", "completed").await;
    tracing::info!(trade_id = %trade_id, "trade completed");
    Ok(Json(serde_json::json!({
        "id": trade_id.to_hex(),
        "status": TradeStatus::Completed,
    })))
}
