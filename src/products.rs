use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use mongodb::ClientSession;
use serde::Deserialize;

use crate::auth::{auth_user, require_role};
use crate::error::ApiError;
use crate::models::{Freshness, Product, ProductCategory, Role, Unit};
use crate::state::AppState;
use crate::store::{abort_txn, begin_txn, commit_txn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProductCreate {
    name: String,
    description: String,
    price: f64,
    images: Vec<String>,
    category: ProductCategory,
    #[serde(default)]
    freshness: Option<Freshness>,
    unit_of_measurement: Unit,
    stock: i64,
    #[serde(default)]
    available_for_trade: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProductUpdate {
    name: Option<String>,
    description: Option<String>,
    price: Option<f64>,
    images: Option<Vec<String>>,
    category: Option<ProductCategory>,
    freshness: Option<Freshness>,
    stock: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    category: Option<String>,
    seller: Option<String>,
    limit: Option<i64>,
}

pub(crate) fn product_json(p: &Product) -> serde_json::Value {
    serde_json::json!({
        "id": p.id.map(|i| i.to_hex()),
        "name": p.name,
        "description": p.description,
        "price": p.price,
        "images": p.images,
        "category": p.category,
        "freshness": p.freshness,
        "unitOfMeasurement": p.unit_of_measurement,
        "stock": p.stock,
        "availableForTrade": p.available_for_trade,
        "isActive": p.is_active,
        "sellerId": p.seller_id.to_hex(),
        "origin": p.origin.as_ref().map(|o| serde_json::json!({
            "tradeId": o.trade_id.to_hex(),
            "originalProductId": o.original_product_id.to_hex(),
            "originalSellerId": o.original_seller_id.to_hex(),
            "acquiredAt": o.acquired_at.to_chrono().to_rfc3339(),
        })),
        "tradeHistory": p.trade_history.iter().map(|h| serde_json::json!({
            "tradeId": h.trade_id.to_hex(),
            "tradedFrom": h.traded_from.to_hex(),
            "tradedTo": h.traded_to.to_hex(),
            "quantity": h.quantity,
            "date": h.date.to_chrono().to_rfc3339(),
        })).collect::<Vec<_>>(),
    })
}

pub(crate) async fn find_product(
    state: &AppState,
    id: ObjectId,
) -> Result<Product, ApiError> {
    state
        .products()
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| ApiError::not_found("Product not found"))
}

pub(crate) async fn create_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProductCreate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    if req.price < 0.0 {
        return Err(ApiError::bad_request("Price cannot be negative"));
    }
    if req.stock < 0 {
        return Err(ApiError::bad_request("Stock cannot be negative"));
    }
    if req.images.is_empty() {
        return Err(ApiError::bad_request("At least one image required"));
    }

    let product = Product {
        id: None,
        name: req.name,
        description: req.description,
        price: req.price,
        images: req.images,
        category: req.category,
        freshness: req.freshness.unwrap_or(Freshness::Fresh),
        unit_of_measurement: req.unit_of_measurement,
        stock: req.stock,
        available_for_trade: req.available_for_trade,
        is_active: req.stock > 0,
        seller_id: u.user_id,
        trade_history: Vec::new(),
        origin: None,
        created_at: BsonDateTime::now(),
    };
    let inserted = state.products().insert_one(&product).await?;
    let id = inserted.inserted_id.as_object_id();

    tracing::info!(product_id = ?id, seller_id = %u.user_id, "product created");
    Ok(Json(serde_json::json!({ "id": id.map(|i| i.to_hex()) })))
}

pub(crate) async fn list_products(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut filter = doc! { "isActive": true };
    if let Some(cat) = &q.category {
        filter.insert("category", cat);
    }
    if let Some(seller) = &q.seller {
        filter.insert("sellerId", ObjectId::parse_str(seller)?);
    }
    let limit = q.limit.unwrap_or(100).clamp(1, 500);
    let products: Vec<Product> = state
        .products()
        .find(filter)
        .sort(doc! { "createdAt": -1 })
        .limit(limit)
        .await?
        .try_collect()
        .await?;

    Ok(Json(serde_json::json!({
        "products": products.iter().map(product_json).collect::<Vec<_>>(),
        "total": products.len(),
    })))
}

pub(crate) async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let product = find_product(&state, ObjectId::parse_str(&id)?).await?;
    Ok(Json(product_json(&product)))
}

pub(crate) async fn my_products(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let products: Vec<Product> = state
        .products()
        .find(doc! { "sellerId": u.user_id })
        .sort(doc! { "createdAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "products": products.iter().map(product_json).collect::<Vec<_>>(),
    })))
}

pub(crate) async fn update_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ProductUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let product_id = ObjectId::parse_str(&id)?;
    let product = find_product(&state, product_id).await?;
    if product.seller_id != u.user_id && !u.is_admin() {
        return Err(ApiError::forbidden("Not the owner of this product"));
    }

    let mut set = Document::new();
    if let Some(name) = req.name {
        set.insert("name", name);
    }
    if let Some(description) = req.description {
        set.insert("description", description);
    }
    if let Some(price) = req.price {
        if price < 0.0 {
            return Err(ApiError::bad_request("Price cannot be negative"));
        }
        set.insert("price", price);
    }
    if let Some(images) = req.images {
        set.insert("images", images);
    }
    if let Some(category) = req.category {
        set.insert("category", mongodb::bson::to_bson(&category).map_err(anyhow::Error::from)?);
    }
    if let Some(freshness) = req.freshness {
        set.insert("freshness", mongodb::bson::to_bson(&freshness).map_err(anyhow::Error::from)?);
    }
    if let Some(stock) = req.stock {
        if stock < 0 {
            return Err(ApiError::bad_request("Stock cannot be negative"));
        }
        set.insert("stock", stock);
        set.insert("isActive", stock > 0);
    }
    if set.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    state
        .products()
        .update_one(doc! { "_id": product_id }, doc! { "$set": set })
        .await?;
    let updated = find_product(&state, product_id).await?;
    Ok(Json(product_json(&updated)))
}

/// Live trades referencing a product. Pending trades are caught on any
/// removal; accepted ones only when the product itself disappears.
fn cascade_filter(product_id: ObjectId, include_accepted: bool) -> Document {
    let statuses: Vec<&str> = if include_accepted {
        vec!["pending", "accepted"]
    } else {
        vec!["pending"]
    };
    doc! {
        "$or": [
            { "productFrom": product_id, "status": { "$in": &statuses } },
            { "productTo": product_id, "status": { "$in": &statuses } },
        ]
    }
}

/// Cancel every live trade referencing a product. The audit entry has
/// no actor: the cancellation is system-initiated, and the note carries
/// the cause. Must run inside the caller's transaction.
async fn cancel_trades_for_product(
    state: &AppState,
    session: &mut ClientSession,
    product_id: ObjectId,
    include_accepted: bool,
    note: &str,
) -> Result<u64, ApiError> {
    let now = BsonDateTime::now();
    let result = state
        .trades()
        .update_many(
            cascade_filter(product_id, include_accepted),
            doc! {
                "$set": { "status": "cancelled" },
                "$push": { "audit": {
                    "event": "cancelled",
                    "timestamp": now,
                    "note": note,
                } },
            },
        )
        .session(&mut *session)
        .await?;
    Ok(result.modified_count)
}

pub(crate) async fn delete_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let product_id = ObjectId::parse_str(&id)?;
    let product = find_product(&state, product_id).await?;
    if product.seller_id != u.user_id && !u.is_admin() {
        return Err(ApiError::forbidden("Not the owner of this product"));
    }

    let mut session = begin_txn(&state).await?;
    let result = async {
        let cancelled = cancel_trades_for_product(
            &state,
            &mut session,
            product_id,
            true,
            "Trade cancelled because the product was deleted",
        )
        .await?;
        state
            .products()
            .delete_one(doc! { "_id": product_id })
            .session(&mut session)
            .await?;
        Ok(cancelled)
    }
    .await;

    let cancelled = match result {
        Ok(c) => {
            commit_txn(session).await?;
            c
        }
        Err(e) => {
            abort_txn(session).await;
            return Err(e);
        }
    };

    tracing::info!(product_id = %product_id, cancelled_trades = cancelled, "product deleted");
    Ok(Json(serde_json::json!({
        "deleted": true,
        "cancelledTrades": cancelled,
    })))
}

pub(crate) async fn add_trade_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let product_id = ObjectId::parse_str(&id)?;
    let result = state
        .products()
        .update_one(
            doc! { "_id": product_id, "sellerId": u.user_id },
            doc! { "$set": { "availableForTrade": true } },
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("Product not found or not owned by you"));
    }
    Ok(Json(serde_json::json!({ "availableForTrade": true })))
}

pub(crate) async fn remove_trade_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let product_id = ObjectId::parse_str(&id)?;
    let mut session = begin_txn(&state).await?;
    let result = async {
        let updated = state
            .products()
            .update_one(
                doc! { "_id": product_id, "sellerId": u.user_id },
                doc! { "$set": { "availableForTrade": false } },
            )
            .session(&mut session)
            .await?;
        if updated.matched_count == 0 {
            return Err(ApiError::not_found("Product not found or not owned by you"));
        }
        cancel_trades_for_product(
            &state,
            &mut session,
            product_id,
            false,
            "Trade cancelled because the product was removed from trading by the seller",
        )
        .await
    }
    .await;

    match result {
        Ok(cancelled) => {
            commit_txn(session).await?;
            Ok(Json(serde_json::json!({
                "availableForTrade": false,
                "cancelledTrades": cancelled,
            })))
        }
        Err(e) => {
            abort_txn(session).await;
            Err(e)
        }
    }
}

/// Marketplace of trade-eligible products with remaining stock.
pub(crate) async fn trade_listings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _ = auth_user(&state, &headers).await?;
    let products: Vec<Product> = state
        .products()
        .find(doc! { "availableForTrade": true, "stock": { "$gt": 0 }, "isActive": true })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "products": products.iter().map(product_json).collect::<Vec<_>>(),
        "total": products.len(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_arm(filter: &Document) -> Vec<String> {
        filter.get_array("$or").unwrap()[0]
            .as_document()
            .unwrap()
            .get_document("status")
            .unwrap()
            .get_array("$in")
            .unwrap()
            .iter()
            .map(|s| s.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn cascade_reaches_accepted_trades_only_on_delete() {
        let id = ObjectId::new();
        assert_eq!(status_arm(&cascade_filter(id, false)), ["pending"]);
        assert_eq!(status_arm(&cascade_filter(id, true)), ["pending", "accepted"]);
    }
}
