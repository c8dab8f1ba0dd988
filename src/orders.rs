//! Order handlers. Stock is already reserved while items sit in the
//! cart, so placing an order only snapshots the lines; rejection and
//! cancellation are the points where stock flows back.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, to_bson, DateTime as BsonDateTime, Document};
use serde::Deserialize;

use crate::auth::{auth_user, require_role};
use crate::error::ApiError;
use crate::models::{
    check_cancellation_window, CancellationDetails, Order, OrderItem, OrderStatus, Role,
    TrackingEntry,
};
use crate::notify::notify_order_status;
use crate::state::AppState;
use crate::store::{abort_txn, begin_txn, commit_txn, restore_stock};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlaceOrderRequest {
    address: Document,
    payment_method: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewRequest {
    action: String,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CancelRequest {
    #[serde(default)]
    reason: Option<String>,
}

pub(crate) fn order_json(o: &Order) -> serde_json::Value {
    serde_json::json!({
        "id": o.id.map(|i| i.to_hex()),
        "userId": o.user_id.to_hex(),
        "items": o.items.iter().map(|i| serde_json::json!({
            "productId": i.product_id.to_hex(),
            "sellerId": i.seller_id.to_hex(),
            "quantity": i.quantity,
            "name": i.name,
            "price": i.price,
            "image": i.image,
        })).collect::<Vec<_>>(),
        "amount": o.amount,
        "address": o.address,
        "paymentMethod": o.payment_method,
        "payment": o.payment,
        "status": o.status,
        "cancellation": o.cancellation.as_ref().map(|c| serde_json::json!({
            "cancelledAt": c.cancelled_at.to_chrono().to_rfc3339(),
            "cancelledBy": c.cancelled_by.to_hex(),
            "hoursSinceOrder": c.hours_since_order,
            "reason": c.reason,
        })),
        "placedAt": o.placed_at.to_chrono().to_rfc3339(),
    })
}

pub(crate) async fn find_order(state: &AppState, id: ObjectId) -> Result<Order, ApiError> {
    state
        .orders()
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| ApiError::not_found("Order not found"))
}

fn tracking_entry(status: OrderStatus, by: ObjectId, note: impl Into<String>) -> TrackingEntry {
    TrackingEntry {
        status,
        timestamp: BsonDateTime::now(),
        note: note.into(),
        updated_by: by,
    }
}

fn sellers_of(order: &Order) -> HashSet<ObjectId> {
    order.items.iter().map(|i| i.seller_id).collect()
}

pub(crate) async fn place_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    if req.address.is_empty() {
        return Err(ApiError::bad_request("Delivery address is required"));
    }
    let user = state
        .users()
        .find_one(doc! { "_id": u.user_id })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if user.cart.is_empty() {
        return Err(ApiError::bad_request("Cart is empty"));
    }

    // Resolve the seller for every cart line; the cart snapshot itself
    // only carries display data.
    let mut items = Vec::with_capacity(user.cart.len());
    for (key, entry) in &user.cart {
        let product_id = ObjectId::parse_str(key)?;
        let product = state
            .products()
            .find_one(doc! { "_id": product_id })
            .await?
            .ok_or_else(|| ApiError::bad_request("A product in your cart is no longer available"))?;
        items.push(OrderItem {
            product_id,
            seller_id: product.seller_id,
            quantity: entry.quantity,
            name: entry.name.clone(),
            price: entry.price,
            image: entry.image.clone(),
        });
    }
    let amount: f64 = items.iter().map(|i| i.price * i.quantity as f64).sum();

    let order = Order {
        id: None,
        user_id: u.user_id,
        items,
        amount,
        address: req.address,
        payment_method: req.payment_method,
        payment: false,
        status: OrderStatus::PendingConfirmation,
        tracking_history: vec![tracking_entry(
            OrderStatus::PendingConfirmation,
            u.user_id,
            "Order placed, awaiting seller confirmation",
        )],
        cancellation: None,
        placed_at: BsonDateTime::now(),
    };

    let mut session = begin_txn(&state).await?;
    let result = async {
        let inserted = state
            .orders()
            .insert_one(&order)
            .session(&mut session)
            .await?;
        state
            .users()
            .update_one(
                doc! { "_id": u.user_id },
                doc! { "$set": { "cart": {} } },
            )
            .session(&mut session)
            .await?;
        inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| ApiError::new(http::StatusCode::INTERNAL_SERVER_ERROR, "bad inserted id"))
    }
    .await;

    let order_id = match result {
        Ok(id) => {
            commit_txn(session).await?;
            id
        }
        Err(e) => {
            abort_txn(session).await;
            return Err(e);
        }
    };

    for seller in sellers_of(&order) {
        notify_order_status(
            &state,
            seller,
            order_id,
            "Pending Confirmation",
            "ORDER_PLACED",
            "You have received a new order".to_string(),
        )
        .await;
    }

    tracing::info!(order_id = %order_id, user_id = %u.user_id, amount, "order placed");
    Ok(Json(serde_json::json!({ "id": order_id.to_hex(), "amount": amount })))
}

pub(crate) async fn my_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let orders: Vec<Order> = state
        .orders()
        .find(doc! { "userId": u.user_id })
        .sort(doc! { "placedAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "orders": orders.iter().map(order_json).collect::<Vec<_>>(),
    })))
}

pub(crate) async fn seller_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let orders: Vec<Order> = state
        .orders()
        .find(doc! { "items.sellerId": u.user_id })
        .sort(doc! { "placedAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "orders": orders.iter().map(order_json).collect::<Vec<_>>(),
    })))
}

pub(crate) async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let order = find_order(&state, ObjectId::parse_str(&id)?).await?;
    let involved = order.user_id == u.user_id || sellers_of(&order).contains(&u.user_id);
    if !involved && !u.is_admin() {
        return Err(ApiError::forbidden("Not a participant in this order"));
    }
    Ok(Json(order_json(&order)))
}

pub(crate) async fn order_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let order = find_order(&state, ObjectId::parse_str(&id)?).await?;
    let involved = order.user_id == u.user_id || sellers_of(&order).contains(&u.user_id);
    if !involved && !u.is_admin() {
        return Err(ApiError::forbidden("Not a participant in this order"));
    }
    Ok(Json(serde_json::json!({
        "orderId": id,
        "status": order.status,
        "trackingHistory": order.tracking_history.iter().map(|t| serde_json::json!({
            "status": t.status,
            "timestamp": t.timestamp.to_chrono().to_rfc3339(),
            "note": t.note,
            "updatedBy": t.updated_by.to_hex(),
        })).collect::<Vec<_>>(),
    })))
}

/// Seller confirmation or rejection of a pending order. Rejection hands
/// the reserved stock back in the same transaction.
pub(crate) async fn review_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let order_id = ObjectId::parse_str(&id)?;
    let order = find_order(&state, order_id).await?;
    if !sellers_of(&order).contains(&u.user_id) && !u.is_admin() {
        return Err(ApiError::forbidden("Not a seller on this order"));
    }

    let next = match req.action.as_str() {
        "confirm" => OrderStatus::Confirmed,
        "reject" => OrderStatus::Rejected,
        _ => return Err(ApiError::bad_request("Action must be confirm or reject")),
    };
    if !order.status.can_transition_to(next) {
        return Err(ApiError::bad_request(format!(
            "Cannot {} an order in status {}",
            req.action, order.status
        )));
    }

    let note = req.note.unwrap_or_else(|| match next {
        OrderStatus::Confirmed => "Order confirmed by seller".to_string(),
        _ => "Order rejected by seller".to_string(),
    });
    let entry = tracking_entry(next, u.user_id, note.clone());

    let mut session = begin_txn(&state).await?;
    let result = async {
        if next == OrderStatus::Rejected {
            for item in &order.items {
                restore_stock(&state, &mut session, item.product_id, item.quantity).await?;
            }
        }
        state
            .orders()
            .update_one(
                doc! { "_id": order_id, "status": "Pending Confirmation" },
                doc! {
                    "$set": { "status": next.to_string() },
                    "$push": { "trackingHistory": to_bson(&entry).map_err(anyhow::Error::from)? },
                },
            )
            .session(&mut session)
            .await
            .map_err(ApiError::from)
    }
    .await;

    match result {
        Ok(r) if r.matched_count == 1 => commit_txn(session).await?,
        Ok(_) => {
            abort_txn(session).await;
            return Err(ApiError::bad_request("Order is no longer pending"));
        }
        Err(e) => {
            abort_txn(session).await;
            return Err(e);
        }
    }

    let (kind, msg) = match next {
        OrderStatus::Confirmed => ("ORDER_CONFIRMED", "Your order has been confirmed"),
        _ => ("ORDER_REJECTED", "Your order has been rejected"),
    };
    notify_order_status(
        &state,
        order.user_id,
        order_id,
        &next.to_string(),
        kind,
        msg.to_string(),
    )
    .await;

    tracing::info!(order_id = %order_id, status = %next, "order reviewed");
    Ok(Json(serde_json::json!({ "id": order_id.to_hex(), "status": next })))
}

/// Buyer cancellation: only before processing starts and only within
/// the configured window after placement.
pub(crate) async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let order_id = ObjectId::parse_str(&id)?;
    let order = find_order(&state, order_id).await?;
    if order.user_id != u.user_id && !u.is_admin() {
        return Err(ApiError::forbidden("Not your order"));
    }
    if !order.status.cancellable_by_buyer() {
        return Err(ApiError::bad_request(format!(
            "Cannot cancel an order in status {}",
            order.status
        )));
    }

    let window = state.cfg.orders.cancellation_window_hours;
    let check = check_cancellation_window(order.placed_at.to_chrono(), Utc::now(), window);
    if !check.can_cancel && !u.is_admin() {
        return Err(ApiError::bad_request(format!(
            "The {window}-hour cancellation window has passed ({} hours since order)",
            check.hours_passed
        )));
    }

    let reason = req.reason.unwrap_or_else(|| "Cancelled by buyer".to_string());
    let cancellation = CancellationDetails {
        cancelled_at: BsonDateTime::now(),
        cancelled_by: u.user_id,
        hours_since_order: check.hours_passed,
        reason: reason.clone(),
    };
    let entry = tracking_entry(OrderStatus::Cancelled, u.user_id, reason);

    let mut session = begin_txn(&state).await?;
    let result = async {
        for item in &order.items {
            restore_stock(&state, &mut session, item.product_id, item.quantity).await?;
        }
        state
            .orders()
            .update_one(
                doc! {
                    "_id": order_id,
                    "status": { "$in": ["Pending Confirmation", "Confirmed"] },
                },
                doc! {
                    "$set": {
                        "status": "Cancelled",
                        "cancellation": to_bson(&cancellation).map_err(anyhow::Error::from)?,
                    },
                    "$push": { "trackingHistory": to_bson(&entry).map_err(anyhow::Error::from)? },
                },
            )
            .session(&mut session)
            .await
            .map_err(ApiError::from)
    }
    .await;

    match result {
        Ok(r) if r.matched_count == 1 => commit_txn(session).await?,
        Ok(_) => {
            abort_txn(session).await;
            return Err(ApiError::bad_request("Order can no longer be cancelled"));
        }
        Err(e) => {
            abort_txn(session).await;
            return Err(e);
        }
    }

    for seller in sellers_of(&order) {
        notify_order_status(
            &state,
            seller,
            order_id,
            "Cancelled",
            "ORDER_CANCELLED",
            "An order for your products was cancelled by the buyer".to_string(),
        )
        .await;
    }

    tracing::info!(order_id = %order_id, user_id = %u.user_id, "order cancelled");
    Ok(Json(serde_json::json!({
        "id": order_id.to_hex(),
        "status": OrderStatus::Cancelled,
        "hoursSinceOrder": check.hours_passed,
    })))
}
