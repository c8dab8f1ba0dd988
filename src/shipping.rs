//! Couriers and shipments. A shipment is the single record of who is
//! delivering an order; every shipment status change is mirrored onto
//! the order's status and tracking history in the same transaction.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, to_bson, DateTime as BsonDateTime};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{admin_user, auth_user, require_role};
use crate::error::ApiError;
use crate::models::{
    Courier, LocationEntry, OrderStatus, Role, Shipment, ShipmentStatus, TrackingEntry,
};
use crate::notify::notify_order_status;
use crate::orders::find_order;
use crate::state::AppState;
use crate::store::{abort_txn, begin_txn, commit_txn};
use crate::users::is_duplicate_key;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CourierCreate {
    name: String,
    plate_number: String,
    #[serde(default)]
    contact_phone: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssignCourierRequest {
    courier_id: String,
    #[serde(default)]
    shipping_method: Option<String>,
    #[serde(default)]
    estimated_delivery: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShipmentStatusUpdate {
    status: ShipmentStatus,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

fn shipment_json(s: &Shipment) -> serde_json::Value {
    serde_json::json!({
        "id": s.id.map(|i| i.to_hex()),
        "orderId": s.order_id.to_hex(),
        "userId": s.user_id.to_hex(),
        "courierId": s.courier_id.to_hex(),
        "status": s.status,
        "trackingNumber": s.tracking_number,
        "shippingMethod": s.shipping_method,
        "estimatedDelivery": s.estimated_delivery.map(|d| d.to_chrono().to_rfc3339()),
        "instructions": s.instructions,
        "locationHistory": s.location_history.iter().map(|l| serde_json::json!({
            "status": l.status,
            "location": l.location,
            "note": l.note,
            "timestamp": l.timestamp.to_chrono().to_rfc3339(),
        })).collect::<Vec<_>>(),
        "deliveredAt": s.delivered_at.map(|d| d.to_chrono().to_rfc3339()),
        "createdAt": s.created_at.to_chrono().to_rfc3339(),
    })
}

pub(crate) async fn list_couriers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&state, &headers, Role::Seller).await?;
    let couriers: Vec<Courier> = state
        .couriers()
        .find(doc! { "active": true })
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "couriers": couriers.iter().map(|c| serde_json::json!({
            "id": c.id.map(|i| i.to_hex()),
            "name": c.name,
            "plateNumber": c.plate_number,
            "contactPhone": c.contact_phone,
            "address": c.address,
        })).collect::<Vec<_>>(),
    })))
}

pub(crate) async fn create_courier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CourierCreate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = admin_user(&state, &headers).await?;
    if req.name.trim().is_empty() || req.plate_number.trim().is_empty() {
        return Err(ApiError::bad_request("Name and plate number are required"));
    }
    let courier = Courier {
        id: None,
        name: req.name.trim().to_string(),
        plate_number: req.plate_number.trim().to_string(),
        contact_phone: req.contact_phone,
        address: req.address,
        active: true,
        created_at: BsonDateTime::now(),
    };
    let inserted = state.couriers().insert_one(&courier).await?;
    let id = inserted.inserted_id.as_object_id();

    tracing::info!(courier_id = ?id, admin_id = %u.user_id, "courier created");
    Ok(Json(serde_json::json!({ "id": id.map(|i| i.to_hex()) })))
}

/// Assign a courier to a confirmed order, creating its shipment and
/// moving the order into Processing.
pub(crate) async fn assign_courier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AssignCourierRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let order_id = ObjectId::parse_str(&id)?;
    let order = find_order(&state, order_id).await?;
    let involved = order.items.iter().any(|i| i.seller_id == u.user_id);
    if !involved && !u.is_admin() {
        return Err(ApiError::forbidden("Not a seller on this order"));
    }
    if !order.status.can_transition_to(OrderStatus::Processing) {
        return Err(ApiError::bad_request(format!(
            "Cannot start shipping an order in status {}",
            order.status
        )));
    }

    let courier_id = ObjectId::parse_str(&req.courier_id)?;
    let courier = state
        .couriers()
        .find_one(doc! { "_id": courier_id, "active": true })
        .await?
        .ok_or_else(|| ApiError::not_found("Courier not found"))?;

    let now = BsonDateTime::now();
    let shipment = Shipment {
        id: None,
        order_id,
        user_id: order.user_id,
        courier_id,
        status: ShipmentStatus::Processing,
        tracking_number: format!("TRK-{}", Uuid::new_v4().simple()),
        shipping_method: req.shipping_method.unwrap_or_else(|| "standard".to_string()),
        estimated_delivery: req.estimated_delivery.map(BsonDateTime::from_chrono),
        instructions: req.instructions,
        location_history: vec![LocationEntry {
            status: ShipmentStatus::Processing,
            location: None,
            note: Some(format!("Shipment created, courier {} assigned", courier.name)),
            timestamp: now,
        }],
        delivered_at: None,
        created_at: now,
    };
    let entry = TrackingEntry {
        status: OrderStatus::Processing,
        timestamp: now,
        note: format!("Courier {} assigned", courier.name),
        updated_by: u.user_id,
    };

    let mut session = begin_txn(&state).await?;
    let result = async {
        // Unique index on orderId makes double assignment a 400.
        let inserted = match state.shipments().insert_one(&shipment).session(&mut session).await {
            Ok(r) => r,
            Err(e) if is_duplicate_key(&e) => {
                return Err(ApiError::bad_request("Order already has a shipment"));
            }
            Err(e) => return Err(e.into()),
        };
        let updated = state
            .orders()
            .update_one(
                doc! { "_id": order_id, "status": "Confirmed" },
                doc! {
                    "$set": { "status": "Processing" },
                    "$push": { "trackingHistory": to_bson(&entry).map_err(anyhow::Error::from)? },
                },
            )
            .session(&mut session)
            .await?;
        if updated.matched_count == 0 {
            return Err(ApiError::bad_request("Order is no longer confirmed"));
        }
        inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| ApiError::new(http::StatusCode::INTERNAL_SERVER_ERROR, "bad inserted id"))
    }
    .await;

    let shipment_id = match result {
        Ok(id) => {
            commit_txn(session).await?;
            id
        }
        Err(e) => {
            abort_txn(session).await;
            return Err(e);
        }
    };

    notify_order_status(
        &state,
        order.user_id,
        order_id,
        "Processing",
        "ORDER_PROCESSING",
        format!(
            "Your order is being prepared for shipping (tracking {})",
            shipment.tracking_number
        ),
    )
    .await;

    tracing::info!(order_id = %order_id, shipment_id = %shipment_id, "courier assigned");
    Ok(Json(serde_json::json!({
        "shipmentId": shipment_id.to_hex(),
        "trackingNumber": shipment.tracking_number,
        "orderStatus": OrderStatus::Processing,
    })))
}

/// Advance a shipment, mirroring the new status onto its order.
pub(crate) async fn update_shipment_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ShipmentStatusUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let shipment_id = ObjectId::parse_str(&id)?;
    let shipment = state
        .shipments()
        .find_one(doc! { "_id": shipment_id })
        .await?
        .ok_or_else(|| ApiError::not_found("Shipment not found"))?;
    let order = find_order(&state, shipment.order_id).await?;
    let involved = order.items.iter().any(|i| i.seller_id == u.user_id);
    if !involved && !u.is_admin() {
        return Err(ApiError::forbidden("Not a seller on this order"));
    }
    if !shipment.status.can_transition_to(req.status) {
        return Err(ApiError::bad_request(format!(
            "Cannot move a shipment from {:?} to {:?}",
            shipment.status, req.status
        )));
    }

    let now = BsonDateTime::now();
    let order_status = req.status.as_order_status();
    let location_entry = LocationEntry {
        status: req.status,
        location: req.location,
        note: req.note,
        timestamp: now,
    };
    let tracking = TrackingEntry {
        status: order_status,
        timestamp: now,
        note: format!("Shipment {}", order_status.to_string().to_lowercase()),
        updated_by: u.user_id,
    };

    let mut shipment_set = doc! { "status": to_bson(&req.status).map_err(anyhow::Error::from)? };
    if req.status == ShipmentStatus::Delivered {
        shipment_set.insert("deliveredAt", now);
    }

    let mut session = begin_txn(&state).await?;
    let result = async {
        let updated = state
            .shipments()
            .update_one(
                doc! {
                    "_id": shipment_id,
                    "status": to_bson(&shipment.status).map_err(anyhow::Error::from)?,
                },
                doc! {
                    "$set": shipment_set,
                    "$push": { "locationHistory": to_bson(&location_entry).map_err(anyhow::Error::from)? },
                },
            )
            .session(&mut session)
            .await?;
        if updated.matched_count == 0 {
            return Err(ApiError::bad_request("Shipment status changed, please retry"));
        }
        state
            .orders()
            .update_one(
                doc! { "_id": shipment.order_id },
                doc! {
                    "$set": { "status": order_status.to_string() },
                    "$push": { "trackingHistory": to_bson(&tracking).map_err(anyhow::Error::from)? },
                },
            )
            .session(&mut session)
            .await?;
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

    let (kind, msg) = match req.status {
        ShipmentStatus::Shipped => ("ORDER_SHIPPED", "Your order has been shipped"),
        ShipmentStatus::Delivered => ("ORDER_DELIVERED", "Your order has been delivered"),
        ShipmentStatus::Processing => ("ORDER_PROCESSING", "Your order is being processed"),
    };
    notify_order_status(
        &state,
        shipment.user_id,
        shipment.order_id,
        &order_status.to_string(),
        kind,
        msg.to_string(),
    )
    .await;

    tracing::info!(shipment_id = %shipment_id, status = ?req.status, "shipment updated");
    Ok(Json(serde_json::json!({
        "id": shipment_id.to_hex(),
        "status": req.status,
        "orderStatus": order_status,
    })))
}

pub(crate) async fn get_order_shipment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let order_id = ObjectId::parse_str(&id)?;
    let order = find_order(&state, order_id).await?;
    let involved =
        order.user_id == u.user_id || order.items.iter().any(|i| i.seller_id == u.user_id);
    if !involved && !u.is_admin() {
        return Err(ApiError::forbidden("Not a participant in this order"));
    }
    let shipment = state
        .shipments()
        .find_one(doc! { "orderId": order_id })
        .await?
        .ok_or_else(|| ApiError::not_found("No shipment for this order"))?;
    Ok(Json(shipment_json(&shipment)))
}

pub(crate) async fn track_shipment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tracking_number): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let shipment = state
        .shipments()
        .find_one(doc! { "trackingNumber": &tracking_number })
        .await?
        .ok_or_else(|| ApiError::not_found("Tracking number not found"))?;
    if shipment.user_id != u.user_id && !u.is_admin() {
        let order = find_order(&state, shipment.order_id).await?;
        if !order.items.iter().any(|i| i.seller_id == u.user_id) {
            return Err(ApiError::forbidden("Not a participant in this shipment"));
        }
    }
    Ok(Json(shipment_json(&shipment)))
}
