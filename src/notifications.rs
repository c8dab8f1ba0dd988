use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;

use crate::auth::auth_user;
use crate::error::ApiError;
use crate::models::Notification;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct UnreadQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn notification_json(n: &Notification) -> serde_json::Value {
    serde_json::json!({
        "id": n.id.map(|i| i.to_hex()),
        "type": n.kind,
        "title": n.title,
        "message": n.message,
        "data": n.data,
        "read": n.read,
        "createdAt": n.created_at.to_chrono().to_rfc3339(),
    })
}

pub(crate) async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let notifications: Vec<Notification> = state
        .notifications()
        .find(doc! { "recipient": u.user_id })
        .sort(doc! { "createdAt": -1 })
        .limit(50)
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "notifications": notifications.iter().map(notification_json).collect::<Vec<_>>(),
    })))
}

pub(crate) async fn unread_count(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<UnreadQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let mut filter = doc! { "recipient": u.user_id, "read": false };
    if let Some(kind) = &q.kind {
        filter.insert("type", kind);
    }
    let count = state.notifications().count_documents(filter).await?;
    Ok(Json(serde_json::json!({ "unread": count })))
}

pub(crate) async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let notification_id = ObjectId::parse_str(&id)?;
    let result = state
        .notifications()
        .update_one(
            doc! { "_id": notification_id, "recipient": u.user_id },
            doc! { "$set": { "read": true } },
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("Notification not found"));
    }
    Ok(Json(serde_json::json!({ "id": id, "read": true })))
}

pub(crate) async fn mark_all_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let result = state
        .notifications()
        .update_many(
            doc! { "recipient": u.user_id, "read": false },
            doc! { "$set": { "read": true } },
        )
        .await?;
    Ok(Json(serde_json::json!({ "updated": result.modified_count })))
}
