use std::collections::HashMap;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use serde::Deserialize;

use crate::auth::{auth_user, make_access_token, make_refresh_token, Claims};
use crate::error::ApiError;
use crate::models::{InvestorApplication, Role, SellerApplication, User};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApplyRoleRequest {
    role: Role,
    #[serde(default)]
    seller_application: Option<SellerApplication>,
    #[serde(default)]
    investor_application: Option<InvestorApplication>,
}

fn token_pair(
    state: &AppState,
    user_id: mongodb::bson::oid::ObjectId,
    role: Role,
    email: &str,
) -> Result<serde_json::Value, ApiError> {
    let access = make_access_token(&state.cfg, user_id, role, email)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("token error: {e}")))?;
    let refresh = make_refresh_token(&state.cfg, user_id, role)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("token error: {e}")))?;
    Ok(serde_json::json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer"
    }))
}

pub(crate) async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if req.name.trim().is_empty() || email.is_empty() {
        return Err(ApiError::bad_request("Name and email are required"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request("Password must be at least 8 characters"));
    }

    let hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("hash error: {e}")))?;

    let user = User {
        id: None,
        name: req.name.trim().to_string(),
        email: email.clone(),
        password_hash: hash,
        role: Role::Buyer,
        cart: HashMap::new(),
        investments: Vec::new(),
        seller_application: None,
        investor_application: None,
        created_at: BsonDateTime::now(),
    };

    let inserted = match state.users().insert_one(&user).await {
        Ok(r) => r,
        // Unique index on email turns duplicate registration into a 400.
        Err(e) if is_duplicate_key(&e) => {
            return Err(ApiError::bad_request("Email already registered"));
        }
        Err(e) => return Err(e.into()),
    };
    let user_id = inserted
        .inserted_id
        .as_object_id()
        .ok_or_else(|| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "bad inserted id"))?;

    tracing::info!(user_id = %user_id, "user registered");
    Ok(Json(token_pair(&state, user_id, Role::Buyer, &email)?))
}

pub(crate) fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        *e.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we))
            if we.code == 11000
    )
}

pub(crate) async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .users()
        .find_one(doc! { "email": &email })
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Invalid credentials"))?;

    let ok = bcrypt::verify(&req.password, &user.password_hash).unwrap_or(false);
    if !ok {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid credentials"));
    }
    let user_id = user.id.ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(token_pair(&state, user_id, user.role, &user.email)?))
}

pub(crate) async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let decoded = decode::<Claims>(
        &req.refresh_token,
        &DecodingKey::from_secret(state.cfg.jwt.secret_key.as_bytes()),
        &validation,
    )
    .map_err(|_| ApiError::new(StatusCode::UNAUTHORIZED, "Invalid refresh token"))?;
    if decoded.claims.r#type.as_deref() != Some("refresh") {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid refresh token"));
    }
    let user_id = mongodb::bson::oid::ObjectId::parse_str(&decoded.claims.sub)
        .map_err(|_| ApiError::new(StatusCode::UNAUTHORIZED, "Invalid refresh token"))?;

    // Re-read the user so a role change invalidates stale refresh claims.
    let user = state
        .users()
        .find_one(doc! { "_id": user_id })
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Invalid refresh token"))?;

    Ok(Json(token_pair(&state, user_id, user.role, &user.email)?))
}

pub(crate) async fn get_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let user = state
        .users()
        .find_one(doc! { "_id": u.user_id })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(serde_json::json!({
        "id": u.user_id.to_hex(),
        "name": user.name,
        "email": user.email,
        "role": user.role,
        "investments": user.investments.iter().map(|i| i.to_hex()).collect::<Vec<_>>(),
        "sellerApplication": user.seller_application,
        "investorApplication": user.investor_application,
    })))
}

/// Role upgrade with an explicit transition: buyers may apply to become
/// sellers or investors; anything else is refused.
pub(crate) async fn apply_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ApplyRoleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let user = state
        .users()
        .find_one(doc! { "_id": u.user_id })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !user.role.can_upgrade_to(req.role) {
        return Err(ApiError::bad_request(format!(
            "Cannot upgrade from {} to {}",
            user.role, req.role
        )));
    }

    let mut update = doc! { "role": mongodb::bson::to_bson(&req.role).map_err(anyhow::Error::from)? };
    match req.role {
        Role::Seller => {
            let app = req
                .seller_application
                .ok_or_else(|| ApiError::bad_request("Seller application details required"))?;
            update.insert(
                "sellerApplication",
                mongodb::bson::to_bson(&app).map_err(anyhow::Error::from)?,
            );
        }
        Role::Investor => {
            let app = req
                .investor_application
                .ok_or_else(|| ApiError::bad_request("Investor application details required"))?;
            update.insert(
                "investorApplication",
                mongodb::bson::to_bson(&app).map_err(anyhow::Error::from)?,
            );
        }
        _ => {}
    }

    state
        .users()
        .update_one(doc! { "_id": u.user_id }, doc! { "$set": update })
        .await?;

    tracing::info!(user_id = %u.user_id, role = %req.role, "role upgraded");
    Ok(Json(serde_json::json!({
        "id": u.user_id.to_hex(),
        "role": req.role,
    })))
}
