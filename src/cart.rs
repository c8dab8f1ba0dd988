//! Cart handlers. The cart lives on the user document as a map of
//! product id to a line snapshot, and stock is reserved the moment a
//! line is added, so every cart mutation is paired with a stock move
//! inside one transaction.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, to_bson};
use serde::Deserialize;

use crate::auth::auth_user;
use crate::error::ApiError;
use crate::models::{CartEntry, User};
use crate::state::AppState;
use crate::store::{abort_txn, begin_txn, commit_txn, deduct_stock, restore_stock};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CartItemRequest {
    product_id: String,
    quantity: i64,
}

/// Signed stock movement needed to go from the quantity already in the
/// cart to the requested one.
pub(crate) fn cart_delta(current: i64, requested: i64) -> i64 {
    requested - current
}

async fn load_user(state: &AppState, user_id: ObjectId) -> Result<User, ApiError> {
    state
        .users()
        .find_one(doc! { "_id": user_id })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub(crate) async fn get_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let user = load_user(&state, u.user_id).await?;
    let total: f64 = user
        .cart
        .values()
        .map(|e| e.price * e.quantity as f64)
        .sum();
    Ok(Json(serde_json::json!({
        "cart": user.cart,
        "total": total,
    })))
}

pub(crate) async fn add_to_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CartItemRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    if req.quantity <= 0 {
        return Err(ApiError::bad_request("Quantity must be positive"));
    }
    let product_id = ObjectId::parse_str(&req.product_id)?;
    let user = load_user(&state, u.user_id).await?;

    let mut session = begin_txn(&state).await?;
    let result = async {
        let product = state
            .products()
            .find_one(doc! { "_id": product_id })
            .session(&mut session)
            .await?
            .ok_or_else(|| ApiError::not_found("Product not found"))?;
        if product.seller_id == u.user_id {
            return Err(ApiError::bad_request("Cannot add your own product to cart"));
        }

        deduct_stock(&state, &mut session, product_id, req.quantity).await?;

        let key = product_id.to_hex();
        let existing = user.cart.get(&key).map(|e| e.quantity).unwrap_or(0);
        let entry = CartEntry {
            quantity: existing + req.quantity,
            name: product.name.clone(),
            price: product.price,
            image: product.images.first().cloned().unwrap_or_default(),
        };
        state
            .users()
            .update_one(
                doc! { "_id": u.user_id },
                doc! { "$set": { format!("cart.{key}"): to_bson(&entry).map_err(anyhow::Error::from)? } },
            )
            .session(&mut session)
            .await?;
        Ok(entry)
    }
    .await;

    match result {
        Ok(entry) => {
            commit_txn(session).await?;
            Ok(Json(serde_json::json!({
                "productId": product_id.to_hex(),
                "quantity": entry.quantity,
            })))
        }
        Err(e) => {
            abort_txn(session).await;
            Err(e)
        }
    }
}

/// Set a cart line to an absolute quantity. Shrinking returns stock,
/// growing takes it, zero removes the line.
pub(crate) async fn update_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CartItemRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    if req.quantity < 0 {
        return Err(ApiError::bad_request("Quantity cannot be negative"));
    }
    let product_id = ObjectId::parse_str(&req.product_id)?;
    let user = load_user(&state, u.user_id).await?;
    let key = product_id.to_hex();
    let current = user
        .cart
        .get(&key)
        .map(|e| e.quantity)
        .ok_or_else(|| ApiError::not_found("Product not in cart"))?;

    let delta = cart_delta(current, req.quantity);

    let mut session = begin_txn(&state).await?;
    let result = async {
        if delta > 0 {
            deduct_stock(&state, &mut session, product_id, delta).await?;
        } else if delta < 0 {
            restore_stock(&state, &mut session, product_id, -delta).await?;
        }

        let update = if req.quantity == 0 {
            doc! { "$unset": { format!("cart.{key}"): "" } }
        } else {
            doc! { "$set": { format!("cart.{key}.quantity"): req.quantity } }
        };
        state
            .users()
            .update_one(doc! { "_id": u.user_id }, update)
            .session(&mut session)
            .await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            commit_txn(session).await?;
            Ok(Json(serde_json::json!({
                "productId": key,
                "quantity": req.quantity,
            })))
        }
        Err(e) => {
            abort_txn(session).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::cart_delta;

    #[test]
    fn delta_moves_stock_the_right_way() {
        assert_eq!(cart_delta(2, 5), 3); // grow: deduct 3
        assert_eq!(cart_delta(5, 2), -3); // shrink: restore 3
        assert_eq!(cart_delta(4, 4), 0);
        assert_eq!(cart_delta(3, 0), -3); // removal restores everything
    }
}
