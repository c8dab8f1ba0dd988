use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use mongodb::Client;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

mod auth;
mod campaigns;
mod cart;
mod config;
mod error;
mod investments;
mod models;
mod notifications;
mod notify;
mod orders;
mod products;
mod questions;
mod shipping;
mod state;
mod store;
mod trades;
mod users;

use config::load_config;
use state::AppState;

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Arc::new(load_config()?);

    let client = Client::with_uri_str(&cfg.database.url)
        .await
        .context("failed to connect to mongodb")?;
    let state = AppState::new(cfg.clone(), client);
    store::ensure_indexes(&state)
        .await
        .context("failed to create indexes")?;

    // CORS: explicitly allow Authorization.
    let allowed_headers = [AUTHORIZATION, CONTENT_TYPE, ACCEPT];
    let allowed_methods = [Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS];
    let cors = if cfg.api.cors_origins.iter().any(|x| x == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
    } else {
        let origins: Vec<HeaderValue> = cfg
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
    };

    let api = Router::new()
        .route("/users/register", post(users::register))
        .route("/users/login", post(users::login))
        .route("/users/refresh", post(users::refresh_token))
        .route("/users/me", get(users::get_me))
        .route("/users/apply-role", post(users::apply_role))
        .route("/products", get(products::list_products).post(products::create_product))
        .route("/products/mine", get(products::my_products))
        .route("/products/trade", get(products::trade_listings))
        .route(
            "/products/{product_id}",
            get(products::get_product)
                .patch(products::update_product)
                .delete(products::delete_product),
        )
        .route("/products/{product_id}/trade-listing", post(products::add_trade_listing).delete(products::remove_trade_listing))
        .route("/cart", get(cart::get_cart))
        .route("/cart/add", post(cart::add_to_cart))
        .route("/cart/update", post(cart::update_cart))
        .route("/orders", post(orders::place_order))
        .route("/orders/me", get(orders::my_orders))
        .route("/orders/seller", get(orders::seller_orders))
        .route("/orders/{order_id}", get(orders::get_order))
        .route("/orders/{order_id}/history", get(orders::order_history))
        .route("/orders/{order_id}/review", post(orders::review_order))
        .route("/orders/{order_id}/cancel", post(orders::cancel_order))
        .route("/orders/{order_id}/assign-courier", post(shipping::assign_courier))
        .route("/orders/{order_id}/shipment", get(shipping::get_order_shipment))
        .route("/trades", post(trades::propose_trade))
        .route("/trades/me", get(trades::list_trades))
        .route("/trades/completed", get(trades::completed_trades))
        .route("/trades/{trade_id}", get(trades::get_trade).patch(trades::update_trade))
        .route("/trades/{trade_id}/accept", post(trades::accept_trade))
        .route("/trades/{trade_id}/reject", post(trades::reject_trade))
        .route("/trades/{trade_id}/cancel", post(trades::cancel_trade))
        .route("/trades/{trade_id}/complete", post(trades::complete_trade))
        .route("/campaigns", get(campaigns::list_campaigns).post(campaigns::create_campaign))
        .route("/campaigns/mine", get(campaigns::my_campaigns))
        .route("/campaigns/{campaign_id}", get(campaigns::get_campaign))
        .route("/campaigns/{campaign_id}/investments", get(investments::campaign_investments))
        .route(
            "/campaigns/{campaign_id}/questions",
            get(questions::list_questions).post(questions::ask_question),
        )
        .route("/questions/{question_id}/replies", post(questions::reply_to_question))
        .route("/questions/{question_id}", delete(questions::delete_question))
        .route("/investments", post(investments::place_investment))
        .route("/investments/me", get(investments::my_investments))
        .route("/investments/{investment_id}", get(investments::get_investment))
        .route("/investments/{investment_id}/confirm", post(investments::confirm_payment))
        .route("/investments/{investment_id}/accept", post(investments::accept_investment))
        .route("/investments/{investment_id}/reject", post(investments::reject_investment))
        .route("/couriers", get(shipping::list_couriers).post(shipping::create_courier))
        .route("/shipments/{shipment_id}/status", post(shipping::update_shipment_status))
        .route("/shipments/track/{tracking_number}", get(shipping::track_shipment))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{notification_id}/read", post(notifications::mark_read));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cfg.api.host, cfg.api.port).parse()?;
    tracing::info!(%addr, "marketplace API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
