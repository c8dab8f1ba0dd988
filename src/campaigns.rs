use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use serde::Deserialize;

use crate::auth::require_role;
use crate::error::ApiError;
use crate::models::{Campaign, CampaignCategory, CampaignStatus, Role};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CampaignCreate {
    title: String,
    description: String,
    category: CampaignCategory,
    funding_goal: f64,
    #[serde(default)]
    minimum_investment: Option<f64>,
    expected_return: f64,
    duration: i32,
    end_date: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CampaignListQuery {
    category: Option<String>,
    status: Option<String>,
}

pub(crate) fn campaign_json(c: &Campaign) -> serde_json::Value {
    serde_json::json!({
        "id": c.id.map(|i| i.to_hex()),
        "title": c.title,
        "description": c.description,
        "category": c.category,
        "fundingGoal": c.funding_goal,
        "currentAmount": c.current_amount,
        "progressPercentage": c.progress_percentage,
        "minimumInvestment": c.minimum_investment,
        "expectedReturn": c.expected_return,
        "duration": c.duration,
        "investorsCount": c.investors_count,
        "completedInvestmentsCount": c.completed_investments_count,
        "completedInvestmentsAmount": c.completed_investments_amount,
        "status": c.status,
        "sellerId": c.seller_id.to_hex(),
        "videos": c.videos,
        "verified": c.verified,
        "startDate": c.start_date.to_chrono().to_rfc3339(),
        "endDate": c.end_date.to_chrono().to_rfc3339(),
    })
}

pub(crate) async fn find_campaign(state: &AppState, id: ObjectId) -> Result<Campaign, ApiError> {
    state
        .campaigns()
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| ApiError::not_found("Campaign not found"))
}

pub(crate) async fn create_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CampaignCreate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    if req.funding_goal <= 0.0 {
        return Err(ApiError::bad_request("Funding goal must be positive"));
    }
    if let Some(min) = req.minimum_investment {
        if min <= 0.0 || min > req.funding_goal {
            return Err(ApiError::bad_request(
                "Minimum investment must be positive and within the funding goal",
            ));
        }
    }
    let now = BsonDateTime::now();
    if req.end_date <= now.to_chrono() {
        return Err(ApiError::bad_request("End date must be in the future"));
    }

    let campaign = Campaign {
        id: None,
        title: req.title,
        description: req.description,
        category: req.category,
        funding_goal: req.funding_goal,
        current_amount: 0.0,
        progress_percentage: 0.0,
        minimum_investment: req.minimum_investment,
        expected_return: req.expected_return,
        duration: req.duration,
        investors_count: 0,
        completed_investments_count: 0,
        completed_investments_amount: 0.0,
        status: CampaignStatus::Active,
        seller_id: u.user_id,
        videos: Vec::new(),
        verified: false,
        start_date: now,
        end_date: BsonDateTime::from_chrono(req.end_date),
        created_at: now,
    };
    let inserted = state.campaigns().insert_one(&campaign).await?;
    let id = inserted.inserted_id.as_object_id();

    tracing::info!(campaign_id = ?id, seller_id = %u.user_id, "campaign created");
    Ok(Json(serde_json::json!({ "id": id.map(|i| i.to_hex()) })))
}

pub(crate) async fn list_campaigns(
    State(state): State<AppState>,
    Query(q): Query<CampaignListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut filter = doc! {};
    filter.insert("status", q.status.as_deref().unwrap_or("active"));
    if let Some(cat) = &q.category {
        filter.insert("category", cat);
    }
    let campaigns: Vec<Campaign> = state
        .campaigns()
        .find(filter)
        .sort(doc! { "createdAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "campaigns": campaigns.iter().map(campaign_json).collect::<Vec<_>>(),
        "total": campaigns.len(),
    })))
}

pub(crate) async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let campaign = find_campaign(&state, ObjectId::parse_str(&id)?).await?;
    Ok(Json(campaign_json(&campaign)))
}

pub(crate) async fn my_campaigns(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let campaigns: Vec<Campaign> = state
        .campaigns()
        .find(doc! { "sellerId": u.user_id })
        .sort(doc! { "createdAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "campaigns": campaigns.iter().map(campaign_json).collect::<Vec<_>>(),
    })))
}
