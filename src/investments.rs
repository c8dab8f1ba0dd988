//! Investment handlers. An investment moves pending -> (approved) ->
//! accepted -> completed; only completed investments count toward the
//! campaign's funding total, and that update runs in the same
//! transaction as the status change.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, to_bson, DateTime as BsonDateTime, Document};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{auth_user, require_role, AuthUser};
use crate::campaigns::find_campaign;
use crate::error::ApiError;
use crate::models::{
    Campaign, CampaignStatus, Investment, InvestmentStatus, PaymentDetails, Role,
};
use crate::notify::notify_investment;
use crate::state::AppState;
use crate::store::{abort_txn, begin_txn, commit_txn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InvestRequest {
    campaign_id: String,
    amount: f64,
    payment_method: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfirmPaymentRequest {
    #[serde(default)]
    payment_mode: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AcceptRequest {
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectRequest {
    #[serde(default)]
    reason: Option<String>,
}

fn investment_json(i: &Investment) -> serde_json::Value {
    serde_json::json!({
        "id": i.id.map(|x| x.to_hex()),
        "userId": i.user_id.to_hex(),
        "campaignId": i.campaign_id.to_hex(),
        "amount": i.amount,
        "status": i.status,
        "paymentMethod": i.payment_method,
        "payment": i.payment,
        "paymentDetails": i.payment_details,
        "countedInFunding": i.counted_in_funding,
        "acceptedAt": i.accepted_at.map(|d| d.to_chrono().to_rfc3339()),
        "completedAt": i.completed_at.map(|d| d.to_chrono().to_rfc3339()),
        "completionNotes": i.completion_notes,
        "rejectedAt": i.rejected_at.map(|d| d.to_chrono().to_rfc3339()),
        "rejectionReason": i.rejection_reason,
        "createdAt": i.created_at.to_chrono().to_rfc3339(),
    })
}

async fn find_investment(state: &AppState, id: ObjectId) -> Result<Investment, ApiError> {
    state
        .investments()
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| ApiError::not_found("Investment not found"))
}

/// Campaign-owner gate shared by confirm/accept/reject.
async fn owned_campaign(
    state: &AppState,
    u: &AuthUser,
    campaign_id: ObjectId,
) -> Result<Campaign, ApiError> {
    let campaign = find_campaign(state, campaign_id).await?;
    if campaign.seller_id != u.user_id && !u.is_admin() {
        return Err(ApiError::forbidden("Not the owner of this campaign"));
    }
    Ok(campaign)
}

pub(crate) async fn place_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InvestRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Investor).await?;
    if req.amount <= 0.0 {
        return Err(ApiError::bad_request("Investment amount must be positive"));
    }
    let campaign_id = ObjectId::parse_str(&req.campaign_id)?;
    let campaign = find_campaign(&state, campaign_id).await?;
    if campaign.status != CampaignStatus::Active {
        return Err(ApiError::bad_request("Campaign is not accepting investments"));
    }
    if campaign.seller_id == u.user_id {
        return Err(ApiError::bad_request("Cannot invest in your own campaign"));
    }
    if campaign.end_date.to_chrono() < chrono::Utc::now() {
        return Err(ApiError::bad_request("Campaign has ended"));
    }
    if let Some(min) = campaign.minimum_investment {
        if req.amount < min {
            return Err(ApiError::bad_request(format!(
                "Minimum investment for this campaign is {min}"
            )));
        }
    }

    let investment = Investment {
        id: None,
        user_id: u.user_id,
        campaign_id,
        amount: req.amount,
        status: InvestmentStatus::Pending,
        payment_method: req.payment_method,
        payment: false,
        payment_details: None,
        counted_in_funding: false,
        accepted_at: None,
        completed_at: None,
        completion_notes: None,
        rejected_at: None,
        rejection_reason: None,
        created_at: BsonDateTime::now(),
    };

    let mut session = begin_txn(&state).await?;
    let result = async {
        let inserted = state
            .investments()
            .insert_one(&investment)
            .session(&mut session)
            .await?;
        let id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| ApiError::new(http::StatusCode::INTERNAL_SERVER_ERROR, "bad inserted id"))?;
        state
            .campaigns()
            .update_one(
                doc! { "_id": campaign_id },
                doc! { "$inc": { "investorsCount": 1 } },
            )
            .session(&mut session)
            .await?;
        state
            .users()
            .update_one(
                doc! { "_id": u.user_id },
                doc! { "$push": { "investments": id } },
            )
            .session(&mut session)
            .await?;
        Ok(id)
    }
    .await;

    let investment_id = match result {
        Ok(id) => {
            commit_txn(session).await?;
            id
        }
        Err(e) => {
            abort_txn(session).await;
            return Err(e);
        }
    };

    notify_investment(&state, campaign.seller_id, investment_id, "pending", "placed on your campaign").await;
    tracing::info!(investment_id = %investment_id, campaign_id = %campaign_id, amount = req.amount, "investment placed");
    Ok(Json(serde_json::json!({
        "id": investment_id.to_hex(),
        "status": InvestmentStatus::Pending,
    })))
}

pub(crate) async fn my_investments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let investments: Vec<Investment> = state
        .investments()
        .find(doc! { "userId": u.user_id })
        .sort(doc! { "createdAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "investments": investments.iter().map(investment_json).collect::<Vec<_>>(),
    })))
}

pub(crate) async fn campaign_investments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let campaign_id = ObjectId::parse_str(&id)?;
    owned_campaign(&state, &u, campaign_id).await?;
    let investments: Vec<Investment> = state
        .investments()
        .find(doc! { "campaignId": campaign_id })
        .sort(doc! { "createdAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "investments": investments.iter().map(investment_json).collect::<Vec<_>>(),
    })))
}

/// Record the off-platform payment against an investment. Issues the
/// receipt number that acceptance later requires.
pub(crate) async fn confirm_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let investment_id = ObjectId::parse_str(&id)?;
    let investment = find_investment(&state, investment_id).await?;
    owned_campaign(&state, &u, investment.campaign_id).await?;
    if !investment.status.acceptable() {
        return Err(ApiError::bad_request(format!(
            "Cannot confirm payment on a {} investment",
            investment.status
        )));
    }
    if investment.payment {
        return Err(ApiError::bad_request("Payment already confirmed"));
    }

    let details = PaymentDetails {
        receipt_number: format!("RCPT-{}", Uuid::new_v4().simple()),
        confirmed_by: u.user_id,
        confirmed_at: BsonDateTime::now(),
        payment_mode: req.payment_mode,
        notes: req.notes,
    };
    // Confirming payment also moves a pending investment to approved.
    state
        .investments()
        .update_one(
            doc! { "_id": investment_id },
            doc! { "$set": {
                "status": "approved",
                "payment": true,
                "paymentDetails": to_bson(&details).map_err(anyhow::Error::from)?,
            } },
        )
        .await?;

    notify_investment(&state, investment.user_id, investment_id, &investment.status.to_string(), "payment-confirmed").await;
    Ok(Json(serde_json::json!({
        "id": investment_id.to_hex(),
        "receiptNumber": details.receipt_number,
    })))
}

/// What accepting an investment must do given its current state.
/// Accepting a pending one confirms its payment on the way, the way the
/// money actually changes hands off-platform; an approved one has been
/// through the confirm endpoint and must already be paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AcceptancePlan {
    confirm_payment: bool,
}

fn plan_acceptance(
    status: InvestmentStatus,
    payment_confirmed: bool,
) -> Result<AcceptancePlan, ApiError> {
    if !status.acceptable() {
        return Err(ApiError::bad_request(format!("Cannot accept a {status} investment")));
    }
    if payment_confirmed {
        Ok(AcceptancePlan { confirm_payment: false })
    } else if status == InvestmentStatus::Pending {
        Ok(AcceptancePlan { confirm_payment: true })
    } else {
        Err(ApiError::bad_request("Payment must be confirmed before acceptance"))
    }
}

/// Pipeline update that folds a completed investment into a campaign.
/// Progress and the completed-status flip are computed from the
/// post-increment total on the server, so concurrent acceptances cannot
/// leave progressPercentage behind currentAmount.
fn campaign_funding_pipeline(amount: f64) -> Vec<Document> {
    let new_amount = doc! { "$add": ["$currentAmount", amount] };
    vec![doc! {
        "$set": {
            "currentAmount": new_amount.clone(),
            "completedInvestmentsCount": { "$add": ["$completedInvestmentsCount", 1] },
            "completedInvestmentsAmount": { "$add": ["$completedInvestmentsAmount", amount] },
            "progressPercentage": {
                "$cond": [
                    { "$gt": ["$fundingGoal", 0] },
                    { "$multiply": [{ "$divide": [new_amount.clone(), "$fundingGoal"] }, 100] },
                    0.0,
                ]
            },
            "status": {
                "$cond": [{ "$gte": [new_amount, "$fundingGoal"] }, "completed", "$status"]
            },
        }
    }]
}

/// Accept an investment: a pending one is approved and paid on the way,
/// and acceptance completes it, adding the amount to the campaign's
/// funding in the same transaction.
pub(crate) async fn accept_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AcceptRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let investment_id = ObjectId::parse_str(&id)?;
    let investment = find_investment(&state, investment_id).await?;
    owned_campaign(&state, &u, investment.campaign_id).await?;
    let plan = plan_acceptance(investment.status, investment.payment)?;

    let now = BsonDateTime::now();
    let mut set = doc! {
        "status": "completed",
        "countedInFunding": true,
        "acceptedAt": now,
        "completedAt": now,
        "completionNotes": req.notes.clone().unwrap_or_default(),
    };
    let mut filter = doc! {
        "_id": investment_id,
        "status": { "$in": ["pending", "approved"] },
    };
    if plan.confirm_payment {
        let details = PaymentDetails {
            receipt_number: format!("RCPT-{}", Uuid::new_v4().simple()),
            confirmed_by: u.user_id,
            confirmed_at: now,
            payment_mode: None,
            notes: None,
        };
        set.insert("payment", true);
        set.insert("paymentDetails", to_bson(&details).map_err(anyhow::Error::from)?);
    } else {
        filter.insert("payment", true);
    }

    let mut session = begin_txn(&state).await?;
    let result = async {
        let updated = state
            .investments()
            .update_one(filter, doc! { "$set": set })
            .session(&mut session)
            .await?;
        if updated.matched_count == 0 {
            return Err(ApiError::bad_request("Investment is no longer acceptable"));
        }
        state
            .campaigns()
            .update_one(
                doc! { "_id": investment.campaign_id },
                campaign_funding_pipeline(investment.amount),
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

    // Re-read for the response; concurrent acceptances may already have
    // moved the total further.
    let campaign = find_campaign(&state, investment.campaign_id).await?;

    notify_investment(&state, investment.user_id, investment_id, "completed", "accepted").await;
    tracing::info!(investment_id = %investment_id, amount = investment.amount, "investment accepted");
    Ok(Json(serde_json::json!({
        "id": investment_id.to_hex(),
        "status": InvestmentStatus::Completed,
        "campaignProgress": campaign.progress_percentage,
    })))
}

pub(crate) async fn reject_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = require_role(&state, &headers, Role::Seller).await?;
    let investment_id = ObjectId::parse_str(&id)?;
    let investment = find_investment(&state, investment_id).await?;
    owned_campaign(&state, &u, investment.campaign_id).await?;
    if !investment.status.can_transition_to(InvestmentStatus::Rejected) {
        return Err(ApiError::bad_request(format!(
            "Cannot reject a {} investment",
            investment.status
        )));
    }

    let reason = req.reason.unwrap_or_else(|| "Rejected by campaign owner".to_string());
    let updated = state
        .investments()
        .update_one(
            doc! { "_id": investment_id, "status": { "$in": ["pending", "approved"] } },
            doc! { "$set": {
                "status": "rejected",
                "rejectedAt": BsonDateTime::now(),
                "rejectionReason": &reason,
            } },
        )
        .await?;
    if updated.matched_count == 0 {
        return Err(ApiError::bad_request("Investment is no longer rejectable"));
    }

    notify_investment(&state, investment.user_id, investment_id, "rejected", "rejected").await;
    Ok(Json(serde_json::json!({
        "id": investment_id.to_hex(),
        "status": InvestmentStatus::Rejected,
    })))
}

pub(crate) async fn get_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let investment = find_investment(&state, ObjectId::parse_str(&id)?).await?;
    if investment.user_id != u.user_id && !u.is_admin() {
        let campaign = find_campaign(&state, investment.campaign_id).await?;
        if campaign.seller_id != u.user_id {
            return Err(ApiError::forbidden("Not a participant in this investment"));
        }
    }
    Ok(Json(investment_json(&investment)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvestmentStatus::*;

    #[test]
    fn accepting_a_pending_investment_confirms_payment_on_the_way() {
        // A freshly placed investment is pending and unpaid; accepting
        // it must still reach completed.
        let plan = plan_acceptance(Pending, false).unwrap();
        assert!(plan.confirm_payment);

        let plan = plan_acceptance(Pending, true).unwrap();
        assert!(!plan.confirm_payment);
    }

    #[test]
    fn approved_investments_need_a_confirmed_payment() {
        assert!(plan_acceptance(Approved, false).is_err());
        assert!(!plan_acceptance(Approved, true).unwrap().confirm_payment);
    }

    #[test]
    fn finished_investments_cannot_be_accepted() {
        assert!(plan_acceptance(Completed, true).is_err());
        assert!(plan_acceptance(Rejected, true).is_err());
        assert!(plan_acceptance(Accepted, true).is_err());
    }

    #[test]
    fn funding_pipeline_recomputes_progress_from_the_incremented_total() {
        let pipeline = campaign_funding_pipeline(250.0);
        let set = pipeline[0].get_document("$set").unwrap();

        // Progress divides the post-increment total by the goal on the
        // server rather than writing a value computed from a stale read.
        let progress = set.get_document("progressPercentage").unwrap();
        let branches = progress.get_array("$cond").unwrap();
        assert!(branches[1].to_string().contains("$currentAmount"));
        assert!(branches[1].to_string().contains("$fundingGoal"));

        let status = set.get_document("status").unwrap();
        assert!(status.get_array("$cond").is_ok());
    }
}
