//! Public Q&A threads on campaigns. Anyone signed in can ask or reply;
//! a question can be removed by whoever asked it or by the campaign
//! owner.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, to_bson, DateTime as BsonDateTime};
use serde::Deserialize;

use crate::auth::auth_user;
use crate::campaigns::find_campaign;
use crate::error::ApiError;
use crate::models::{CampaignQuestion, QuestionReply};
use crate::notify::notify;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct QuestionText {
    text: String,
}

fn question_json(q: &CampaignQuestion) -> serde_json::Value {
    serde_json::json!({
        "id": q.id.map(|i| i.to_hex()),
        "campaignId": q.campaign_id.to_hex(),
        "userId": q.user_id.to_hex(),
        "text": q.text,
        "replies": q.replies.iter().map(|r| serde_json::json!({
            "text": r.text,
            "userId": r.user_id.to_hex(),
            "createdAt": r.created_at.to_chrono().to_rfc3339(),
        })).collect::<Vec<_>>(),
        "createdAt": q.created_at.to_chrono().to_rfc3339(),
        "updatedAt": q.updated_at.to_chrono().to_rfc3339(),
    })
}

async fn find_question(state: &AppState, id: ObjectId) -> Result<CampaignQuestion, ApiError> {
    state
        .campaign_questions()
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| ApiError::not_found("Question not found"))
}

pub(crate) async fn ask_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<QuestionText>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::bad_request("Question text is required"));
    }
    let campaign_id = ObjectId::parse_str(&id)?;
    let campaign = find_campaign(&state, campaign_id).await?;

    let now = BsonDateTime::now();
    let question = CampaignQuestion {
        id: None,
        campaign_id,
        user_id: u.user_id,
        text,
        replies: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    let inserted = state.campaign_questions().insert_one(&question).await?;
    let question_id = inserted.inserted_id.as_object_id();

    if campaign.seller_id != u.user_id {
        notify(
            &state,
            campaign.seller_id,
            "CAMPAIGN_QUESTION",
            "New Question",
            "Someone asked a question on your campaign",
            doc! { "campaignId": campaign_id },
        )
        .await;
    }
    Ok(Json(serde_json::json!({ "id": question_id.map(|i| i.to_hex()) })))
}

pub(crate) async fn list_questions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let campaign_id = ObjectId::parse_str(&id)?;
    let questions: Vec<CampaignQuestion> = state
        .campaign_questions()
        .find(doc! { "campaignId": campaign_id })
        .sort(doc! { "createdAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(Json(serde_json::json!({
        "questions": questions.iter().map(question_json).collect::<Vec<_>>(),
    })))
}

pub(crate) async fn reply_to_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<QuestionText>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::bad_request("Reply text is required"));
    }
    let question_id = ObjectId::parse_str(&id)?;
    let question = find_question(&state, question_id).await?;

    let now = BsonDateTime::now();
    let reply = QuestionReply { text, user_id: u.user_id, created_at: now };
    state
        .campaign_questions()
        .update_one(
            doc! { "_id": question_id },
            doc! {
                "$push": { "replies": to_bson(&reply).map_err(anyhow::Error::from)? },
                "$set": { "updatedAt": now },
            },
        )
        .await?;

    if question.user_id != u.user_id {
        notify(
            &state,
            question.user_id,
            "CAMPAIGN_QUESTION",
            "New Reply",
            "Your question received a reply",
            doc! { "campaignId": question.campaign_id, "questionId": question_id },
        )
        .await;
    }
    Ok(Json(serde_json::json!({ "id": question_id.to_hex(), "replies": question.replies.len() + 1 })))
}

/// Only the asker, the campaign owner, or an admin may remove a question.
fn may_delete(requester: ObjectId, asker: ObjectId, campaign_owner: ObjectId, admin: bool) -> bool {
    admin || requester == asker || requester == campaign_owner
}

pub(crate) async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let u = auth_user(&state, &headers).await?;
    let question_id = ObjectId::parse_str(&id)?;
    let question = find_question(&state, question_id).await?;
    let campaign = find_campaign(&state, question.campaign_id).await?;

    if !may_delete(u.user_id, question.user_id, campaign.seller_id, u.is_admin()) {
        return Err(ApiError::forbidden("Cannot delete someone else's question"));
    }

    state
        .campaign_questions()
        .delete_one(doc! { "_id": question_id })
        .await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_asker_owner_or_admin_may_delete() {
        let asker = ObjectId::new();
        let owner = ObjectId::new();
        let stranger = ObjectId::new();

        assert!(may_delete(asker, asker, owner, false));
        assert!(may_delete(owner, asker, owner, false));
        assert!(may_delete(stranger, asker, owner, true));
        assert!(!may_delete(stranger, asker, owner, false));
    }

    #[test]
    fn replies_round_trip_inside_the_question_document() {
        let now = BsonDateTime::now();
        let q = CampaignQuestion {
            id: None,
            campaign_id: ObjectId::new(),
            user_id: ObjectId::new(),
            text: "When does harvest start?".into(),
            replies: vec![QuestionReply {
                text: "Early September.".into(),
                user_id: ObjectId::new(),
                created_at: now,
            }],
            created_at: now,
            updated_at: now,
        };
        let doc = mongodb::bson::to_document(&q).unwrap();
        let replies = doc.get_array("replies").unwrap();
        assert_eq!(replies.len(), 1);
        let back: CampaignQuestion = mongodb::bson::from_document(doc).unwrap();
        assert_eq!(back.replies[0].text, "Early September.");
    }
}
