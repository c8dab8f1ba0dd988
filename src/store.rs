//! Index bootstrap and the shared stock-mutation primitives.
//!
//! Stock moves through guarded updates: every decrement filters on
//! `stock >= qty`, so the `stock >= 0` invariant holds even when two
//! requests race on the same product. Multi-document flows additionally
//! run inside a client session transaction.

use anyhow::Result;
use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use mongodb::options::IndexOptions;
use mongodb::{ClientSession, IndexModel};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) async fn ensure_indexes(state: &AppState) -> Result<()> {
    let unique = IndexOptions::builder().unique(true).build();

    state
        .users()
        .create_index(
            IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(unique.clone())
                .build(),
        )
        .await?;

    for keys in [
        doc! { "sellerId": 1 },
        doc! { "category": 1 },
        doc! { "isActive": 1, "stock": 1 },
    ] {
        state
            .products()
            .create_index(IndexModel::builder().keys(keys).build())
            .await?;
    }

    for keys in [doc! { "userId": 1 }, doc! { "status": 1 }] {
        state
            .orders()
            .create_index(IndexModel::builder().keys(keys).build())
            .await?;
    }

    for keys in [
        doc! { "sellerFrom": 1, "status": 1 },
        doc! { "sellerTo": 1, "status": 1 },
        doc! { "createdAt": -1 },
    ] {
        state
            .trades()
            .create_index(IndexModel::builder().keys(keys).build())
            .await?;
    }

    for keys in [doc! { "campaignId": 1, "status": 1 }, doc! { "userId": 1 }] {
        state
            .investments()
            .create_index(IndexModel::builder().keys(keys).build())
            .await?;
    }

    state
        .campaign_questions()
        .create_index(
            IndexModel::builder()
                .keys(doc! { "campaignId": 1, "createdAt": -1 })
                .build(),
        )
        .await?;

    state
        .shipments()
        .create_index(
            IndexModel::builder()
                .keys(doc! { "orderId": 1 })
                .options(unique.clone())
                .build(),
        )
        .await?;
    state
        .shipments()
        .create_index(
            IndexModel::builder()
                .keys(doc! { "trackingNumber": 1 })
                .options(unique)
                .build(),
        )
        .await?;

    for keys in [doc! { "recipient": 1, "read": 1 }, doc! { "createdAt": -1 }] {
        state
            .notifications()
            .create_index(IndexModel::builder().keys(keys).build())
            .await?;
    }

    Ok(())
}

/// Pipeline update that moves stock by `delta` and keeps `isActive`
/// aligned with the resulting quantity.
fn stock_update_pipeline(delta: i64) -> Vec<mongodb::bson::Document> {
    vec![doc! {
        "$set": {
            "stock": { "$add": ["$stock", delta] },
            "isActive": { "$gt": [{ "$add": ["$stock", delta] }, 0] },
        }
    }]
}

/// Deduct `qty` from a product's stock, failing with 400 when not enough
/// is available. Must run inside the caller's transaction.
pub(crate) async fn deduct_stock(
    state: &AppState,
    session: &mut ClientSession,
    product_id: ObjectId,
    qty: i64,
) -> Result<(), ApiError> {
    if qty <= 0 {
        return Err(ApiError::bad_request("Quantity must be positive"));
    }
    let result = state
        .products()
        .update_one(
            doc! { "_id": product_id, "stock": { "$gte": qty } },
            stock_update_pipeline(-qty),
        )
        .session(&mut *session)
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::bad_request("Not enough stock for product"));
    }
    Ok(())
}

/// Return `qty` to a product's stock (order rejection / cancellation,
/// cart shrink). Missing products are ignored: restoring stock for a
/// since-deleted product is not an error.
pub(crate) async fn restore_stock(
    state: &AppState,
    session: &mut ClientSession,
    product_id: ObjectId,
    qty: i64,
) -> Result<(), ApiError> {
    if qty <= 0 {
        return Ok(());
    }
    state
        .products()
        .update_one(doc! { "_id": product_id }, stock_update_pipeline(qty))
        .session(&mut *session)
        .await?;
    Ok(())
}

/// Start a session with an open transaction.
pub(crate) async fn begin_txn(state: &AppState) -> Result<ClientSession, ApiError> {
    let mut session = state.client.start_session().await?;
    session.start_transaction().await?;
    Ok(session)
}

/// Commit, surfacing commit failures as 500s.
pub(crate) async fn commit_txn(mut session: ClientSession) -> Result<(), ApiError> {
    session.commit_transaction().await?;
    Ok(())
}

/// Abort without masking the original error.
pub(crate) async fn abort_txn(mut session: ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        tracing::warn!(error = %e, "transaction abort failed");
    }
}
