//! Fire-and-forget notification writes. A failed insert is logged and
//! swallowed: a missing notification must never fail the request that
//! produced it.

use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};

use crate::models::Notification;
use crate::state::AppState;

pub(crate) async fn notify(
    state: &AppState,
    recipient: ObjectId,
    kind: &str,
    title: &str,
    message: &str,
    data: Document,
) {
    let n = Notification {
        id: None,
        recipient,
        kind: kind.to_string(),
        title: title.to_string(),
        message: message.to_string(),
        data,
        read: false,
        created_at: BsonDateTime::now(),
    };
    if let Err(e) = state.notifications().insert_one(&n).await {
        tracing::warn!(recipient = %recipient, kind, error = %e, "notification insert failed");
    }
}

pub(crate) async fn notify_order_status(
    state: &AppState,
    recipient: ObjectId,
    order_id: ObjectId,
    status: &str,
    kind: &str,
    message: String,
) {
    notify(
        state,
        recipient,
        kind,
        "Order Update",
        &message,
        doc! { "orderId": order_id, "status": status },
    )
    .await;
}

pub(crate) async fn notify_trade(
    state: &AppState,
    recipient: ObjectId,
    trade_id: ObjectId,
    status: &str,
    action: &str,
) {
    notify(
        state,
        recipient,
        "TRADE_UPDATE",
        "Trade Update",
        &format!("Your trade has been {action}"),
        doc! { "tradeId": trade_id, "status": status },
    )
    .await;
}

pub(crate) async fn notify_investment(
    state: &AppState,
    recipient: ObjectId,
    investment_id: ObjectId,
    status: &str,
    action: &str,
) {
    notify(
        state,
        recipient,
        "INVESTMENT_UPDATE",
        "Investment Update",
        &format!("Your investment has been {action}"),
        doc! { "investmentId": investment_id, "status": status },
    )
    .await;
}
