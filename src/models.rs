//! Document types stored in MongoDB, plus the pure lifecycle rules
//! (status transition tables, cancellation window, fairness metrics)
//! that the handlers enforce.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};

// ===== Users =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    Buyer,
    Seller,
    Investor,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
            Role::Investor => "investor",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

impl Role {
    /// Self-service role upgrades start from `buyer`; anything else needs
    /// an admin. Admin is never reachable through an application.
    pub(crate) fn can_upgrade_to(self, target: Role) -> bool {
        self == Role::Buyer && matches!(target, Role::Seller | Role::Investor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CartEntry {
    pub(crate) quantity: i64,
    pub(crate) name: String,
    pub(crate) price: f64,
    pub(crate) image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SellerApplication {
    pub(crate) business_name: String,
    pub(crate) province: String,
    pub(crate) city: String,
    pub(crate) farm_location: String,
    pub(crate) contact_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InvestorApplication {
    pub(crate) investment_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) company_name: Option<String>,
    pub(crate) contact_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) name: String,
    pub(crate) email: String,
    pub(crate) password_hash: String,
    pub(crate) role: Role,
    /// productId (hex) -> cart line snapshot. Stock is taken when a line
    /// is added, so the cart and product stock must move together.
    #[serde(default)]
    pub(crate) cart: HashMap<String, CartEntry>,
    #[serde(default)]
    pub(crate) investments: Vec<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) seller_application: Option<SellerApplication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) investor_application: Option<InvestorApplication>,
    pub(crate) created_at: BsonDateTime,
}

// ===== Products =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ProductCategory {
    Vegetables,
    Fruits,
    Grains,
    #[serde(rename = "Root Crops")]
    RootCrops,
    Herbs,
    Others,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Freshness {
    Fresh,
    #[serde(rename = "Day-old")]
    DayOld,
    Stored,
    Processed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Unit {
    Kg,
    G,
    Pc,
    Bundle,
    Pack,
    Lbs,
    Oz,
}

/// Back-link carried by products minted when a trade completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProductOrigin {
    pub(crate) trade_id: ObjectId,
    pub(crate) original_product_id: ObjectId,
    pub(crate) original_seller_id: ObjectId,
    pub(crate) acquired_at: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TradeHistoryEntry {
    pub(crate) trade_id: ObjectId,
    pub(crate) traded_from: ObjectId,
    pub(crate) traded_to: ObjectId,
    pub(crate) quantity: i64,
    pub(crate) date: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Product {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) price: f64,
    pub(crate) images: Vec<String>,
    pub(crate) category: ProductCategory,
    #[serde(default = "default_freshness")]
    pub(crate) freshness: Freshness,
    pub(crate) unit_of_measurement: Unit,
    pub(crate) stock: i64,
    #[serde(default)]
    pub(crate) available_for_trade: bool,
    /// Kept in step with stock: a product with zero stock is inactive.
    #[serde(default = "default_true")]
    pub(crate) is_active: bool,
    pub(crate) seller_id: ObjectId,
    #[serde(default)]
    pub(crate) trade_history: Vec<TradeHistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) origin: Option<ProductOrigin>,
    pub(crate) created_at: BsonDateTime,
}

fn default_freshness() -> Freshness {
    Freshness::Fresh
}

fn default_true() -> bool {
    true
}

// ===== Orders =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum OrderStatus {
    #[serde(rename = "Pending Confirmation")]
    PendingConfirmation,
    Confirmed,
    Rejected,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
    Refunded,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::PendingConfirmation => "Pending Confirmation",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Rejected => "Rejected",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Returned => "Returned",
            OrderStatus::Refunded => "Refunded",
        };
        f.write_str(s)
    }
}

impl OrderStatus {
    pub(crate) fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (PendingConfirmation, Confirmed)
                | (PendingConfirmation, Rejected)
                | (PendingConfirmation, Cancelled)
                | (Confirmed, Processing)
                | (Confirmed, Cancelled)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Delivered, Returned)
                | (Delivered, Refunded)
        )
    }

    /// Buyer cancellation is only possible before anything ships.
    pub(crate) fn cancellable_by_buyer(self) -> bool {
        matches!(self, OrderStatus::PendingConfirmation | OrderStatus::Confirmed)
    }
}

/// Outcome of checking an order against the cancellation window.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CancellationCheck {
    pub(crate) can_cancel: bool,
    pub(crate) hours_passed: i64,
    pub(crate) hours_remaining: f64,
}

pub(crate) fn check_cancellation_window(
    placed_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window_hours: i64,
) -> CancellationCheck {
    let elapsed_secs = (now - placed_at).num_seconds().max(0);
    let hours_since = elapsed_secs as f64 / 3600.0;
    let limit = window_hours as f64;
    CancellationCheck {
        can_cancel: hours_since <= limit,
        hours_passed: hours_since.floor() as i64,
        hours_remaining: (limit - hours_since).max(0.0),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrderItem {
    pub(crate) product_id: ObjectId,
    pub(crate) seller_id: ObjectId,
    pub(crate) quantity: i64,
    // Snapshotted at order time; later product edits must not change it.
    pub(crate) name: String,
    pub(crate) price: f64,
    pub(crate) image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrackingEntry {
    pub(crate) status: OrderStatus,
    pub(crate) timestamp: BsonDateTime,
    pub(crate) note: String,
    pub(crate) updated_by: ObjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CancellationDetails {
    pub(crate) cancelled_at: BsonDateTime,
    pub(crate) cancelled_by: ObjectId,
    pub(crate) hours_since_order: i64,
    pub(crate) reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Order {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) user_id: ObjectId,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) amount: f64,
    pub(crate) address: Document,
    pub(crate) payment_method: String,
    #[serde(default)]
    pub(crate) payment: bool,
    pub(crate) status: OrderStatus,
    #[serde(default)]
    pub(crate) tracking_history: Vec<TrackingEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) cancellation: Option<CancellationDetails>,
    pub(crate) placed_at: BsonDateTime,
}

// ===== Trades =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TradeStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Accepted => "accepted",
            TradeStatus::Rejected => "rejected",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl TradeStatus {
    pub(crate) fn can_transition_to(self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Accepted, Completed)
                | (Accepted, Cancelled)
        )
    }
}

/// Informational fairness metrics computed when a trade is proposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TradeMetrics {
    pub(crate) offered_value: f64,
    pub(crate) requested_value: f64,
    pub(crate) value_ratio: f64,
}

impl TradeMetrics {
    pub(crate) fn compute(price_from: f64, qty_from: i64, price_to: f64, qty_to: i64) -> Self {
        let offered_value = price_from * qty_from as f64;
        let requested_value = price_to * qty_to as f64;
        let value_ratio = if requested_value > 0.0 {
            (offered_value / requested_value * 100.0).round() / 100.0
        } else {
            0.0
        };
        TradeMetrics { offered_value, requested_value, value_ratio }
    }
}

/// Structured audit record, replacing free-form notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TradeAuditEntry {
    pub(crate) event: String,
    /// Absent for system-initiated events such as cascade cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) actor_id: Option<ObjectId>,
    pub(crate) timestamp: BsonDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) quantity_from: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) quantity_to: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) stock_from_before: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) stock_from_after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) stock_to_before: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) stock_to_after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Trade {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) seller_from: ObjectId,
    pub(crate) seller_to: ObjectId,
    pub(crate) product_from: ObjectId,
    pub(crate) product_to: ObjectId,
    pub(crate) quantity_from: i64,
    pub(crate) quantity_to: i64,
    pub(crate) status: TradeStatus,
    pub(crate) metrics: TradeMetrics,
    #[serde(default)]
    pub(crate) audit: Vec<TradeAuditEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) accepted_at: Option<BsonDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) completed_at: Option<BsonDateTime>,
    pub(crate) created_at: BsonDateTime,
}

// ===== Investments & campaigns =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum InvestmentStatus {
    Pending,
    Approved,
    Accepted,
    Completed,
    Rejected,
}

impl fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvestmentStatus::Pending => "pending",
            InvestmentStatus::Approved => "approved",
            InvestmentStatus::Accepted => "accepted",
            InvestmentStatus::Completed => "completed",
            InvestmentStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl InvestmentStatus {
    pub(crate) fn can_transition_to(self, next: InvestmentStatus) -> bool {
        use InvestmentStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Accepted)
                | (Approved, Rejected)
                | (Accepted, Completed)
        )
    }

    /// Acceptance is allowed from pending (auto-approving on the way)
    /// or approved.
    pub(crate) fn acceptable(self) -> bool {
        matches!(self, InvestmentStatus::Pending | InvestmentStatus::Approved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PaymentDetails {
    pub(crate) receipt_number: String,
    pub(crate) confirmed_by: ObjectId,
    pub(crate) confirmed_at: BsonDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) payment_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Investment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) user_id: ObjectId,
    pub(crate) campaign_id: ObjectId,
    pub(crate) amount: f64,
    pub(crate) status: InvestmentStatus,
    pub(crate) payment_method: String,
    #[serde(default)]
    pub(crate) payment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) payment_details: Option<PaymentDetails>,
    #[serde(default)]
    pub(crate) counted_in_funding: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) accepted_at: Option<BsonDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) completed_at: Option<BsonDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) completion_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) rejected_at: Option<BsonDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) rejection_reason: Option<String>,
    pub(crate) created_at: BsonDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum CampaignStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum CampaignCategory {
    Agriculture,
    Livestock,
    Aquaculture,
    #[serde(rename = "Agri-tech")]
    AgriTech,
    Sustainable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CampaignVideo {
    pub(crate) url: String,
    pub(crate) title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) description: Option<String>,
    pub(crate) uploaded_at: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Campaign {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) category: CampaignCategory,
    pub(crate) funding_goal: f64,
    #[serde(default)]
    pub(crate) current_amount: f64,
    #[serde(default)]
    pub(crate) progress_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) minimum_investment: Option<f64>,
    pub(crate) expected_return: f64,
    /// Months.
    pub(crate) duration: i32,
    #[serde(default)]
    pub(crate) investors_count: i64,
    #[serde(default)]
    pub(crate) completed_investments_count: i64,
    #[serde(default)]
    pub(crate) completed_investments_amount: f64,
    pub(crate) status: CampaignStatus,
    pub(crate) seller_id: ObjectId,
    #[serde(default)]
    pub(crate) videos: Vec<CampaignVideo>,
    #[serde(default)]
    pub(crate) verified: bool,
    pub(crate) start_date: BsonDateTime,
    pub(crate) end_date: BsonDateTime,
    pub(crate) created_at: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuestionReply {
    pub(crate) text: String,
    pub(crate) user_id: ObjectId,
    pub(crate) created_at: BsonDateTime,
}

/// Public Q&A thread attached to a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CampaignQuestion {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) campaign_id: ObjectId,
    pub(crate) user_id: ObjectId,
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) replies: Vec<QuestionReply>,
    pub(crate) created_at: BsonDateTime,
    pub(crate) updated_at: BsonDateTime,
}

// ===== Shipping =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ShipmentStatus {
    Processing,
    Shipped,
    Delivered,
}

impl ShipmentStatus {
    pub(crate) fn can_transition_to(self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        matches!((self, next), (Processing, Shipped) | (Shipped, Delivered))
    }

    pub(crate) fn as_order_status(self) -> OrderStatus {
        match self {
            ShipmentStatus::Processing => OrderStatus::Processing,
            ShipmentStatus::Shipped => OrderStatus::Shipped,
            ShipmentStatus::Delivered => OrderStatus::Delivered,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Courier {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) name: String,
    pub(crate) plate_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) contact_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) address: Option<String>,
    #[serde(default = "default_true")]
    pub(crate) active: bool,
    pub(crate) created_at: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LocationEntry {
    pub(crate) status: ShipmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) note: Option<String>,
    pub(crate) timestamp: BsonDateTime,
}

/// The single authoritative record of who is delivering an order and
/// where it stands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Shipment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) order_id: ObjectId,
    pub(crate) user_id: ObjectId,
    pub(crate) courier_id: ObjectId,
    pub(crate) status: ShipmentStatus,
    pub(crate) tracking_number: String,
    pub(crate) shipping_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) estimated_delivery: Option<BsonDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) instructions: Option<String>,
    #[serde(default)]
    pub(crate) location_history: Vec<LocationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) delivered_at: Option<BsonDateTime>,
    pub(crate) created_at: BsonDateTime,
}

// ===== Notifications =====

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Notification {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<ObjectId>,
    pub(crate) recipient: ObjectId,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) title: String,
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) data: Document,
    #[serde(default)]
    pub(crate) read: bool,
    pub(crate) created_at: BsonDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn order_happy_path_transitions() {
        use OrderStatus::*;
        assert!(PendingConfirmation.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Refunded));
    }

    #[test]
    fn order_rejects_out_of_order_transitions() {
        use OrderStatus::*;
        assert!(!PendingConfirmation.can_transition_to(Shipped));
        assert!(!Rejected.can_transition_to(Confirmed));
        assert!(!Processing.can_transition_to(Cancelled));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Confirmed));
    }

    #[test]
    fn buyer_can_only_cancel_before_processing() {
        assert!(OrderStatus::PendingConfirmation.cancellable_by_buyer());
        assert!(OrderStatus::Confirmed.cancellable_by_buyer());
        assert!(!OrderStatus::Processing.cancellable_by_buyer());
        assert!(!OrderStatus::Shipped.cancellable_by_buyer());
        assert!(!OrderStatus::Delivered.cancellable_by_buyer());
    }

    #[test]
    fn cancellation_window_boundaries() {
        let placed = Utc::now();
        let inside = check_cancellation_window(placed, placed + Duration::minutes(90), 2);
        assert!(inside.can_cancel);
        assert_eq!(inside.hours_passed, 1);

        let expired = check_cancellation_window(placed, placed + Duration::minutes(121), 2);
        assert!(!expired.can_cancel);
        assert_eq!(expired.hours_passed, 2);
        assert_eq!(expired.hours_remaining, 0.0);
    }

    #[test]
    fn trade_lifecycle_is_strict() {
        use TradeStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(Completed));
        // Completing a pending trade must be rejected.
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Rejected.can_transition_to(Accepted));
        assert!(!Completed.can_transition_to(Cancelled));
        // Cascade cancellation reaches accepted trades.
        assert!(Accepted.can_transition_to(Cancelled));
    }

    #[test]
    fn investment_lifecycle() {
        use InvestmentStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Rejected));
        assert!(!Completed.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(Pending.acceptable());
        assert!(Approved.acceptable());
        assert!(!Completed.acceptable());
    }

    #[test]
    fn fairness_metrics_round_to_cents() {
        let m = TradeMetrics::compute(10.0, 3, 7.0, 4);
        assert_eq!(m.offered_value, 30.0);
        assert_eq!(m.requested_value, 28.0);
        assert_eq!(m.value_ratio, 1.07);

        let zero = TradeMetrics::compute(10.0, 3, 0.0, 4);
        assert_eq!(zero.value_ratio, 0.0);
    }

    #[test]
    fn shipment_status_maps_onto_order_status() {
        assert!(ShipmentStatus::Processing.can_transition_to(ShipmentStatus::Shipped));
        assert!(!ShipmentStatus::Processing.can_transition_to(ShipmentStatus::Delivered));
        assert_eq!(
            ShipmentStatus::Shipped.as_order_status(),
            OrderStatus::Shipped
        );
    }

    #[test]
    fn role_upgrades() {
        assert!(Role::Buyer.can_upgrade_to(Role::Seller));
        assert!(Role::Buyer.can_upgrade_to(Role::Investor));
        assert!(!Role::Buyer.can_upgrade_to(Role::Admin));
        assert!(!Role::Seller.can_upgrade_to(Role::Investor));
    }

    #[test]
    fn system_audit_entries_carry_no_actor() {
        let entry = TradeAuditEntry {
            event: "cancelled".to_string(),
            actor_id: None,
            timestamp: BsonDateTime::now(),
            quantity_from: None,
            quantity_to: None,
            stock_from_before: None,
            stock_from_after: None,
            stock_to_before: None,
            stock_to_after: None,
            note: Some("Trade cancelled because the product was deleted".to_string()),
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert!(v.get("actorId").is_none());
        assert_eq!(v["event"], "cancelled");

        let user_entry = TradeAuditEntry {
            actor_id: Some(ObjectId::new()),
            ..entry
        };
        assert!(serde_json::to_value(&user_entry).unwrap().get("actorId").is_some());
    }

    #[test]
    fn status_strings_match_stored_values() {
        let s = serde_json::to_string(&OrderStatus::PendingConfirmation).unwrap();
        assert_eq!(s, "\"Pending Confirmation\"");
        let t = serde_json::to_string(&TradeStatus::Accepted).unwrap();
        assert_eq!(t, "\"accepted\"");
        let c = serde_json::to_string(&ProductCategory::RootCrops).unwrap();
        assert_eq!(c, "\"Root Crops\"");
    }
}
