use std::sync::Arc;

use mongodb::{Client, Collection, Database};

use crate::config::AppConfig;
use crate::models::{
    Campaign, CampaignQuestion, Courier, Investment, Notification, Order, Product, Shipment,
    Trade, User,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) cfg: Arc<AppConfig>,
    /// Kept alongside `db` because multi-document transactions need a
    /// session started from the client.
    pub(crate) client: Client,
    pub(crate) db: Database,
}

impl AppState {
    pub(crate) fn new(cfg: Arc<AppConfig>, client: Client) -> Self {
        let db = client.database(&cfg.database.name);
        Self { cfg, client, db }
    }

    pub(crate) fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    pub(crate) fn products(&self) -> Collection<Product> {
        self.db.collection("products")
    }

    pub(crate) fn orders(&self) -> Collection<Order> {
        self.db.collection("orders")
    }

    pub(crate) fn trades(&self) -> Collection<Trade> {
        self.db.collection("trades")
    }

    pub(crate) fn investments(&self) -> Collection<Investment> {
        self.db.collection("investments")
    }

    pub(crate) fn campaigns(&self) -> Collection<Campaign> {
        self.db.collection("campaigns")
    }

    pub(crate) fn campaign_questions(&self) -> Collection<CampaignQuestion> {
        self.db.collection("campaignQuestions")
    }

    pub(crate) fn couriers(&self) -> Collection<Courier> {
        self.db.collection("couriers")
    }

    pub(crate) fn shipments(&self) -> Collection<Shipment> {
        self.db.collection("shipments")
    }

    pub(crate) fn notifications(&self) -> Collection<Notification> {
        self.db.collection("notifications")
    }
}
