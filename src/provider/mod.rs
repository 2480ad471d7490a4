//! Provider Adapter (C2): unified polymorphic source of quotes/depth/history.

pub mod factory;
pub mod live;
pub mod mock;
pub mod replay;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use factory::select_provider;
pub use live::LiveProvider;
pub use mock::MockProvider;
pub use replay::HistoricalReplayProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub at: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub name: String,
    pub is_live: bool,
    pub supports_orders: bool,
}

/// Capability set a provider may offer (§4.2). `place_order` is only
/// implemented by live brokers; the default returns `BrokerRejection`.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn quote(&self, symbols: &[String]) -> anyhow::Result<HashMap<String, Quote>>;

    async fn historical(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval_secs: i64,
    ) -> anyhow::Result<Vec<Candle>>;

    async fn place_order(&self, _order: OrderRequest) -> anyhow::Result<String> {
        anyhow::bail!("this provider does not support live order placement")
    }

    fn profile(&self) -> ProviderProfile;
}
