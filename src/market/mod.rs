//! Market Store (C1): low-latency hot store of per-instrument live state.

mod store;

pub use store::{DepthLevel, MarketStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{symbol, exchange, kind}` — canonical key is `symbol` uppercased with
/// separators removed. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: String,
    pub kind: InstrumentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Index,
    Future,
    Option,
    Spot,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>, kind: InstrumentKind) -> Self {
        let symbol = symbol.into();
        let canonical: String = symbol
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_uppercase();
        Self {
            symbol: canonical,
            exchange: exchange.into(),
            kind,
        }
    }

    pub fn key(&self) -> &str {
        &self.symbol
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: Instrument,
    pub timestamp: DateTime<Utc>,
    pub last_price: f64,
    pub volume: Option<f64>,
    pub bid_depth: Vec<DepthLevel>,
    pub ask_depth: Vec<DepthLevel>,
    pub bid_qty_total: Option<f64>,
    pub ask_qty_total: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
}

impl Timeframe {
    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3600,
        }
    }

    /// `floor(timestamp / timeframe) * timeframe` (§4.3).
    pub fn align(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.seconds();
        let ts = at.timestamp();
        let aligned = (ts.div_euclid(secs)) * secs;
        DateTime::from_timestamp(aligned, 0).unwrap_or(at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OHLCBar {
    pub instrument: Instrument,
    pub timeframe: Timeframe,
    pub start_at: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OHLCBar {
    pub fn open_new(instrument: Instrument, timeframe: Timeframe, start_at: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self {
            instrument,
            timeframe,
            start_at,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    pub fn update(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionStrikeRow {
    pub ce_ltp: f64,
    pub ce_oi: f64,
    pub ce_volume: f64,
    pub pe_ltp: f64,
    pub pe_oi: f64,
    pub pe_volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsChainSnapshot {
    pub instrument: Instrument,
    pub at: DateTime<Utc>,
    pub futures_price: f64,
    pub strikes: std::collections::BTreeMap<i64, OptionStrikeRow>,
    pub expiry: DateTime<Utc>,
}
