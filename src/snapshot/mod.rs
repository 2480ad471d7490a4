//! Snapshot Builder (C10): compact per-instrument JSON snapshot for external
//! dashboards, cached with a 60 s TTL (§4.10), grounded on the original
//! `build_snapshot()`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::agents::output::ExecutionOutput;
use crate::broker::PaperBroker;
use crate::market::{Instrument, MarketStore};

const SNAPSHOT_TTL: Duration = Duration::from_secs(60);
const SPREAD_IMBALANCE_DEPTH: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct DepthSummary {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread: Option<f64>,
    pub imbalance: Option<f64>,
    pub large_orders: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionsSummary {
    pub available: bool,
    pub futures_price: Option<f64>,
    pub atm_strike: Option<i64>,
    pub pcr: Option<f64>,
    pub total_ce_oi: f64,
    pub total_pe_oi: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionSnapshot {
    pub instrument: String,
    pub at: DateTime<Utc>,
    pub ltp: Option<f64>,
    pub depth: DepthSummary,
    pub options: OptionsSummary,
    pub latest_signal: Option<String>,
    pub open_positions_count: usize,
    pub recent_pnl: f64,
}

struct Cached {
    snapshot: DecisionSnapshot,
    built_at: Instant,
}

/// Large-order threshold relative to a level's neighbors — a level whose
/// quantity is at least this multiple of the mean is flagged.
const LARGE_ORDER_MULTIPLE: f64 = 3.0;

pub struct SnapshotBuilder {
    market: Arc<MarketStore>,
    broker: Arc<PaperBroker>,
    /// Strike spacing for ATM selection, a field on the instrument's
    /// kind-specific metadata rather than a global constant (§9 open
    /// question 3). Defaults to 100 when the instrument carries none.
    strike_step: i64,
    cache: Mutex<Option<Cached>>,
}

const DEFAULT_STRIKE_STEP: i64 = 100;

impl SnapshotBuilder {
    pub fn new(market: Arc<MarketStore>, broker: Arc<PaperBroker>, strike_step: Option<i64>) -> Self {
        Self {
            market,
            broker,
            strike_step: strike_step.unwrap_or(DEFAULT_STRIKE_STEP),
            cache: Mutex::new(None),
        }
    }

    pub fn build(&self, instrument: &Instrument, latest_execution: Option<&ExecutionOutput>) -> DecisionSnapshot {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.built_at.elapsed() < SNAPSHOT_TTL {
                    return cached.snapshot.clone();
                }
            }
        }

        let snapshot = self.build_fresh(instrument, latest_execution);
        *self.cache.lock() = Some(Cached { snapshot: snapshot.clone(), built_at: Instant::now() });
        snapshot
    }

    fn build_fresh(&self, instrument: &Instrument, latest_execution: Option<&ExecutionOutput>) -> DecisionSnapshot {
        let ltp = self.market.latest_price(instrument);
        let (bids, asks) = self.market.depth(instrument);

        let best_bid = bids.first().map(|l| l.price);
        let best_ask = asks.first().map(|l| l.price);
        let spread = match (best_bid, best_ask) {
            (Some(b), Some(a)) => Some(a - b),
            _ => None,
        };

        let bid_qty: f64 = bids.iter().take(SPREAD_IMBALANCE_DEPTH).map(|l| l.quantity).sum();
        let ask_qty: f64 = asks.iter().take(SPREAD_IMBALANCE_DEPTH).map(|l| l.quantity).sum();
        let imbalance = if bid_qty + ask_qty > 0.0 {
            Some((bid_qty - ask_qty) / (bid_qty + ask_qty))
        } else {
            None
        };

        let mean_qty = {
            let all: Vec<f64> = bids.iter().chain(asks.iter()).map(|l| l.quantity).collect();
            if all.is_empty() { 0.0 } else { all.iter().sum::<f64>() / all.len() as f64 }
        };
        let large_orders = mean_qty > 0.0
            && bids.iter().chain(asks.iter()).any(|l| l.quantity >= mean_qty * LARGE_ORDER_MULTIPLE);

        let options = match self.market.options_chain(instrument) {
            Some(chain) => {
                let total_ce_oi: f64 = chain.strikes.values().map(|s| s.ce_oi).sum();
                let total_pe_oi: f64 = chain.strikes.values().map(|s| s.pe_oi).sum();
                let pcr = if total_ce_oi > 0.0 { Some(total_pe_oi / total_ce_oi) } else { None };
                let step = self.strike_step.max(1);
                let atm_strike = ltp.map(|p| ((p / step as f64).round() as i64) * step);
                OptionsSummary {
                    available: true,
                    futures_price: Some(chain.futures_price),
                    atm_strike,
                    pcr,
                    total_ce_oi,
                    total_pe_oi,
                }
            }
            None => OptionsSummary { available: false, futures_price: None, atm_strike: None, pcr: None, total_ce_oi: 0.0, total_pe_oi: 0.0 },
        };

        let recent_pnl: f64 = self.broker.closed_positions().iter().rev().take(20).filter_map(|p| p.pnl).sum();

        DecisionSnapshot {
            instrument: instrument.symbol.clone(),
            at: Utc::now(),
            ltp,
            depth: DepthSummary { best_bid, best_ask, spread, imbalance, large_orders },
            options,
            latest_signal: latest_execution.map(|e| format!("{:?}", e.signal)),
            open_positions_count: self.broker.open_count(),
            recent_pnl,
        }
    }
}
