//! Historical Replay provider (§4.2, §4.3 mode 2): replays an ordered series
//! of candles as quotes, exposing a virtual clock so the Ingestion Pipeline
//! can write a virtual-time marker for downstream consumers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{Candle, Provider, ProviderProfile, Quote};

/// `speed > 0`: ticks are emitted at `real_time * speed`. `speed == 0.0`: as
/// fast as possible.
pub struct HistoricalReplayProvider {
    symbol: String,
    candles: Vec<Candle>,
    cursor: AtomicI64,
    speed: f64,
    virtual_now: RwLock<Option<DateTime<Utc>>>,
}

impl HistoricalReplayProvider {
    pub fn new(symbol: impl Into<String>, candles: Vec<Candle>, speed: f64) -> Self {
        Self {
            symbol: symbol.into(),
            candles,
            cursor: AtomicI64::new(0),
            speed,
            virtual_now: RwLock::new(None),
        }
    }

    /// Virtual clock position; `None` before the first advance.
    pub fn virtual_now(&self) -> Option<DateTime<Utc>> {
        *self.virtual_now.read()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.load(Ordering::Acquire) as usize >= self.candles.len()
    }

    /// Advance the virtual clock by one candle and return the synthesized
    /// quote for it, honoring `speed` by sleeping the scaled real-time delta
    /// between successive candles.
    pub async fn advance(&self) -> Option<Quote> {
        let idx = self.cursor.fetch_add(1, Ordering::AcqRel) as usize;
        let candle = self.candles.get(idx)?;

        if let Some(prev_at) = *self.virtual_now.read() {
            let delta = (candle.at - prev_at).num_milliseconds().max(0) as f64;
            if self.speed > 0.0 {
                let real_ms = (delta / self.speed) as u64;
                if real_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(real_ms)).await;
                }
            }
        }
        *self.virtual_now.write() = Some(candle.at);

        Some(Quote {
            symbol: self.symbol.clone(),
            price: candle.close,
            bid: candle.close,
            ask: candle.close,
            volume: candle.volume,
            at: candle.at,
        })
    }
}

#[async_trait]
impl Provider for HistoricalReplayProvider {
    async fn quote(&self, symbols: &[String]) -> anyhow::Result<HashMap<String, Quote>> {
        let mut out = HashMap::new();
        if let Some(q) = self.advance().await {
            out.insert(symbols.first().cloned().unwrap_or_else(|| self.symbol.clone()), q);
        }
        Ok(out)
    }

    async fn historical(
        &self,
        _symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        _interval_secs: i64,
    ) -> anyhow::Result<Vec<Candle>> {
        Ok(self
            .candles
            .iter()
            .filter(|c| c.at >= from && c.at < to)
            .cloned()
            .collect())
    }

    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            name: "historical_replay".to_string(),
            is_live: false,
            supports_orders: false,
        }
    }
}
