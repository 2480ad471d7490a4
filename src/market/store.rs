//! In-memory hot store of per-instrument latest state (§4.1).
//!
//! Each instrument's latest price/tick is held behind an `ArcSwap` so readers
//! never block a writer and never observe a `latest_price` paired with a
//! strictly older `latest_ts` (the freshness contract) — the same pattern
//! the ingestion layer's orderbook cache uses for lock-free snapshot reads.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{Instrument, OHLCBar, OptionsChainSnapshot, Tick, Timeframe};

const TICK_RING_CAPACITY: usize = 1000;
const BAR_RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Latest price/tick pair, swapped atomically together so a reader can never
/// see a fresh price with a stale timestamp.
#[derive(Clone)]
struct LatestState {
    tick: Option<Tick>,
    latest_price: Option<f64>,
    latest_ts: Option<DateTime<Utc>>,
}

impl Default for LatestState {
    fn default() -> Self {
        Self {
            tick: None,
            latest_price: None,
            latest_ts: None,
        }
    }
}

struct InstrumentState {
    latest: ArcSwap<LatestState>,
    tick_ring: RwLock<VecDeque<Tick>>,
    bars: RwLock<HashMap<Timeframe, VecDeque<OHLCBar>>>,
    bid_depth: RwLock<Vec<DepthLevel>>,
    ask_depth: RwLock<Vec<DepthLevel>>,
    depth_at: ArcSwap<Option<DateTime<Utc>>>,
    options_chain: RwLock<Option<OptionsChainSnapshot>>,
}

impl Default for InstrumentState {
    fn default() -> Self {
        Self {
            latest: ArcSwap::from_pointee(LatestState::default()),
            tick_ring: RwLock::new(VecDeque::with_capacity(TICK_RING_CAPACITY)),
            bars: RwLock::new(HashMap::new()),
            bid_depth: RwLock::new(Vec::new()),
            ask_depth: RwLock::new(Vec::new()),
            depth_at: ArcSwap::from_pointee(None),
            options_chain: RwLock::new(None),
        }
    }
}

/// Callback invoked with each accepted tick, used by the Ingestion Pipeline
/// to drive OHLC aggregation (§4.1 "may trigger an OHLC update").
pub type TickCallback = Box<dyn Fn(&Tick) + Send + Sync>;

pub struct MarketStore {
    instruments: RwLock<HashMap<String, Arc<InstrumentState>>>,
    on_tick: RwLock<Vec<TickCallback>>,
}

impl Default for MarketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketStore {
    pub fn new() -> Self {
        Self {
            instruments: RwLock::new(HashMap::new()),
            on_tick: RwLock::new(Vec::new()),
        }
    }

    pub fn register_tick_callback(&self, cb: TickCallback) {
        self.on_tick.write().push(cb);
    }

    fn state_for(&self, instrument: &Instrument) -> Arc<InstrumentState> {
        if let Some(state) = self.instruments.read().get(instrument.key()) {
            return state.clone();
        }
        let mut guard = self.instruments.write();
        guard
            .entry(instrument.key().to_string())
            .or_insert_with(|| Arc::new(InstrumentState::default()))
            .clone()
    }

    /// O(1): updates `latest_tick`/`latest_price`/`latest_ts` atomically,
    /// appends to the bounded ring, and fires any registered OHLC callbacks.
    pub fn put_tick(&self, tick: Tick) {
        let state = self.state_for(&tick.instrument);

        state.latest.store(Arc::new(LatestState {
            tick: Some(tick.clone()),
            latest_price: Some(tick.last_price),
            latest_ts: Some(tick.timestamp),
        }));

        {
            let mut ring = state.tick_ring.write();
            if ring.len() >= TICK_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(tick.clone());
        }

        for cb in self.on_tick.read().iter() {
            cb(&tick);
        }
    }

    /// Keeps the latest `BAR_RING_CAPACITY` bars per (instrument, timeframe).
    pub fn put_bar(&self, bar: OHLCBar) {
        let state = self.state_for(&bar.instrument);
        let mut bars = state.bars.write();
        let ring = bars.entry(bar.timeframe).or_insert_with(VecDeque::new);
        if let Some(last) = ring.back_mut() {
            if last.start_at == bar.start_at {
                *last = bar;
                return;
            }
        }
        if ring.len() >= BAR_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(bar);
    }

    pub fn put_depth(&self, instrument: &Instrument, bid_levels: Vec<DepthLevel>, ask_levels: Vec<DepthLevel>, at: DateTime<Utc>) {
        let state = self.state_for(instrument);
        *state.bid_depth.write() = bid_levels;
        *state.ask_depth.write() = ask_levels;
        state.depth_at.store(Arc::new(Some(at)));
    }

    pub fn put_options_chain(&self, instrument: &Instrument, snapshot: OptionsChainSnapshot) {
        let state = self.state_for(instrument);
        *state.options_chain.write() = Some(snapshot);
    }

    pub fn latest_price(&self, instrument: &Instrument) -> Option<f64> {
        self.instruments
            .read()
            .get(instrument.key())
            .and_then(|s| s.latest.load().latest_price)
    }

    pub fn latest_tick(&self, instrument: &Instrument) -> Option<Tick> {
        self.instruments
            .read()
            .get(instrument.key())
            .and_then(|s| s.latest.load().tick.clone())
    }

    pub fn depth(&self, instrument: &Instrument) -> (Vec<DepthLevel>, Vec<DepthLevel>) {
        match self.instruments.read().get(instrument.key()) {
            Some(s) => (s.bid_depth.read().clone(), s.ask_depth.read().clone()),
            None => (Vec::new(), Vec::new()),
        }
    }

    pub fn options_chain(&self, instrument: &Instrument) -> Option<OptionsChainSnapshot> {
        self.instruments
            .read()
            .get(instrument.key())
            .and_then(|s| s.options_chain.read().clone())
    }

    /// Oldest-first, as required for indicator calculation (§4.1).
    pub fn recent_bars(&self, instrument: &Instrument, timeframe: Timeframe, limit: usize) -> Vec<OHLCBar> {
        let Some(state) = self.instruments.read().get(instrument.key()).cloned() else {
            return Vec::new();
        };
        let bars = state.bars.read();
        match bars.get(&timeframe) {
            Some(ring) => {
                let len = ring.len();
                let skip = len.saturating_sub(limit);
                ring.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Seconds since the latest tick, used by freshness checks (§4.6 step 3,
    /// §4.9 `data_feed_down`). `None` if no tick has ever arrived.
    pub fn age(&self, instrument: &Instrument) -> Option<f64> {
        self.age_at(instrument, Utc::now())
    }

    /// Age relative to an explicit "now", so the scheduler can evaluate
    /// staleness against virtual replay time (§9 open question) as well as
    /// wall-clock time.
    pub fn age_at(&self, instrument: &Instrument, now: DateTime<Utc>) -> Option<f64> {
        let ts = self
            .instruments
            .read()
            .get(instrument.key())?
            .latest
            .load()
            .latest_ts?;
        Some((now - ts).num_milliseconds() as f64 / 1000.0)
    }

    pub fn depth_age(&self, instrument: &Instrument) -> Option<f64> {
        let state = self.instruments.read().get(instrument.key())?.clone();
        let at = (*state.depth_at.load()).as_ref().copied()?;
        Some((Utc::now() - at).num_milliseconds() as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::InstrumentKind;

    fn tick(instrument: &Instrument, price: f64, ts: DateTime<Utc>) -> Tick {
        Tick {
            instrument: instrument.clone(),
            timestamp: ts,
            last_price: price,
            volume: Some(1.0),
            bid_depth: vec![],
            ask_depth: vec![],
            bid_qty_total: None,
            ask_qty_total: None,
        }
    }

    #[test]
    fn latest_price_and_ts_update_together() {
        let store = MarketStore::new();
        let instrument = Instrument::new("BTCUSDT", "BINANCE", InstrumentKind::Spot);
        let now = Utc::now();
        store.put_tick(tick(&instrument, 100.0, now));
        assert_eq!(store.latest_price(&instrument), Some(100.0));
        assert!(store.age(&instrument).unwrap() < 1.0);
    }

    #[test]
    fn tick_ring_bounded() {
        let store = MarketStore::new();
        let instrument = Instrument::new("BTCUSDT", "BINANCE", InstrumentKind::Spot);
        for i in 0..(TICK_RING_CAPACITY + 10) {
            store.put_tick(tick(&instrument, i as f64, Utc::now()));
        }
        let state = store.state_for(&instrument);
        assert_eq!(state.tick_ring.read().len(), TICK_RING_CAPACITY);
    }

    #[test]
    fn recent_bars_oldest_first() {
        let store = MarketStore::new();
        let instrument = Instrument::new("BTCUSDT", "BINANCE", InstrumentKind::Spot);
        let t0 = Utc::now();
        for i in 0..3 {
            store.put_bar(OHLCBar::open_new(
                instrument.clone(),
                Timeframe::M1,
                t0 + chrono::Duration::minutes(i),
                100.0 + i as f64,
                1.0,
            ));
        }
        let bars = store.recent_bars(&instrument, Timeframe::M1, 10);
        assert_eq!(bars.len(), 3);
        assert!(bars[0].start_at < bars[2].start_at);
    }
}
