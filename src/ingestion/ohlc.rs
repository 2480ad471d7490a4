//! OHLC aggregation (§4.3): a pure function of tick stream + timeframe.
//! Maintains one open bar per timeframe; on a tick crossing the next
//! boundary, finalizes the current bar and opens a new one.

use std::collections::HashMap;

use crate::market::{Instrument, OHLCBar, Tick, Timeframe};

pub struct OhlcAggregator {
    timeframes: Vec<Timeframe>,
    open_bars: HashMap<(String, Timeframe), OHLCBar>,
}

impl OhlcAggregator {
    pub fn new(timeframes: Vec<Timeframe>) -> Self {
        Self {
            timeframes,
            open_bars: HashMap::new(),
        }
    }

    /// Feeds one tick; returns any bars finalized as a result (zero, one, or
    /// one per configured timeframe if the tick crosses multiple boundaries
    /// at once, e.g. after a long gap).
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<OHLCBar> {
        let mut finalized = Vec::new();
        for timeframe in self.timeframes.clone() {
            let aligned_start = timeframe.align(tick.timestamp);
            let key = (tick.instrument.key().to_string(), timeframe);
            let volume = tick.volume.unwrap_or(0.0);

            match self.open_bars.get_mut(&key) {
                Some(bar) if bar.start_at == aligned_start => {
                    bar.update(tick.last_price, volume);
                }
                Some(bar) => {
                    finalized.push(bar.clone());
                    let new_bar = OHLCBar::open_new(tick.instrument.clone(), timeframe, aligned_start, tick.last_price, volume);
                    self.open_bars.insert(key, new_bar);
                }
                None => {
                    let new_bar = OHLCBar::open_new(tick.instrument.clone(), timeframe, aligned_start, tick.last_price, volume);
                    self.open_bars.insert(key, new_bar);
                }
            }
        }
        finalized
    }

    pub fn open_bar(&self, instrument: &Instrument, timeframe: Timeframe) -> Option<OHLCBar> {
        self.open_bars.get(&(instrument.key().to_string(), timeframe)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::InstrumentKind;
    use chrono::{TimeZone, Utc};

    fn tick_at(instrument: &Instrument, secs: i64, price: f64) -> Tick {
        Tick {
            instrument: instrument.clone(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            last_price: price,
            volume: Some(1.0),
            bid_depth: vec![],
            ask_depth: vec![],
            bid_qty_total: None,
            ask_qty_total: None,
        }
    }

    #[test]
    fn s6_ohlc_aggregation_scenario() {
        let instrument = Instrument::new("NIFTY", "NSE", InstrumentKind::Index);
        let mut agg = OhlcAggregator::new(vec![Timeframe::M1]);

        let ticks = [(0, 100.0), (15, 101.0), (30, 102.0), (45, 101.0), (60, 103.0)];
        let mut finalized = Vec::new();
        for (secs, price) in ticks {
            finalized.extend(agg.on_tick(&tick_at(&instrument, secs, price)));
        }

        assert_eq!(finalized.len(), 1);
        let bar = &finalized[0];
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 102.0);
        assert_eq!(bar.low, 100.0);
        assert_eq!(bar.close, 101.0);

        let open_bar = agg.open_bar(&instrument, Timeframe::M1).unwrap();
        assert_eq!(open_bar.open, 103.0);
        assert_eq!(open_bar.start_at.timestamp(), 60);
    }

    #[test]
    fn replaying_same_ticks_is_deterministic() {
        let instrument = Instrument::new("NIFTY", "NSE", InstrumentKind::Index);
        let ticks = [(0, 100.0), (15, 101.0), (30, 102.0), (45, 101.0), (60, 103.0)];

        let mut agg1 = OhlcAggregator::new(vec![Timeframe::M1]);
        let mut agg2 = OhlcAggregator::new(vec![Timeframe::M1]);
        let mut out1 = Vec::new();
        let mut out2 = Vec::new();
        for (secs, price) in ticks {
            out1.extend(agg1.on_tick(&tick_at(&instrument, secs, price)));
            out2.extend(agg2.on_tick(&tick_at(&instrument, secs, price)));
        }
        assert_eq!(out1.len(), out2.len());
        for (a, b) in out1.iter().zip(out2.iter()) {
            assert_eq!(a.open, b.open);
            assert_eq!(a.close, b.close);
        }
    }

    #[test]
    fn boundary_tick_belongs_to_new_bar() {
        let instrument = Instrument::new("NIFTY", "NSE", InstrumentKind::Index);
        let mut agg = OhlcAggregator::new(vec![Timeframe::M1]);
        agg.on_tick(&tick_at(&instrument, 59, 100.0));
        let finalized = agg.on_tick(&tick_at(&instrument, 60, 200.0));
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].close, 100.0);
        let open = agg.open_bar(&instrument, Timeframe::M1).unwrap();
        assert_eq!(open.open, 200.0);
    }
}
