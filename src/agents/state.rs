//! `CycleState`: the read-only snapshot every agent receives (§4.5 "Input:
//! CycleState (read-only snapshot)").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::market::{Instrument, OHLCBar, OptionsChainSnapshot, Tick, Timeframe};

use super::output::AgentOutput;

#[derive(Debug, Clone)]
pub struct CycleState {
    pub cycle_id: String,
    pub instrument: Instrument,
    pub at: DateTime<Utc>,
    pub latest_tick: Option<Tick>,
    pub recent_bars: HashMap<Timeframe, Vec<OHLCBar>>,
    pub options_chain: Option<OptionsChainSnapshot>,
    /// Outputs accumulated from earlier stages in this cycle, keyed by agent name.
    pub prior_outputs: Arc<HashMap<String, AgentOutput>>,
}

impl CycleState {
    pub fn new(cycle_id: String, instrument: Instrument, at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            instrument,
            at,
            latest_tick: None,
            recent_bars: HashMap::new(),
            options_chain: None,
            prior_outputs: Arc::new(HashMap::new()),
        }
    }

    pub fn with_prior_outputs(mut self, outputs: HashMap<String, AgentOutput>) -> Self {
        self.prior_outputs = Arc::new(outputs);
        self
    }
}
