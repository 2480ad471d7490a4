//! Shared state every `/api/*` and `/metrics/*` handler reads from (§6.1).
//! Construction happens once in `main`; handlers only borrow `Arc`s.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::broker::PaperBroker;
use crate::config::Config;
use crate::market::{Instrument, MarketStore};
use crate::persistence::Persistence;
use crate::snapshot::SnapshotBuilder;

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<MarketStore>,
    pub broker: Arc<PaperBroker>,
    pub persistence: Arc<dyn Persistence>,
    pub snapshot: Arc<SnapshotBuilder>,
    pub instrument: Instrument,
    pub config: Arc<Config>,
    /// Renders the process-wide `metrics` counters/gauges (ticks ingested,
    /// cycles run, orders filled) as Prometheus text for `/metrics`.
    pub metrics_handle: PrometheusHandle,
}
