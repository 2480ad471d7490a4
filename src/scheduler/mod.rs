//! Decision Scheduler (C6): drives the strategic and tactical periodic
//! cycles per instrument, owns the per-instrument cycle mutex, and wires
//! the Agent Graph into persistence, the circuit breaker, and the broker
//! (§4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::output::{AgentPayload, PortfolioManagerOutput, TradeSignalAction};
use crate::agents::{AgentGraph, CycleState};
use crate::broker::PaperBroker;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerChecks, CircuitBreakerInput};
use crate::config::Config;
use crate::error::OrchestratorError;
use crate::market::{Instrument, MarketStore, Timeframe};
use crate::persistence::Persistence;

/// Cancellation must be acknowledged within this bound (§4.6).
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Strategic,
    Tactical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub cycle_id: String,
    pub instrument: String,
    pub at: DateTime<Utc>,
    pub final_signal: TradeSignalAction,
    pub bullish_score: f64,
    pub bearish_score: f64,
    pub executive_summary: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Pending,
    Executed,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub instrument: String,
    pub action: TradeSignalAction,
    pub confidence: f64,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub quantity: f64,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
}

/// Per-instrument monotonic cycle counter (§4.6 "totally ordered by cycle_id").
struct CycleCounter(AtomicU64);

impl CycleCounter {
    fn next(&self, instrument: &str) -> String {
        let n = self.0.fetch_add(1, Ordering::SeqCst);
        format!("{instrument}-{n}")
    }
}

pub struct DecisionScheduler {
    market: Arc<MarketStore>,
    persistence: Arc<dyn Persistence>,
    broker: Arc<PaperBroker>,
    graph: Arc<AgentGraph>,
    config: Arc<Config>,
    cycle_mutex: AsyncMutex<()>,
    counter: CycleCounter,
    instrument: Instrument,
    data_max_age_seconds: u64,
}

impl DecisionScheduler {
    pub fn new(
        market: Arc<MarketStore>,
        persistence: Arc<dyn Persistence>,
        broker: Arc<PaperBroker>,
        graph: Arc<AgentGraph>,
        config: Arc<Config>,
        instrument: Instrument,
        data_max_age_seconds: u64,
    ) -> Self {
        Self {
            market,
            persistence,
            broker,
            graph,
            config,
            cycle_mutex: AsyncMutex::new(()),
            counter: CycleCounter(AtomicU64::new(0)),
            instrument,
            data_max_age_seconds,
        }
    }

    /// Spawns the strategic and tactical periodic loops; both run until
    /// `cancel` fires.
    pub async fn run_forever(self: Arc<Self>, strategic_period: Duration, tactical_period: Duration, cancel: CancellationToken) {
        let strategic = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.periodic_loop(CycleKind::Strategic, strategic_period, cancel).await })
        };
        let tactical = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.periodic_loop(CycleKind::Tactical, tactical_period, cancel).await })
        };
        let _ = tokio::join!(strategic, tactical);
    }

    async fn periodic_loop(self: Arc<Self>, kind: CycleKind, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let result = self.run_cycle(kind, cancel.clone()).await;
                    if let Err(e) = result {
                        tracing::warn!(instrument = %self.instrument.symbol, ?kind, error = %e, "cycle did not complete");
                    }
                }
            }
        }
    }

    /// §4.6 cycle lifecycle, steps 1-8.
    pub async fn run_cycle(&self, kind: CycleKind, cancel: CancellationToken) -> Result<CycleResult, OrchestratorError> {
        // Step 1: acquire the instrument cycle mutex (no overlapping runs).
        let _guard = self.cycle_mutex.lock().await;

        let cycle_id = self.counter.next(&self.instrument.symbol);
        let now = Utc::now();

        // Step 2: snapshot Market Store into CycleState.
        let latest_tick = self.market.latest_tick(&self.instrument);
        let mut recent_bars = HashMap::new();
        for tf in [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1] {
            recent_bars.insert(tf, self.market.recent_bars(&self.instrument, tf, 200));
        }
        let options_chain = self.market.options_chain(&self.instrument);

        let mut state = CycleState::new(cycle_id.clone(), self.instrument.clone(), now);
        state.latest_tick = latest_tick;
        state.recent_bars = recent_bars;
        state.options_chain = options_chain;

        // Step 3: freshness check.
        let age = self.market.age_at(&self.instrument, now).unwrap_or(f64::MAX);
        if age > self.data_max_age_seconds as f64 {
            let err = OrchestratorError::StaleData {
                instrument: self.instrument.symbol.clone(),
                age_seconds: age,
                max_age_seconds: self.data_max_age_seconds as f64,
            };
            tracing::warn!(instrument = %self.instrument.symbol, %age, "cycle aborted: stale data");
            return Ok(CycleResult {
                cycle_id,
                instrument: self.instrument.symbol.clone(),
                at: now,
                final_signal: TradeSignalAction::Hold,
                bullish_score: 0.0,
                bearish_score: 0.0,
                executive_summary: "aborted: stale data".to_string(),
                errors: vec![err.to_string()],
            });
        }

        // Evaluate the circuit breaker ahead of the graph so the Execution
        // Agent can incorporate it (§4.5 "Execution Agent may only reject").
        let checks = self.evaluate_circuit_breaker();

        // Step 4: run the Agent Graph (tactical cycles still run the full
        // graph here; a narrower subset is an optimization left for a later
        // iteration — see DESIGN.md).
        let outcome = self.graph.run(cycle_id.clone(), state, checks.should_halt(), cancel).await;

        let pm = outcome.outputs.get("portfolio_manager").and_then(|o| match &o.payload {
            AgentPayload::PortfolioManager(pm) => Some(pm.clone()),
            _ => None,
        });
        let execution = crate::agents::graph::execution_output(&outcome).cloned();

        let mut errors: Vec<String> = outcome
            .incomplete_agents
            .iter()
            .map(|name| format!("agent {name} did not complete"))
            .collect();

        // Step 5: force HOLD if the circuit breaker is tripped.
        let mut final_signal = execution.as_ref().map(|e| e.signal).unwrap_or(TradeSignalAction::Hold);
        if checks.should_halt() {
            final_signal = TradeSignalAction::Hold;
            errors.push(format!("circuit breaker tripped: {checks:?}"));
        }

        let PortfolioManagerOutput { bullish_score, bearish_score, .. } = pm.unwrap_or(PortfolioManagerOutput {
            bullish_score: 0.0,
            bearish_score: 0.0,
            tentative_signal: TradeSignalAction::Hold,
            scenario_paths: Vec::new(),
        });

        let cycle_result = CycleResult {
            cycle_id: cycle_id.clone(),
            instrument: self.instrument.symbol.clone(),
            at: now,
            final_signal,
            bullish_score,
            bearish_score,
            executive_summary: format!("{kind:?} cycle produced {final_signal:?}"),
            errors,
        };

        // Step 6: persist CycleResult + per-agent decisions + Signal.
        let _ = self.persistence.insert("market_events", serde_json::to_value(&cycle_result).unwrap_or(json!({}))).await;
        for (name, output) in &outcome.outputs {
            let _ = self
                .persistence
                .insert(
                    "agent_decisions",
                    json!({
                        "cycle_id": cycle_id,
                        "instrument": self.instrument.symbol,
                        "at": now,
                        "agent_name": name,
                        "output": output,
                    }),
                )
                .await;
        }

        // Step 7: hand off to the broker if the signal is actionable.
        if final_signal != TradeSignalAction::Hold {
            if let Some(exec) = &execution {
                if exec.quantity > 0.0 && self.broker.open_count() == 0 {
                    let result = self.broker.place_order(
                        &self.instrument.symbol,
                        final_signal,
                        exec.quantity,
                        exec.entry,
                        exec.stop_loss,
                        exec.take_profit,
                        checks.should_halt(),
                    );
                    let signal = Signal {
                        id: Uuid::new_v4().to_string(),
                        instrument: self.instrument.symbol.clone(),
                        action: final_signal,
                        confidence: bullish_score.max(bearish_score),
                        entry: exec.entry,
                        stop_loss: exec.stop_loss,
                        take_profit: exec.take_profit,
                        quantity: exec.quantity,
                        status: if result.trade_id.is_some() { SignalStatus::Executed } else { SignalStatus::Rejected },
                        created_at: now,
                    };
                    let _ = self.persistence.insert("market_events", serde_json::to_value(&signal).unwrap_or(json!({}))).await;
                }
            }
        }

        metrics::counter!("cycles_total", "instrument" => self.instrument.symbol.clone(), "kind" => format!("{kind:?}")).increment(1);
        metrics::gauge!("cycle_bullish_score", "instrument" => self.instrument.symbol.clone()).set(bullish_score);
        metrics::gauge!("cycle_bearish_score", "instrument" => self.instrument.symbol.clone()).set(bearish_score);

        // Step 8: mutex released when `_guard` drops.
        Ok(cycle_result)
    }

    fn evaluate_circuit_breaker(&self) -> CircuitBreakerChecks {
        let closed = self.broker.closed_positions();
        let open_notional: f64 = self.broker.open_positions().iter().map(|p| p.entry_price * p.quantity).sum();
        let consecutive_losses = closed.iter().rev().take_while(|p| p.pnl.unwrap_or(0.0) < 0.0).count() as u32;
        let input = CircuitBreakerInput {
            daily_pnl: closed.iter().filter_map(|p| p.pnl).sum(),
            capital: self.broker.capital(),
            daily_loss_limit_pct: self.config.risk.daily_loss_limit_pct,
            consecutive_losses,
            data_age_seconds: self.market.age(&self.instrument).unwrap_or(0.0),
            stale_threshold_seconds: self.data_max_age_seconds as f64,
            llm_calls_last_minute: 0,
            api_rate_limit_per_min: self.config.risk.api_rate_limit_per_min,
            current_volatility: 0.0,
            high_volatility_threshold: self.config.risk.high_volatility_threshold,
            open_notional,
            max_leverage: self.config.trading.max_leverage,
            market_halted: false,
        };
        CircuitBreaker::evaluate(&input)
    }
}

/// Bounds cycle cancellation to the required grace period (§4.6).
pub async fn cancel_with_grace(cancel: &CancellationToken) {
    cancel.cancel();
    tokio::time::sleep(CANCEL_GRACE_PERIOD).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::LlmRouter;
    use crate::market::{InstrumentKind, Tick};
    use crate::persistence::SqlitePersistence;
    use chrono::Duration as ChronoDuration;

    fn test_config() -> Config {
        toml::from_str(
            r#"
            [instrument]
            symbol = "NIFTY"
            exchange = "NSE"
            kind = "index"
            "#,
        )
        .expect("test config must parse")
    }

    async fn scheduler_with_data_max_age(data_max_age_seconds: u64) -> (Arc<DecisionScheduler>, Arc<MarketStore>, Instrument) {
        let instrument = Instrument::new("NIFTY", "NSE", InstrumentKind::Index);
        let market = Arc::new(MarketStore::new());
        let dir = tempfile::tempdir().unwrap();
        let persistence: Arc<dyn Persistence> =
            Arc::new(SqlitePersistence::open(dir.path().join("s3.db").to_str().unwrap()).unwrap());
        let config = Arc::new(test_config());
        let llm = Arc::new(LlmRouter::from_config(&config));
        let graph = Arc::new(AgentGraph::new(llm, persistence.clone(), 1.0, 2.0));
        let broker = Arc::new(PaperBroker::new(1_000_000.0, 20.0, 5.0, 1.0, 5));
        let scheduler = Arc::new(DecisionScheduler::new(
            market.clone(),
            persistence,
            broker,
            graph,
            config,
            instrument.clone(),
            data_max_age_seconds,
        ));
        (scheduler, market, instrument)
    }

    /// S3: data 200s old with a 120s threshold must abort the cycle to HOLD
    /// with a `StaleData` error and persist nothing actionable.
    #[tokio::test]
    async fn s3_stale_data_aborts_cycle_to_hold() {
        let (scheduler, market, instrument) = scheduler_with_data_max_age(120).await;
        market.put_tick(Tick {
            instrument: instrument.clone(),
            timestamp: Utc::now() - ChronoDuration::seconds(200),
            last_price: 100.0,
            volume: None,
            bid_depth: vec![],
            ask_depth: vec![],
            bid_qty_total: None,
            ask_qty_total: None,
        });

        let result = scheduler.run_cycle(CycleKind::Strategic, CancellationToken::new()).await.unwrap();

        assert_eq!(result.final_signal, TradeSignalAction::Hold);
        assert_eq!(result.executive_summary, "aborted: stale data");
        assert!(result.errors.iter().any(|e| e.contains("old")));
    }

    #[tokio::test]
    async fn fresh_data_does_not_trip_staleness_check() {
        let (scheduler, market, instrument) = scheduler_with_data_max_age(120).await;
        market.put_tick(Tick {
            instrument: instrument.clone(),
            timestamp: Utc::now(),
            last_price: 100.0,
            volume: None,
            bid_depth: vec![],
            ask_depth: vec![],
            bid_qty_total: None,
            ask_qty_total: None,
        });

        let result = scheduler.run_cycle(CycleKind::Strategic, CancellationToken::new()).await.unwrap();

        assert_ne!(result.executive_summary, "aborted: stale data");
    }
}
