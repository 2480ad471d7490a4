//! The Agent Graph itself (C5): wires Stages A-F together over a shared
//! `CycleState`, folding timeouts and failures into `AgentOutput` rather
//! than aborting the cycle (§4.5 "Per-agent contract").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::persistence::Persistence;

use super::agent_trait::Agent;
use super::analyst::AnalystAgent;
use super::execution::ExecutionAgent;
use super::learning::LearningAgent;
use super::output::{AgentOutput, AgentPayload};
use super::portfolio_manager::PortfolioManagerAgent;
use super::researcher::ResearcherAgent;
use super::risk::RiskAgent;
use super::state::CycleState;
use crate::llm::LlmRouter;

/// Upper bound on the whole graph, independent of individual agent timeouts
/// (§4.5, §4.6 "must be cancellable within 5 s" feeds into this via the
/// cancellation token rather than this constant).
pub const AGENT_GRAPH_TIMEOUT: Duration = Duration::from_secs(180);

pub struct CycleOutcome {
    pub outputs: HashMap<String, AgentOutput>,
    pub incomplete_agents: Vec<String>,
}

/// Runs one agent with its own timeout, folding the three possible
/// terminal states (ok / timed out / errored) into `AgentOutput`.
async fn run_one(agent: &dyn Agent, state: &CycleState, cancel: &CancellationToken) -> AgentOutput {
    let name = agent.name().to_string();
    tokio::select! {
        _ = cancel.cancelled() => AgentOutput::timed_out(name),
        result = tokio::time::timeout(agent.timeout(), agent.run(state)) => {
            match result {
                Ok(Ok(payload)) => AgentOutput::ok(name, payload),
                Ok(Err(e)) => {
                    tracing::warn!(agent = %name, error = %e, "agent failed");
                    AgentOutput::error(name, e.to_string())
                }
                Err(_) => {
                    tracing::warn!(agent = %name, "agent timed out");
                    AgentOutput::timed_out(name)
                }
            }
        }
    }
}

async fn run_stage(agents: Vec<Box<dyn Agent>>, state: &CycleState, cancel: &CancellationToken) -> Vec<AgentOutput> {
    let futures = agents.iter().map(|agent| run_one(agent.as_ref(), state, cancel));
    futures_util::future::join_all(futures).await
}

fn fold(outputs: &mut HashMap<String, AgentOutput>, incomplete: &mut Vec<String>, batch: Vec<AgentOutput>) {
    for out in batch {
        if !matches!(out.status, super::output::AgentStatus::Ok) {
            incomplete.push(out.agent_name.clone());
        }
        outputs.insert(out.agent_name.clone(), out);
    }
}

pub struct AgentGraph {
    llm: Arc<LlmRouter>,
    persistence: Arc<dyn Persistence>,
    default_stop_loss_pct: f64,
    default_take_profit_pct: f64,
}

impl AgentGraph {
    pub fn new(llm: Arc<LlmRouter>, persistence: Arc<dyn Persistence>, default_stop_loss_pct: f64, default_take_profit_pct: f64) -> Self {
        Self {
            llm,
            persistence,
            default_stop_loss_pct,
            default_take_profit_pct,
        }
    }

    /// Runs Stage A through Stage E, then best-effort Stage F, applying the
    /// graph-wide timeout. Circuit-breaker state is supplied by the caller
    /// (the Decision Scheduler) since it is evaluated independently per
    /// cycle (§4.9).
    pub async fn run(&self, cycle_id: String, initial: CycleState, circuit_breaker_tripped: bool, cancel: CancellationToken) -> CycleOutcome {
        let fut = self.run_inner(initial, circuit_breaker_tripped, cancel.clone());
        match tokio::time::timeout(AGENT_GRAPH_TIMEOUT, fut).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(%cycle_id, "agent graph exceeded its total timeout");
                CycleOutcome {
                    outputs: HashMap::new(),
                    incomplete_agents: vec!["agent_graph".to_string()],
                }
            }
        }
    }

    async fn run_inner(&self, mut state: CycleState, circuit_breaker_tripped: bool, cancel: CancellationToken) -> CycleOutcome {
        let mut outputs: HashMap<String, AgentOutput> = HashMap::new();
        let mut incomplete = Vec::new();

        // Stage A: analysts, fan-out.
        let stage_a: Vec<Box<dyn Agent>> = vec![
            Box::new(AnalystAgent::technical(self.llm.clone())),
            Box::new(AnalystAgent::fundamental(self.llm.clone())),
            Box::new(AnalystAgent::sentiment(self.llm.clone())),
            Box::new(AnalystAgent::macro_(self.llm.clone())),
        ];
        fold(&mut outputs, &mut incomplete, run_stage(stage_a, &state, &cancel).await);
        state = state.with_prior_outputs(outputs.clone());

        // Stage B: researchers, fan-out.
        let stage_b: Vec<Box<dyn Agent>> = vec![
            Box::new(ResearcherAgent::bull(self.llm.clone())),
            Box::new(ResearcherAgent::bear(self.llm.clone())),
        ];
        fold(&mut outputs, &mut incomplete, run_stage(stage_b, &state, &cancel).await);
        state = state.with_prior_outputs(outputs.clone());

        // Stage C: portfolio manager, single.
        let stage_c: Vec<Box<dyn Agent>> = vec![Box::new(PortfolioManagerAgent::new(self.llm.clone()))];
        fold(&mut outputs, &mut incomplete, run_stage(stage_c, &state, &cancel).await);
        state = state.with_prior_outputs(outputs.clone());

        // Stage D: risk agents, fan-out.
        let stage_d: Vec<Box<dyn Agent>> = vec![
            Box::new(RiskAgent::aggressive(self.default_stop_loss_pct, self.default_take_profit_pct)),
            Box::new(RiskAgent::conservative(self.default_stop_loss_pct, self.default_take_profit_pct)),
            Box::new(RiskAgent::neutral(self.default_stop_loss_pct, self.default_take_profit_pct)),
        ];
        fold(&mut outputs, &mut incomplete, run_stage(stage_d, &state, &cancel).await);
        state = state.with_prior_outputs(outputs.clone());

        // Stage E: execution, single.
        let stage_e: Vec<Box<dyn Agent>> = vec![Box::new(ExecutionAgent::new(circuit_breaker_tripped))];
        fold(&mut outputs, &mut incomplete, run_stage(stage_e, &state, &cancel).await);
        state = state.with_prior_outputs(outputs.clone());

        // Stage F: learning, best-effort. Its output is recorded but never
        // influences `incomplete_agents` or downstream decisions.
        let learning = LearningAgent::new(self.persistence.clone());
        match tokio::time::timeout(learning.timeout(), learning.run(&state)).await {
            Ok(Ok(payload)) => {
                outputs.insert("learning".to_string(), AgentOutput::ok("learning", payload));
            }
            _ => {
                outputs.insert("learning".to_string(), AgentOutput::error("learning", "best-effort learning pass did not complete"));
            }
        }

        CycleOutcome { outputs, incomplete_agents: incomplete }
    }
}

/// Extracts the Execution Agent's decision from a finished cycle's outputs,
/// if it ran to completion.
pub fn execution_output(outcome: &CycleOutcome) -> Option<&super::output::ExecutionOutput> {
    outcome.outputs.get("execution").and_then(|out| match &out.payload {
        AgentPayload::Execution(exec) => Some(exec),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::output::AgentStatus;
    use crate::market::{Instrument, InstrumentKind};
    use chrono::Utc;

    /// S5: an agent that sleeps past its own timeout budget must surface as
    /// `timed_out`, not abort the stage or the cycle.
    struct SleepyAgent {
        sleep_for: Duration,
        budget: Duration,
    }

    #[async_trait::async_trait]
    impl Agent for SleepyAgent {
        fn name(&self) -> &str {
            "sentiment"
        }

        async fn run(&self, _state: &CycleState) -> anyhow::Result<AgentPayload> {
            tokio::time::sleep(self.sleep_for).await;
            Ok(AgentPayload::Empty)
        }

        fn timeout(&self) -> Duration {
            self.budget
        }
    }

    #[tokio::test]
    async fn s5_agent_timeout_marks_timed_out_without_aborting_cycle() {
        let agent = SleepyAgent {
            sleep_for: Duration::from_millis(60),
            budget: Duration::from_millis(10),
        };
        let instrument = Instrument::new("NIFTY", "NSE", InstrumentKind::Index);
        let state = CycleState::new("c-1".to_string(), instrument, Utc::now());
        let cancel = CancellationToken::new();

        let output = run_one(&agent, &state, &cancel).await;

        assert_eq!(output.status, AgentStatus::TimedOut);
        assert_eq!(output.agent_name, "sentiment");
    }

    struct FailingAgent;

    #[async_trait::async_trait]
    impl Agent for FailingAgent {
        fn name(&self) -> &str {
            "macro"
        }

        async fn run(&self, _state: &CycleState) -> anyhow::Result<AgentPayload> {
            anyhow::bail!("upstream data source unavailable")
        }
    }

    #[tokio::test]
    async fn agent_failure_folds_into_error_output_not_a_panic() {
        let instrument = Instrument::new("NIFTY", "NSE", InstrumentKind::Index);
        let state = CycleState::new("c-1".to_string(), instrument, Utc::now());
        let cancel = CancellationToken::new();

        let output = run_one(&FailingAgent, &state, &cancel).await;

        assert_eq!(output.status, AgentStatus::Error);
        match output.payload {
            AgentPayload::Error { reason } => assert!(reason.contains("upstream data source unavailable")),
            _ => panic!("expected error payload"),
        }
    }
}
