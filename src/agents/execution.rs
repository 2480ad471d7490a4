//! Stage E: the single Execution Agent (§4.5). Deterministic — combines the
//! PM's tentative signal with the reconciled Risk Agent sizing and the
//! current circuit-breaker state. May only reject (force HOLD), never
//! invent a more aggressive trade than PM+Risk agreed on.

use async_trait::async_trait;

use super::agent_trait::Agent;
use super::output::{AgentPayload, ExecutionOutput, PortfolioManagerOutput, RiskOutput, TradeSignalAction};
use super::risk::reconcile;
use super::state::CycleState;

pub struct ExecutionAgent {
    circuit_breaker_tripped: bool,
}

impl ExecutionAgent {
    pub fn new(circuit_breaker_tripped: bool) -> Self {
        Self { circuit_breaker_tripped }
    }

    fn pm_output(state: &CycleState) -> Option<&PortfolioManagerOutput> {
        state.prior_outputs.get("portfolio_manager").and_then(|out| match &out.payload {
            AgentPayload::PortfolioManager(pm) => Some(pm),
            _ => None,
        })
    }

    fn risk_outputs(state: &CycleState) -> Vec<RiskOutput> {
        ["risk_aggressive", "risk_conservative", "risk_neutral"]
            .iter()
            .filter_map(|name| state.prior_outputs.get(*name))
            .filter_map(|out| match &out.payload {
                AgentPayload::Risk(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Agent for ExecutionAgent {
    fn name(&self) -> &str {
        "execution"
    }

    async fn run(&self, state: &CycleState) -> anyhow::Result<AgentPayload> {
        let entry = state.latest_tick.as_ref().map(|t| t.last_price).unwrap_or(0.0);
        let pm = Self::pm_output(state);
        let risk_outputs = Self::risk_outputs(state);
        let risk = reconcile(&risk_outputs);

        let mut signal = pm.map(|p| p.tentative_signal).unwrap_or(TradeSignalAction::Hold);
        if self.circuit_breaker_tripped {
            signal = TradeSignalAction::Hold;
        }

        let (quantity, stop_loss_pct, take_profit_pct) = match (&risk, signal) {
            (Some(r), s) if s != TradeSignalAction::Hold => (r.quantity_multiplier, r.stop_loss_pct, r.take_profit_pct),
            _ => (0.0, 0.0, 0.0),
        };

        if quantity <= 0.0 {
            signal = TradeSignalAction::Hold;
        }

        let direction = match signal {
            TradeSignalAction::Buy => 1.0,
            TradeSignalAction::Sell => -1.0,
            TradeSignalAction::Hold => 0.0,
        };

        let stop_loss = entry * (1.0 - direction * stop_loss_pct / 100.0);
        let take_profit = entry * (1.0 + direction * take_profit_pct / 100.0);

        Ok(AgentPayload::Execution(ExecutionOutput {
            signal,
            quantity,
            entry,
            stop_loss,
            take_profit,
        }))
    }
}
