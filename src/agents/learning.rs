//! Stage F: the Learning Agent (§4.5). Best-effort and non-blocking — it
//! posts analytics derived from recent closed trades but its output never
//! changes the cycle's trading decision, and its own failures are swallowed
//! rather than surfaced as `AgentOutput::error` noise for callers to chase.

use async_trait::async_trait;
use serde_json::json;

use crate::persistence::{Persistence, Sort, SortOrder};

use super::agent_trait::Agent;
use super::output::{AgentPayload, LearningOutput};
use super::state::CycleState;

pub struct LearningAgent {
    persistence: std::sync::Arc<dyn Persistence>,
}

impl LearningAgent {
    pub fn new(persistence: std::sync::Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    async fn recent_win_rate(&self, instrument: &str) -> f64 {
        let trades = self
            .persistence
            .find_many(
                "trades_executed",
                json!({ "instrument": instrument, "status": "CLOSED" }),
                Some(Sort { field: "entry_at", order: SortOrder::Desc }),
                50,
            )
            .await
            .unwrap_or_default();

        if trades.is_empty() {
            return 0.5;
        }
        let wins = trades
            .iter()
            .filter(|t| t.get("pnl").and_then(|v| v.as_f64()).unwrap_or(0.0) > 0.0)
            .count();
        wins as f64 / trades.len() as f64
    }
}

#[async_trait]
impl Agent for LearningAgent {
    fn name(&self) -> &str {
        "learning"
    }

    async fn run(&self, state: &CycleState) -> anyhow::Result<AgentPayload> {
        let recent_win_rate = self.recent_win_rate(&state.instrument.symbol).await;
        let notes = format!("recent win rate over last trades: {:.0}%", recent_win_rate * 100.0);

        Ok(AgentPayload::Learning(LearningOutput { notes, recent_win_rate }))
    }
}
