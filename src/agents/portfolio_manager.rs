//! Stage C: the single Portfolio Manager that aggregates Stage A analysts
//! and Stage B researchers into a tentative trading signal (§4.5).

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::LlmRouter;

use super::agent_trait::Agent;
use super::dsl::{get_f64, get_string, parse_kv};
use super::output::{AgentPayload, PortfolioManagerOutput, TradeSignalAction};
use super::state::CycleState;

const PM_KEYS: &[&str] = &["BULLISH", "BEARISH", "SIGNAL", "PATHS"];

/// PM confidence margin below this forces the tentative signal to HOLD,
/// regardless of what the LLM proposed (§4.5 resolution rules).
const CONFIDENCE_MARGIN_FLOOR: f64 = 0.1;

pub struct PortfolioManagerAgent {
    llm: Arc<LlmRouter>,
}

impl PortfolioManagerAgent {
    pub fn new(llm: Arc<LlmRouter>) -> Self {
        Self { llm }
    }

    fn summarize_inputs(&self, state: &CycleState) -> String {
        let mut lines = Vec::new();
        for name in ["technical", "fundamental", "sentiment", "macro", "bull_researcher", "bear_researcher"] {
            if let Some(out) = state.prior_outputs.get(name) {
                lines.push(format!("{name}: {:?}", out.payload));
            }
        }
        lines.join("\n")
    }

    fn parse_signal(raw: &str) -> TradeSignalAction {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => TradeSignalAction::Buy,
            "SELL" => TradeSignalAction::Sell,
            _ => TradeSignalAction::Hold,
        }
    }
}

#[async_trait]
impl Agent for PortfolioManagerAgent {
    fn name(&self) -> &str {
        "portfolio_manager"
    }

    async fn run(&self, state: &CycleState) -> anyhow::Result<AgentPayload> {
        let system = "You are the portfolio manager synthesizing analyst and researcher opinions. Reply only with BULLISH=<0..1> BEARISH=<0..1> SIGNAL=<BUY|SELL|HOLD> PATHS=<comma-separated scenario names>, one per line.";
        let user = format!("Inputs:\n{}", self.summarize_inputs(state));

        let result = self.llm.call(system, &user, 200).await.map_err(|e| anyhow::anyhow!(e))?;
        let fields = parse_kv(&result.text, PM_KEYS)?;

        let bullish_score = get_f64(&fields, "BULLISH", 0.0).clamp(0.0, 1.0);
        let bearish_score = get_f64(&fields, "BEARISH", 0.0).clamp(0.0, 1.0);
        let margin = bullish_score.max(bearish_score) - bullish_score.min(bearish_score);

        let tentative_signal = if margin < CONFIDENCE_MARGIN_FLOOR {
            TradeSignalAction::Hold
        } else {
            Self::parse_signal(&get_string(&fields, "SIGNAL", "HOLD"))
        };

        let scenario_paths = get_string(&fields, "PATHS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(AgentPayload::PortfolioManager(PortfolioManagerOutput {
            bullish_score,
            bearish_score,
            tentative_signal,
            scenario_paths,
        }))
    }
}
