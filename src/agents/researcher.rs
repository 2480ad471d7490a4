//! Stage B: Bull/Bear researchers (§4.5). Each reads Stage A's analyst
//! outputs and argues one side, producing a thesis + confidence.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::LlmRouter;

use super::agent_trait::Agent;
use super::dsl::{get_f64, get_string, parse_kv};
use super::output::{AgentPayload, ResearcherOutput};
use super::state::CycleState;

const RESEARCHER_KEYS: &[&str] = &["THESIS", "CONFIDENCE"];

pub struct ResearcherAgent {
    name: &'static str,
    stance: &'static str,
    llm: Arc<LlmRouter>,
}

impl ResearcherAgent {
    pub fn bull(llm: Arc<LlmRouter>) -> Self {
        Self {
            name: "bull_researcher",
            stance: "bullish case",
            llm,
        }
    }

    pub fn bear(llm: Arc<LlmRouter>) -> Self {
        Self {
            name: "bear_researcher",
            stance: "bearish case",
            llm,
        }
    }

    fn analyst_summary(&self, state: &CycleState) -> String {
        let mut lines = Vec::new();
        for name in ["technical", "fundamental", "sentiment", "macro"] {
            if let Some(out) = state.prior_outputs.get(name) {
                lines.push(format!("{name}: {:?}", out.payload));
            }
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Agent for ResearcherAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, state: &CycleState) -> anyhow::Result<AgentPayload> {
        let system = format!(
            "You are a researcher arguing the {}. Reply only with THESIS=<text> CONFIDENCE=<0..1>, one per line.",
            self.stance
        );
        let user = format!("Analyst outputs:\n{}", self.analyst_summary(state));

        let result = self.llm.call(&system, &user, 200).await.map_err(|e| anyhow::anyhow!(e))?;
        let fields = parse_kv(&result.text, RESEARCHER_KEYS)?;

        Ok(AgentPayload::Researcher(ResearcherOutput {
            thesis: get_string(&fields, "THESIS", ""),
            confidence: get_f64(&fields, "CONFIDENCE", 0.0).clamp(0.0, 1.0),
        }))
    }
}
