//! Stage A: the four parallel analyst agents (§4.5). All four share the same
//! shape — ask the LLM Router for a bias/confidence/rationale reply — and
//! differ only in the prompt framing and which market feature they read.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::LlmRouter;

use super::agent_trait::Agent;
use super::dsl::{get_f64, get_string, parse_kv};
use super::output::{AgentPayload, AnalystOutput};
use super::state::CycleState;

const ANALYST_KEYS: &[&str] = &["BIAS", "CONFIDENCE", "RATIONALE"];

pub struct AnalystAgent {
    name: &'static str,
    system_prompt: &'static str,
    llm: Arc<LlmRouter>,
}

impl AnalystAgent {
    pub fn technical(llm: Arc<LlmRouter>) -> Self {
        Self {
            name: "technical",
            system_prompt: "You are a technical analyst. Reply only with BIAS=<-1..1> CONFIDENCE=<0..1> RATIONALE=<text>, one per line, based on recent OHLC price action.",
            llm,
        }
    }

    pub fn fundamental(llm: Arc<LlmRouter>) -> Self {
        Self {
            name: "fundamental",
            system_prompt: "You are a fundamental analyst. Reply only with BIAS=<-1..1> CONFIDENCE=<0..1> RATIONALE=<text>, one per line, based on the instrument's underlying fundamentals.",
            llm,
        }
    }

    pub fn sentiment(llm: Arc<LlmRouter>) -> Self {
        Self {
            name: "sentiment",
            system_prompt: "You are a sentiment analyst. Reply only with BIAS=<-1..1> CONFIDENCE=<0..1> RATIONALE=<text>, one per line, based on market sentiment.",
            llm,
        }
    }

    pub fn macro_(llm: Arc<LlmRouter>) -> Self {
        Self {
            name: "macro",
            system_prompt: "You are a macro analyst. Reply only with BIAS=<-1..1> CONFIDENCE=<0..1> RATIONALE=<text>, one per line, based on macroeconomic conditions.",
            llm,
        }
    }

    fn user_prompt(&self, state: &CycleState) -> String {
        let price = state.latest_tick.as_ref().map(|t| t.last_price).unwrap_or(0.0);
        format!(
            "Instrument: {}\nLatest price: {:.2}\nCycle: {}",
            state.instrument.symbol, price, state.cycle_id
        )
    }
}

#[async_trait]
impl Agent for AnalystAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, state: &CycleState) -> anyhow::Result<AgentPayload> {
        let user_prompt = self.user_prompt(state);
        let result = self
            .llm
            .call(self.system_prompt, &user_prompt, 200)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        let fields = parse_kv(&result.text, ANALYST_KEYS)?;
        Ok(AgentPayload::Analyst(AnalystOutput {
            bias: get_f64(&fields, "BIAS", 0.0).clamp(-1.0, 1.0),
            confidence: get_f64(&fields, "CONFIDENCE", 0.0).clamp(0.0, 1.0),
            rationale: get_string(&fields, "RATIONALE", ""),
        }))
    }
}
