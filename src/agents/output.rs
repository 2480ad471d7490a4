//! Tagged output types for every agent (§9 redesign flag: replace duck-typed
//! dicts with a known, enumerable shape per agent plus a common envelope).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Ok,
    TimedOut,
    Error,
}

/// Common envelope every agent call returns (§4.5 "Per-agent contract").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_name: String,
    pub status: AgentStatus,
    pub payload: AgentPayload,
}

impl AgentOutput {
    pub fn ok(agent_name: impl Into<String>, payload: AgentPayload) -> Self {
        Self {
            agent_name: agent_name.into(),
            status: AgentStatus::Ok,
            payload,
        }
    }

    pub fn timed_out(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            status: AgentStatus::TimedOut,
            payload: AgentPayload::Empty,
        }
    }

    pub fn error(agent_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            status: AgentStatus::Error,
            payload: AgentPayload::Error { reason: reason.into() },
        }
    }
}

/// A known, enumerable output shape per agent type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AgentPayload {
    Analyst(AnalystOutput),
    Researcher(ResearcherOutput),
    PortfolioManager(PortfolioManagerOutput),
    Risk(RiskOutput),
    Execution(ExecutionOutput),
    Learning(LearningOutput),
    Error { reason: String },
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystOutput {
    pub bias: f64, // [-1.0 bearish, 1.0 bullish]
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearcherOutput {
    pub thesis: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSignalAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioManagerOutput {
    pub bullish_score: f64,
    pub bearish_score: f64,
    pub tentative_signal: TradeSignalAction,
    pub scenario_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    Aggressive,
    Conservative,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskOutput {
    pub profile: RiskProfile,
    pub quantity_multiplier: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub signal: TradeSignalAction,
    pub quantity: f64,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningOutput {
    pub notes: String,
    pub recent_win_rate: f64,
}
