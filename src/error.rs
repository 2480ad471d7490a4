//! Error taxonomy for the orchestrator.
//!
//! Component-internal code returns `anyhow::Result` (matching the rest of the
//! crate); at boundaries where a caller needs to match on *kind* — the
//! scheduler, the agent graph, the API layer — it converts to
//! `OrchestratorError` instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("market data for {instrument} is {age_seconds:.1}s old (max {max_age_seconds:.1}s)")]
    StaleData {
        instrument: String,
        age_seconds: f64,
        max_age_seconds: f64,
    },

    #[error("no LLM provider available")]
    NoProviderAvailable,

    #[error("agent {agent_name} timed out after {budget_secs}s")]
    AgentTimeout { agent_name: String, budget_secs: u64 },

    #[error("agent {agent_name} failed: {reason}")]
    AgentFailure { agent_name: String, reason: String },

    #[error("broker rejected order: {reason}")]
    BrokerRejection { reason: String },

    #[error("persistence operation failed after {attempts} attempts: {source}")]
    PersistenceTransient {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("circuit breaker tripped: {reasons:?}")]
    CircuitBreakerTripped { reasons: Vec<String> },

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl OrchestratorError {
    /// True for the two error kinds spec §7 allows to terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrchestratorError::ConfigError(_))
    }
}
