//! Common capability set every agent is polymorphic over: read `CycleState`,
//! optionally call the LLM Router, emit a structured `AgentPayload` (§4.5).

use std::time::Duration;

use async_trait::async_trait;

use super::output::AgentPayload;
use super::state::CycleState;

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Exceptions/failures must NOT propagate out of the graph — callers
    /// catch `Err` and fold it into `AgentOutput::error` (§9).
    async fn run(&self, state: &CycleState) -> anyhow::Result<AgentPayload>;

    fn timeout(&self) -> Duration {
        DEFAULT_AGENT_TIMEOUT
    }
}
