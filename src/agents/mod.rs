//! Agent Graph (C5): the pipeline of analyst/researcher/portfolio-manager/
//! risk/execution/learning stages that turns a market snapshot into a
//! trading decision (§4.5).

pub mod agent_trait;
pub mod analyst;
pub mod dsl;
pub mod execution;
pub mod graph;
pub mod learning;
pub mod output;
pub mod portfolio_manager;
pub mod researcher;
pub mod risk;
pub mod state;

pub use agent_trait::Agent;
pub use graph::{AgentGraph, CycleOutcome};
pub use output::{AgentOutput, AgentPayload, AgentStatus};
pub use state::CycleState;
