//! LLM Router (C4).

pub mod provider;
pub mod router;

pub use router::{CallResult, LlmRouter};
