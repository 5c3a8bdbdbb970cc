//! # ironquill agent
//!
//! The orchestrator that ties the runtime together: per-turn context
//! assembly under a token budget, LLM calls through the failover
//! gateway, validated tool dispatch with results appended in call
//! order, episode recording, and opportunistic recommender training.

pub mod context;
pub mod orchestrator;

pub use context::{ContextBuilder, ContextManager, ContextWindow};
pub use orchestrator::{AgentState, Orchestrator, StreamCallback};
