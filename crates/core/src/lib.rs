//! # ironquill core
//!
//! Domain types, traits, and the error taxonomy for the ironquill agent
//! runtime. Every subsystem is defined here as types or traits;
//! implementations live in their respective crates, all depending inward
//! on this one.

pub mod error;
pub mod event;
pub mod id;
pub mod message;
pub mod provider;
pub mod tool;

pub use error::{ContextError, Error, LlmError, MemoryError, Result, ToolError, TrmError};
pub use event::{AgentEvent, EventBus};
pub use message::{ImageContent, Message, Role, ToolCall};
pub use provider::{
    LlmRequest, LlmResponse, Provider, StopReason, StreamChunk, TokenUsage, ToolDefinition,
};
pub use tool::{
    ParamSpec, ParamType, ToolContext, ToolHandler, ToolRegistry, ToolResult, ToolSpec,
};
