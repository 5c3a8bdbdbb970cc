//! # ironquill providers
//!
//! LLM provider adapters and the failover gateway. All adapters
//! implement `ironquill_core::Provider`; the gateway layers primary/
//! fallback selection, usage stats, and streaming accumulation on top.

pub mod anthropic;
pub mod gateway;
pub mod gemini;
pub mod wire;

pub use anthropic::AnthropicProvider;
pub use gateway::{LlmGateway, UsageStats};
pub use gemini::GeminiProvider;
