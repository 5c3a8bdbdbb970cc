//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a prepared request to an LLM and get a
//! response back, either complete or as a stream of chunks. The gateway
//! layers failover on top without knowing which vendor it is talking to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;
use crate::message::{Message, ToolCall};

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
    Error,
}

/// Token usage for a single request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A provider-agnostic tool schema sent to the LLM.
///
/// `parameters` is a JSON Schema object; adapters may rename the outer
/// key (e.g. `input_schema`) but must preserve the semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A fully assembled request for one LLM call.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// System prompt (sent as a top-level field where the API supports it).
    pub system_prompt: String,

    /// Ordered conversation messages.
    pub messages: Vec<Message>,

    /// Tool schemas the model may call.
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,

    /// Stop sequences.
    pub stop_sequences: Vec<String>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: 0.7,
            stop_sequences: Vec::new(),
        }
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated text content.
    pub content: String,

    /// Tool calls the model wants executed.
    pub tool_calls: Vec<ToolCall>,

    /// Normalized stop reason.
    pub stop_reason: StopReason,

    /// Token usage.
    pub usage: TokenUsage,

    /// Which model actually responded.
    pub model: String,

    /// Wall-clock latency of the request.
    pub latency: Duration,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Partial text delta.
    pub content: Option<String>,

    /// Tool calls, delivered on the final chunk.
    pub tool_calls: Vec<ToolCall>,

    /// Whether this is the final chunk.
    pub done: bool,

    /// Usage info (typically only on the final chunk).
    pub usage: Option<TokenUsage>,
}

/// The core Provider trait.
///
/// Implementations: Anthropic, Gemini. The gateway calls `complete()` or
/// `stream()` without knowing which vendor is behind the handle.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Whether the provider has credentials and can be called.
    fn is_available(&self) -> bool;

    /// Send a request and wait for the complete response.
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Send a request and receive response chunks.
    ///
    /// The default implementation pseudo-streams: it calls `complete()`
    /// and chunks the finished text. Providers with native server-sent
    /// events override this. Consumers must only rely on the final
    /// concatenation, not the chunk boundaries.
    async fn stream(
        &self,
        request: LlmRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, LlmError>>, LlmError> {
        const CHUNK_CHARS: usize = 80;

        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(16);

        tokio::spawn(async move {
            let chars: Vec<char> = response.content.chars().collect();
            for piece in chars.chunks(CHUNK_CHARS) {
                let chunk = StreamChunk {
                    content: Some(piece.iter().collect()),
                    ..Default::default()
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    tool_calls: response.tool_calls,
                    done: true,
                    usage: Some(response.usage),
                }))
                .await;
        });

        Ok(rx)
    }
}
