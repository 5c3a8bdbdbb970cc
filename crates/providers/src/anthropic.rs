//! Anthropic Messages API provider.
//!
//! - `x-api-key` header authentication, `anthropic-version` header
//! - System prompt as a top-level field
//! - Native tool use via `tool_use` / `tool_result` content blocks
//!   (tool results are sent in the user role, per the API)
//! - Images as base64 content blocks on user and tool messages
//! - Streaming via SSE `content_block_delta` events

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use ironquill_core::error::LlmError;
use ironquill_core::message::{Message, Role, ToolCall};
use ironquill_core::provider::{
    LlmRequest, LlmResponse, Provider, StopReason, StreamChunk, TokenUsage, ToolDefinition,
};

use crate::wire;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicProvider {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(api_key, model, Duration::from_secs(120))
    }

    pub fn with_timeout(
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key,
            model: model.into(),
            client,
        }
    }

    /// Custom base URL (for tests or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert the history into Anthropic wire format.
    ///
    /// Orphan tool results are dropped; tool results ride in the user
    /// role; images become base64 source blocks.
    fn format_messages(messages: &[Message]) -> Vec<Value> {
        let valid_ids = wire::valid_tool_call_ids(messages);
        let mut formatted = Vec::new();

        for message in messages {
            if message.role == Role::System {
                continue; // system prompt is a top-level field
            }
            if wire::is_orphan(message, &valid_ids) {
                warn!(
                    id = message.tool_call_id.as_deref().unwrap_or(""),
                    "Dropping orphan tool result"
                );
                continue;
            }

            let (role, content) = match message.role {
                Role::Tool => {
                    let inner: Value = if message.images.is_empty() {
                        Value::String(message.content.clone())
                    } else {
                        let mut blocks: Vec<Value> =
                            message.images.iter().map(image_block).collect();
                        if !message.content.is_empty() {
                            blocks.push(json!({"type": "text", "text": message.content}));
                        }
                        Value::Array(blocks)
                    };
                    (
                        "user",
                        json!([{
                            "type": "tool_result",
                            "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                            "content": inner,
                        }]),
                    )
                }
                Role::Assistant if message.has_tool_calls() => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    for call in &message.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    ("assistant", Value::Array(blocks))
                }
                _ if !message.images.is_empty() => {
                    let mut blocks: Vec<Value> = message.images.iter().map(image_block).collect();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    let role = if message.role == Role::Assistant {
                        "assistant"
                    } else {
                        "user"
                    };
                    (role, Value::Array(blocks))
                }
                Role::Assistant => ("assistant", Value::String(message.content.clone())),
                _ => ("user", Value::String(message.content.clone())),
            };

            formatted.push(json!({"role": role, "content": content}));
        }

        formatted
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect()
    }

    fn build_body(&self, request: &LlmRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": Self::format_messages(&request.messages),
            "temperature": request.temperature,
        });
        if !request.system_prompt.is_empty() {
            body["system"] = json!(request.system_prompt);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(Self::format_tools(&request.tools));
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(request.stop_sequences);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    fn parse_stop_reason(reason: &str) -> StopReason {
        match reason {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "tool_use" => StopReason::ToolUse,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        }
    }

    fn parse_response(body: &Value, fallback_model: &str) -> Result<LlmResponse, LlmError> {
        if let Some(error) = body.get("error") {
            let error_type = error["type"].as_str().unwrap_or("unknown");
            let message = error["message"].as_str().unwrap_or("unknown error");
            return Err(match error_type {
                "rate_limit_error" => LlmError::RateLimited(message.into()),
                "overloaded_error" => LlmError::ProviderUnavailable(message.into()),
                "authentication_error" => LlmError::ApiKeyMissing("anthropic".into()),
                _ => LlmError::InvalidResponse(format!("{error_type}: {message}")),
            });
        }

        let mut content = String::new();
        let mut tool_calls = Vec::new();

        if let Some(blocks) = body["content"].as_array() {
            for block in blocks {
                match block["type"].as_str() {
                    Some("text") => content.push_str(block["text"].as_str().unwrap_or("")),
                    Some("tool_use") => tool_calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        arguments: block.get("input").cloned().unwrap_or(json!({})),
                    }),
                    _ => {}
                }
            }
        }

        let stop_reason =
            Self::parse_stop_reason(body["stop_reason"].as_str().unwrap_or("end_turn"));

        let usage = TokenUsage {
            input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(LlmResponse {
            content,
            tool_calls,
            stop_reason,
            usage,
            model: body["model"]
                .as_str()
                .unwrap_or(fallback_model)
                .to_string(),
            latency: Duration::ZERO,
        })
    }

    fn status_error(status: u16, body: String) -> LlmError {
        match status {
            429 => LlmError::RateLimited(body),
            401 | 403 => LlmError::ApiKeyMissing("anthropic".into()),
            503 | 529 => LlmError::ProviderUnavailable(body),
            _ => LlmError::InvalidResponse(format!("HTTP {status}: {body}")),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_available(&self) -> bool {
        self.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::ApiKeyMissing("anthropic".into()))?;

        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request, false);

        debug!(model = %self.model, messages = request.messages.len(), "Anthropic completion request");

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(e.to_string())
                } else {
                    LlmError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let text = response.text().await.unwrap_or_default();
            warn!(status, "Anthropic API error");
            return Err(Self::status_error(status, text));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let mut result = Self::parse_response(&parsed, &self.model)?;
        result.latency = start.elapsed();
        Ok(result)
    }

    async fn stream(
        &self,
        request: LlmRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, LlmError>>, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::ApiKeyMissing("anthropic".into()))?;

        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request, true);

        debug!(model = %self.model, "Anthropic streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, text));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut current_tool_id = String::new();
            let mut current_tool_name = String::new();
            let mut tool_args_buffer = String::new();
            let mut in_tool_use = false;
            let mut usage = TokenUsage::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::StreamError(e.to_string()))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let event: Value = match serde_json::from_str(data.trim()) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, "Ignoring unparseable SSE line");
                            continue;
                        }
                    };

                    match event["type"].as_str().unwrap_or("") {
                        "message_start" => {
                            usage.input_tokens = event["message"]["usage"]["input_tokens"]
                                .as_u64()
                                .unwrap_or(0) as u32;
                        }
                        "content_block_start" => {
                            let block = &event["content_block"];
                            if block["type"].as_str() == Some("tool_use") {
                                current_tool_id =
                                    block["id"].as_str().unwrap_or("").to_string();
                                current_tool_name =
                                    block["name"].as_str().unwrap_or("").to_string();
                                tool_args_buffer.clear();
                                in_tool_use = true;
                            }
                        }
                        "content_block_delta" => {
                            let delta = &event["delta"];
                            match delta["type"].as_str().unwrap_or("") {
                                "text_delta" => {
                                    if let Some(text) = delta["text"].as_str() {
                                        let chunk = StreamChunk {
                                            content: Some(text.to_string()),
                                            ..Default::default()
                                        };
                                        if tx.send(Ok(chunk)).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                "input_json_delta" => {
                                    if let Some(partial) = delta["partial_json"].as_str() {
                                        tool_args_buffer.push_str(partial);
                                    }
                                }
                                _ => {}
                            }
                        }
                        "content_block_stop" => {
                            if in_tool_use {
                                let arguments = serde_json::from_str(&tool_args_buffer)
                                    .unwrap_or(json!({}));
                                tool_calls.push(ToolCall {
                                    id: std::mem::take(&mut current_tool_id),
                                    name: std::mem::take(&mut current_tool_name),
                                    arguments,
                                });
                                in_tool_use = false;
                            }
                        }
                        "message_delta" => {
                            if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                                usage.output_tokens = out as u32;
                            }
                        }
                        "message_stop" => {
                            let _ = tx
                                .send(Ok(StreamChunk {
                                    content: None,
                                    tool_calls: std::mem::take(&mut tool_calls),
                                    done: true,
                                    usage: Some(usage),
                                }))
                                .await;
                            return;
                        }
                        _ => {}
                    }
                }
            }

            // Stream ended without message_stop: flush what we have.
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    tool_calls,
                    done: true,
                    usage: Some(usage),
                }))
                .await;
        });

        Ok(rx)
    }
}

fn image_block(image: &ironquill_core::message::ImageContent) -> Value {
    json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": image.media_type,
            "data": image.data,
        }
    })
}
