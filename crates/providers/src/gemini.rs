//! Google Gemini provider.
//!
//! - API key as a query parameter on `generateContent`
//! - System prompt via `system_instruction`
//! - Tools as `function_declarations`; tool calls arrive as
//!   `functionCall` parts and results go back as `functionResponse`
//!   parts keyed by function name (Gemini has no call ids, so ours are
//!   generated locally)
//! - No SSE here: streaming uses the default post-hoc chunking.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use ironquill_core::error::LlmError;
use ironquill_core::id;
use ironquill_core::message::{Message, Role, ToolCall};
use ironquill_core::provider::{
    LlmRequest, LlmResponse, Provider, StopReason, TokenUsage, ToolDefinition,
};

use crate::wire;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
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

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert the history into Gemini `contents`.
    ///
    /// Orphans are dropped; tool results become `functionResponse`
    /// parts in the user role, keyed by the original function name.
    fn format_messages(messages: &[Message]) -> Vec<Value> {
        let valid_ids = wire::valid_tool_call_ids(messages);
        let call_names = wire::tool_call_names(messages);
        let mut contents = Vec::new();

        for message in messages {
            if message.role == Role::System {
                continue;
            }
            if wire::is_orphan(message, &valid_ids) {
                warn!(
                    id = message.tool_call_id.as_deref().unwrap_or(""),
                    "Dropping orphan tool result"
                );
                continue;
            }

            match message.role {
                Role::Tool => {
                    let call_id = message.tool_call_id.clone().unwrap_or_default();
                    let name = call_names
                        .get(&call_id)
                        .cloned()
                        .unwrap_or_else(|| "unknown".into());
                    contents.push(json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": name,
                                "response": {"content": message.content},
                            }
                        }]
                    }));
                }
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !message.content.is_empty() {
                        parts.push(json!({"text": message.content}));
                    }
                    for call in &message.tool_calls {
                        parts.push(json!({
                            "functionCall": {
                                "name": call.name,
                                "args": call.arguments,
                            }
                        }));
                    }
                    if parts.is_empty() {
                        parts.push(json!({"text": ""}));
                    }
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                _ => {
                    let mut parts = Vec::new();
                    for image in &message.images {
                        parts.push(json!({
                            "inline_data": {
                                "mime_type": image.media_type,
                                "data": image.data,
                            }
                        }));
                    }
                    if !message.content.is_empty() || parts.is_empty() {
                        parts.push(json!({"text": message.content}));
                    }
                    contents.push(json!({"role": "user", "parts": parts}));
                }
            }
        }

        contents
    }

    fn format_tools(tools: &[ToolDefinition]) -> Value {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        json!([{"function_declarations": declarations}])
    }

    fn parse_finish_reason(reason: &str, has_calls: bool) -> StopReason {
        if has_calls {
            return StopReason::ToolUse;
        }
        match reason {
            "MAX_TOKENS" => StopReason::MaxTokens,
            "STOP" => StopReason::EndTurn,
            _ => StopReason::EndTurn,
        }
    }

    fn parse_response(body: &Value, model: &str) -> Result<LlmResponse, LlmError> {
        if let Some(error) = body.get("error") {
            let code = error["code"].as_u64().unwrap_or(0);
            let message = error["message"].as_str().unwrap_or("unknown error");
            return Err(match code {
                429 => LlmError::RateLimited(message.into()),
                401 | 403 => LlmError::ApiKeyMissing("gemini".into()),
                503 => LlmError::ProviderUnavailable(message.into()),
                _ => LlmError::InvalidResponse(format!("code {code}: {message}")),
            });
        }

        let candidate = body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| LlmError::InvalidResponse("no candidates in response".into()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();

        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    content.push_str(text);
                }
                if let Some(call) = part.get("functionCall") {
                    tool_calls.push(ToolCall {
                        id: id::new_id("call"),
                        name: call["name"].as_str().unwrap_or("").to_string(),
                        arguments: call.get("args").cloned().unwrap_or(json!({})),
                    });
                }
            }
        }

        let stop_reason = Self::parse_finish_reason(
            candidate["finishReason"].as_str().unwrap_or("STOP"),
            !tool_calls.is_empty(),
        );

        let usage = TokenUsage {
            input_tokens: body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            output_tokens: body["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap_or(0) as u32,
        };

        Ok(LlmResponse {
            content,
            tool_calls,
            stop_reason,
            usage,
            model: model.to_string(),
            latency: Duration::ZERO,
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn is_available(&self) -> bool {
        self.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::ApiKeyMissing("gemini".into()))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );

        let mut body = json!({
            "contents": Self::format_messages(&request.messages),
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });
        if !request.system_prompt.is_empty() {
            body["system_instruction"] = json!({"parts": [{"text": request.system_prompt}]});
        }
        if !request.tools.is_empty() {
            body["tools"] = Self::format_tools(&request.tools);
        }
        if !request.stop_sequences.is_empty() {
            body["generationConfig"]["stopSequences"] = json!(request.stop_sequences);
        }

        debug!(model = %self.model, messages = request.messages.len(), "Gemini completion request");

        let start = Instant::now();
        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(e.to_string())
            } else {
                LlmError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if status == 429 {
            return Err(LlmError::RateLimited(parsed.to_string()));
        }
        if status == 503 {
            return Err(LlmError::ProviderUnavailable(parsed.to_string()));
        }

        let mut result = Self::parse_response(&parsed, &self.model)?;
        result.latency = start.elapsed();
        Ok(result)
    }
}
