//! Web fetch tool — GET a URL and return the body text.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use ironquill_core::error::Result;
use ironquill_core::tool::{ParamSpec, ParamType, ToolContext, ToolHandler, ToolResult, ToolSpec};

const MAX_BODY_CHARS: usize = 100_000;

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("ironquill/0.4")
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

pub fn spec() -> ToolSpec {
    let mut spec = ToolSpec::new("web_fetch", "Fetch a URL over HTTP(S) and return the body text.")
        .with_param(ParamSpec::new("url", "The URL to fetch", ParamType::String).required())
        .with_keywords(&["fetch", "url", "website", "page", "download", "http", "link", "visit"]);
    spec.timeout_ms = 30_000;
    spec
}

pub fn handler() -> Arc<dyn ToolHandler> {
    Arc::new(WebFetchTool::new())
}

#[async_trait]
impl ToolHandler for WebFetchTool {
    async fn run(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let url = args["url"].as_str().unwrap_or_default();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(ToolResult::error(format!("Unsupported URL scheme: {url}")));
        }

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(ToolResult::error(format!("Request failed: {e}"))),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();

        if status.is_success() {
            Ok(ToolResult::ok(truncated))
        } else {
            Ok(ToolResult::error(format!("HTTP {status}: {truncated}")))
        }
    }
}
