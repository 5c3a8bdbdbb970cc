//! LlmGateway — provider selection, failover, and usage accounting.
//!
//! Holds three provider handles: primary, optional fallback, optional
//! summarizer (same vendor as primary, different model). Failover rule:
//! try the primary; on a retriable error, retry exactly once on the
//! fallback if it exists and is available. Non-retriable errors
//! propagate immediately. Multi-step backoff is deliberately absent.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use ironquill_config::AgentConfig;
use ironquill_core::error::LlmError;
use ironquill_core::provider::{LlmRequest, LlmResponse, Provider, StopReason};

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;

/// Aggregate request statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub requests: u64,
    pub failures: u64,
    pub total_latency: Duration,
}

pub struct LlmGateway {
    primary: Arc<dyn Provider>,
    fallback: Option<Arc<dyn Provider>>,
    summarizer: Option<Arc<dyn Provider>>,
    stats: Mutex<UsageStats>,
}

impl LlmGateway {
    pub fn new(
        primary: Arc<dyn Provider>,
        fallback: Option<Arc<dyn Provider>>,
        summarizer: Option<Arc<dyn Provider>>,
    ) -> Self {
        Self {
            primary,
            fallback,
            summarizer,
            stats: Mutex::new(UsageStats::default()),
        }
    }

    /// Build providers from configuration. The summarizer reuses the
    /// primary vendor with the configured summarizer model.
    pub fn from_config(config: &AgentConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_millis(config.llm.timeout_ms);

        let primary = make_provider(
            &config.llm.primary_provider,
            &config.llm.primary_model,
            config,
            timeout,
        )?;

        let fallback = if config.llm.fallback_provider.is_empty() {
            None
        } else {
            make_provider(
                &config.llm.fallback_provider,
                &config.llm.fallback_model,
                config,
                timeout,
            )
            .ok()
        };

        let summarizer = if config.llm.summarizer_model.is_empty() {
            None
        } else {
            make_provider(
                &config.llm.primary_provider,
                &config.llm.summarizer_model,
                config,
                timeout,
            )
            .ok()
        };

        Ok(Self::new(primary, fallback, summarizer))
    }

    pub fn is_available(&self) -> bool {
        self.primary.is_available()
            || self
                .fallback
                .as_ref()
                .map(|f| f.is_available())
                .unwrap_or(false)
    }

    /// The provider used for summarization; falls back to the primary.
    pub fn summarizer(&self) -> Arc<dyn Provider> {
        self.summarizer
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.primary))
    }

    /// Complete with single-retry failover.
    pub async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        if self.primary.is_available() {
            match self.primary.complete(request.clone()).await {
                Ok(response) => {
                    self.record_request(&response);
                    return Ok(response);
                }
                Err(e) if e.is_retriable() && self.fallback_available() => {
                    warn!(error = %e, "Primary provider failed, retrying on fallback");
                    return self.complete_on_fallback(request).await;
                }
                Err(e) => {
                    self.record_failure();
                    return Err(e);
                }
            }
        }

        if self.fallback_available() {
            info!("Primary provider unavailable, using fallback");
            return self.complete_on_fallback(request).await;
        }

        Err(LlmError::ProviderUnavailable(
            "no provider is available".into(),
        ))
    }

    async fn complete_on_fallback(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let fallback = self.fallback.as_ref().expect("fallback checked by caller");
        match fallback.complete(request).await {
            Ok(response) => {
                self.record_request(&response);
                Ok(response)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Stream with the same failover rule applied to stream initiation.
    ///
    /// Text chunks are forwarded to `on_chunk`; the fully accumulated
    /// response is returned at stream end. A mid-stream error surfaces
    /// as `StreamError` without retry (chunks were already delivered).
    pub async fn stream<F>(
        &self,
        request: LlmRequest,
        mut on_chunk: F,
    ) -> Result<LlmResponse, LlmError>
    where
        F: FnMut(&str) + Send,
    {
        let start = Instant::now();

        let (provider, rx) = match self.open_stream(request).await {
            Ok(pair) => pair,
            Err(e) => {
                self.record_failure();
                return Err(e);
            }
        };
        let mut rx = rx;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = None;

        while let Some(chunk) = rx.recv().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    self.record_failure();
                    return Err(LlmError::StreamError(e.to_string()));
                }
            };
            if let Some(text) = &chunk.content {
                content.push_str(text);
                on_chunk(text);
            }
            if chunk.done {
                tool_calls = chunk.tool_calls;
                usage = chunk.usage;
            }
        }

        let stop_reason = if tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };

        let response = LlmResponse {
            content,
            tool_calls,
            stop_reason,
            usage: usage.unwrap_or_default(),
            model: provider.name().to_string(),
            latency: start.elapsed(),
        };
        self.record_request(&response);
        Ok(response)
    }

    async fn open_stream(
        &self,
        request: LlmRequest,
    ) -> Result<
        (
            Arc<dyn Provider>,
            tokio::sync::mpsc::Receiver<Result<ironquill_core::provider::StreamChunk, LlmError>>,
        ),
        LlmError,
    > {
        if self.primary.is_available() {
            match self.primary.stream(request.clone()).await {
                Ok(rx) => return Ok((Arc::clone(&self.primary), rx)),
                Err(e) if e.is_retriable() && self.fallback_available() => {
                    warn!(error = %e, "Primary stream failed to start, retrying on fallback");
                }
                Err(e) => return Err(e),
            }
        } else if !self.fallback_available() {
            return Err(LlmError::ProviderUnavailable(
                "no provider is available".into(),
            ));
        }

        let fallback = self
            .fallback
            .as_ref()
            .ok_or_else(|| LlmError::ProviderUnavailable("no fallback configured".into()))?;
        let rx = fallback.stream(request).await?;
        Ok((Arc::clone(fallback), rx))
    }

    fn fallback_available(&self) -> bool {
        self.fallback
            .as_ref()
            .map(|f| f.is_available())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> UsageStats {
        *self.stats.lock().unwrap()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap() = UsageStats::default();
    }

    fn record_request(&self, response: &LlmResponse) {
        let mut stats = self.stats.lock().unwrap();
        stats.total_input_tokens += response.usage.input_tokens as u64;
        stats.total_output_tokens += response.usage.output_tokens as u64;
        stats.total_latency += response.latency;
        stats.requests += 1;
        debug!(
            requests = stats.requests,
            input = stats.total_input_tokens,
            output = stats.total_output_tokens,
            "Gateway request recorded"
        );
    }

    fn record_failure(&self) {
        self.stats.lock().unwrap().failures += 1;
    }
}

fn make_provider(
    name: &str,
    model: &str,
    config: &AgentConfig,
    timeout: Duration,
) -> Result<Arc<dyn Provider>, LlmError> {
    match name {
        "anthropic" | "claude" => Ok(Arc::new(AnthropicProvider::with_timeout(
            config.api_keys.anthropic.clone(),
            model,
            timeout,
        ))),
        "gemini" | "google" => Ok(Arc::new(GeminiProvider::with_timeout(
            config.api_keys.google.clone(),
            model,
            timeout,
        ))),
        other => Err(LlmError::ProviderUnavailable(format!(
            "unknown provider '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ironquill_core::provider::TokenUsage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SuccessProvider {
        name: String,
        calls: AtomicUsize,
    }

    impl SuccessProvider {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for SuccessProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LlmResponse {
                content: format!("answer from {}", self.name),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
                model: self.name.clone(),
                latency: Duration::from_millis(3),
            })
        }
    }

    struct FailingProvider {
        error: LlmError,
        calls: AtomicUsize,
    }

    impl FailingProvider {
        fn new(error: LlmError) -> Arc<Self> {
            Arc::new(Self {
                error,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    struct UnavailableProvider;

    #[async_trait]
    impl Provider for UnavailableProvider {
        fn name(&self) -> &str {
            "offline"
        }

        fn is_available(&self) -> bool {
            false
        }

        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            panic!("must not be called");
        }
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let primary = SuccessProvider::new("primary");
        let fallback = SuccessProvider::new("fallback");
        let gateway = LlmGateway::new(primary.clone(), Some(fallback.clone()), None);

        let response = gateway.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "answer from primary");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
        assert_eq!(gateway.stats().requests, 1);
    }

    #[tokio::test]
    async fn retriable_error_triggers_single_fallback() {
        let primary = FailingProvider::new(LlmError::RateLimited("429".into()));
        let fallback = SuccessProvider::new("fallback");
        let gateway = LlmGateway::new(primary.clone(), Some(fallback.clone()), None);

        let response = gateway.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "answer from fallback");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn non_retriable_error_propagates_immediately() {
        let primary = FailingProvider::new(LlmError::InvalidResponse("bad json".into()));
        let fallback = SuccessProvider::new("fallback");
        let gateway = LlmGateway::new(primary.clone(), Some(fallback.clone()), None);

        let err = gateway.complete(LlmRequest::default()).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
        assert_eq!(fallback.calls(), 0);
        assert_eq!(gateway.stats().failures, 1);
    }

    #[tokio::test]
    async fn fallback_failure_surfaces_fallback_error() {
        let primary = FailingProvider::new(LlmError::ConnectionFailed("refused".into()));
        let fallback = FailingProvider::new(LlmError::RateLimited("also 429".into()));
        let gateway = LlmGateway::new(primary.clone(), Some(fallback.clone()), None);

        let err = gateway.complete(LlmRequest::default()).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
        // Exactly one retry: the fallback's failure is final.
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn unavailable_primary_goes_straight_to_fallback() {
        let fallback = SuccessProvider::new("fallback");
        let gateway = LlmGateway::new(Arc::new(UnavailableProvider), Some(fallback.clone()), None);

        let response = gateway.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "answer from fallback");
    }

    #[tokio::test]
    async fn no_provider_available_errors() {
        let gateway = LlmGateway::new(Arc::new(UnavailableProvider), None, None);
        let err = gateway.complete(LlmRequest::default()).await.unwrap_err();
        assert!(matches!(err, LlmError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn stats_accumulate_across_requests() {
        let primary = SuccessProvider::new("primary");
        let gateway = LlmGateway::new(primary, None, None);

        gateway.complete(LlmRequest::default()).await.unwrap();
        gateway.complete(LlmRequest::default()).await.unwrap();

        let stats = gateway.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.total_input_tokens, 20);
        assert_eq!(stats.total_output_tokens, 10);

        gateway.reset_stats();
        assert_eq!(gateway.stats().requests, 0);
    }

    #[tokio::test]
    async fn stream_accumulates_chunks_into_final_response() {
        let primary = SuccessProvider::new("primary");
        let gateway = LlmGateway::new(primary, None, None);

        let mut seen = String::new();
        let response = gateway
            .stream(LlmRequest::default(), |chunk| seen.push_str(chunk))
            .await
            .unwrap();

        assert_eq!(seen, "answer from primary");
        assert_eq!(response.content, seen);
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(gateway.stats().requests, 1);
    }

    #[tokio::test]
    async fn stream_initiation_fails_over() {
        let primary = FailingProvider::new(LlmError::ProviderUnavailable("overloaded".into()));
        let fallback = SuccessProvider::new("fallback");
        let gateway = LlmGateway::new(primary, Some(fallback), None);

        let response = gateway.stream(LlmRequest::default(), |_| {}).await.unwrap();
        assert_eq!(response.content, "answer from fallback");
    }

    #[tokio::test]
    async fn summarizer_defaults_to_primary() {
        let primary = SuccessProvider::new("primary");
        let gateway = LlmGateway::new(primary, None, None);
        assert_eq!(gateway.summarizer().name(), "primary");

        let primary = SuccessProvider::new("primary");
        let summarizer = SuccessProvider::new("summarizer");
        let gateway = LlmGateway::new(primary, None, Some(summarizer));
        assert_eq!(gateway.summarizer().name(), "summarizer");
    }

    #[test]
    fn from_config_rejects_unknown_provider() {
        let mut config = AgentConfig::default();
        config.llm.primary_provider = "martian".into();
        assert!(LlmGateway::from_config(&config).is_err());
    }
}
