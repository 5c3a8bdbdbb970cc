//! Tool specifications, handlers, and the registry.
//!
//! Tools are what give the agent the ability to act in the world. Each
//! tool is described by a [`ToolSpec`] and executed by a [`ToolHandler`].
//! The [`ToolRegistry`] is the single source of truth for which tools
//! exist, whether they are enabled, and the only gate between model
//! output and handler invocation (argument validation happens here).

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::{Error, Result, ToolError};
use crate::provider::ToolDefinition;

/// Parameter types a tool can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type: ty,
            required: false,
            default: None,
            enum_values: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }

    fn json_schema(&self) -> serde_json::Value {
        let mut schema = serde_json::json!({
            "type": self.param_type.as_str(),
            "description": self.description,
        });
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        if let Some(values) = &self.enum_values {
            schema["enum"] = serde_json::json!(values);
        }
        schema
    }
}

/// Declarative description of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    /// Keywords used by registry search and the tool recommender.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Per-call timeout budget.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            keywords: Vec::new(),
            requires_confirmation: false,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Emit the provider-agnostic schema for this tool.
    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<String> = Vec::new();

        for param in &self.parameters {
            properties.insert(param.name.clone(), param.json_schema());
            if param.required {
                required.push(param.name.clone());
            }
        }

        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Runtime context handed to every tool invocation.
///
/// Carries the sandbox policy and an immutable view of the resolved
/// configuration so handlers can reach credentials without global state.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub working_directory: PathBuf,
    pub allowed_paths: Vec<PathBuf>,
    pub sandbox_enabled: bool,
    pub max_output_lines: usize,
    pub config: Arc<ironquill_config::AgentConfig>,
}

impl ToolContext {
    pub fn new(config: Arc<ironquill_config::AgentConfig>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let mut allowed_paths: Vec<PathBuf> = config
            .security
            .allowed_paths
            .iter()
            .map(PathBuf::from)
            .collect();
        allowed_paths.push(cwd.clone());
        if let Ok(home) = std::env::var("HOME") {
            allowed_paths.push(PathBuf::from(home));
        }
        allowed_paths.push(PathBuf::from("/tmp"));

        Self {
            session_id: String::new(),
            working_directory: cwd,
            allowed_paths,
            sandbox_enabled: config.security.bash_sandbox,
            max_output_lines: 2000,
            config,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call id this result satisfies (filled in by the executor).
    #[serde(default)]
    pub tool_call_id: String,

    pub success: bool,

    /// The output content (or a JSON image payload when `is_image`).
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock execution time, measured by the registry.
    #[serde(default)]
    pub execution_time_ms: u64,

    /// Whether `content` is a JSON image payload (base64 + media type).
    #[serde(default)]
    pub is_image: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            tool_call_id: String::new(),
            success: true,
            content: content.into(),
            error: None,
            execution_time_ms: 0,
            is_image: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            tool_call_id: String::new(),
            success: false,
            content: message.clone(),
            error: Some(message),
            execution_time_ms: 0,
            is_image: false,
        }
    }

    pub fn image(payload: impl Into<String>) -> Self {
        let mut result = Self::ok(payload);
        result.is_image = true;
        result
    }
}

/// A tool implementation. Handlers are opaque to the core: they receive
/// validated arguments and a context, and may fail any way they like —
/// the registry folds every failure into `ToolExecutionFailed`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult>;
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
    enabled: bool,
    #[allow(dead_code)]
    source: String,
}

/// The registry of available tools.
///
/// Reads and writes both take the internal mutex; the lock is never held
/// across a handler invocation.
pub struct ToolRegistry {
    tools: Mutex<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
        }
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(
        &self,
        spec: ToolSpec,
        handler: Arc<dyn ToolHandler>,
        source: impl Into<String>,
    ) -> Result<()> {
        let mut tools = self.tools.lock().unwrap();
        if tools.contains_key(&spec.name) {
            return Err(Error::AlreadyExists(spec.name));
        }
        tools.insert(
            spec.name.clone(),
            RegisteredTool {
                spec,
                handler,
                enabled: true,
                source: source.into(),
            },
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut tools = self.tools.lock().unwrap();
        tools
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::Tool(ToolError::NotFound(name.into())))
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut tools = self.tools.lock().unwrap();
        match tools.get_mut(name) {
            Some(tool) => {
                tool.enabled = enabled;
                Ok(())
            }
            None => Err(Error::Tool(ToolError::NotFound(name.into()))),
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        let tools = self.tools.lock().unwrap();
        tools.get(name).map(|t| t.enabled).unwrap_or(false)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.lock().unwrap().contains_key(name)
    }

    pub fn get_spec(&self, name: &str) -> Option<ToolSpec> {
        let tools = self.tools.lock().unwrap();
        tools.get(name).map(|t| t.spec.clone())
    }

    pub fn all_specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.lock().unwrap();
        tools.values().map(|t| t.spec.clone()).collect()
    }

    pub fn enabled_specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.lock().unwrap();
        tools
            .values()
            .filter(|t| t.enabled)
            .map(|t| t.spec.clone())
            .collect()
    }

    pub fn enabled_names(&self) -> Vec<String> {
        let tools = self.tools.lock().unwrap();
        let mut names: Vec<String> = tools
            .values()
            .filter(|t| t.enabled)
            .map(|t| t.spec.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Provider-agnostic schemas for all enabled tools.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut specs = self.enabled_specs();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs.iter().map(|s| s.to_definition()).collect()
    }

    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.get_spec(name)
            .map(|s| s.requires_confirmation)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tools.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate arguments against a spec.
    ///
    /// Required parameters must be present; supplied values must match
    /// the declared type; enum-constrained strings must be members.
    /// Unknown arguments are a warning, not an error.
    pub fn validate_args(spec: &ToolSpec, args: &serde_json::Value) -> Result<()> {
        let obj = args.as_object();

        for param in &spec.parameters {
            let value = obj.and_then(|m| m.get(&param.name));

            match value {
                None => {
                    if param.required {
                        return Err(Error::Tool(ToolError::ValidationFailed {
                            tool: spec.name.clone(),
                            reason: format!("missing required parameter '{}'", param.name),
                        }));
                    }
                }
                Some(value) => {
                    if !param.param_type.matches(value) {
                        return Err(Error::Tool(ToolError::ValidationFailed {
                            tool: spec.name.clone(),
                            reason: format!(
                                "parameter '{}' expected {}, got {}",
                                param.name,
                                param.param_type.as_str(),
                                json_kind(value)
                            ),
                        }));
                    }
                    if let (Some(allowed), Some(s)) = (&param.enum_values, value.as_str()) {
                        if !allowed.iter().any(|a| a == s) {
                            return Err(Error::Tool(ToolError::ValidationFailed {
                                tool: spec.name.clone(),
                                reason: format!(
                                    "parameter '{}' value '{}' not in {:?}",
                                    param.name, s, allowed
                                ),
                            }));
                        }
                    }
                }
            }
        }

        if let Some(map) = obj {
            for key in map.keys() {
                if !spec.parameters.iter().any(|p| &p.name == key) {
                    warn!(tool = %spec.name, argument = %key, "Unknown tool argument");
                }
            }
        }

        Ok(())
    }

    /// Look up, validate, and invoke a tool.
    ///
    /// This is the only path from model output to handler code. The
    /// handler runs outside the registry lock; its wall-time is recorded
    /// on the result. Handler panics become `ToolExecutionFailed`.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult> {
        let (spec, handler) = {
            let tools = self.tools.lock().unwrap();
            let tool = tools
                .get(name)
                .ok_or_else(|| Error::Tool(ToolError::NotFound(name.into())))?;
            if !tool.enabled {
                return Err(Error::Tool(ToolError::Disabled(name.into())));
            }
            (tool.spec.clone(), Arc::clone(&tool.handler))
        };

        Self::validate_args(&spec, &args)?;

        let start = Instant::now();
        let outcome = AssertUnwindSafe(handler.run(args, ctx)).catch_unwind().await;
        let elapsed = start.elapsed();

        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                return Err(Error::Tool(ToolError::ExecutionFailed {
                    tool: name.into(),
                    reason: e.to_string(),
                }))
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".into());
                return Err(Error::Tool(ToolError::ExecutionFailed {
                    tool: name.into(),
                    reason,
                }));
            }
        };

        result.execution_time_ms = elapsed.as_millis() as u64;
        Ok(result)
    }

    /// Token-overlap search over enabled tools.
    ///
    /// Name hits weigh 10, keyword hits 5, description hits 2.
    pub fn search(&self, query: &str) -> Vec<ToolSpec> {
        let query_words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        let tools = self.tools.lock().unwrap();
        let mut scored: Vec<(u32, ToolSpec)> = Vec::new();

        for tool in tools.values().filter(|t| t.enabled) {
            let mut score = 0u32;
            let name = tool.spec.name.to_lowercase();
            let description = tool.spec.description.to_lowercase();

            for word in &query_words {
                if name.contains(word) {
                    score += 10;
                }
                for keyword in &tool.spec.keywords {
                    if keyword.to_lowercase().contains(word) {
                        score += 5;
                    }
                }
                if description.contains(word) {
                    score += 2;
                }
            }

            if score > 0 {
                scored.push((score, tool.spec.clone()));
            }
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        scored.into_iter().map(|(_, spec)| spec).collect()
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn run(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
            let text = args["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::ok(text))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl ToolHandler for PanicHandler {
        async fn run(&self, _args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
            panic!("boom");
        }
    }

    fn echo_spec() -> ToolSpec {
        ToolSpec::new("echo", "Echoes back the input text.")
            .with_param(ParamSpec::new("text", "Text to echo", ParamType::String).required())
            .with_keywords(&["echo", "repeat"])
    }

    fn test_ctx() -> ToolContext {
        ToolContext::new(Arc::new(ironquill_config::AgentConfig::default()))
    }

    #[test]
    fn register_and_lookup() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_spec(), Arc::new(EchoHandler), "builtin")
            .unwrap();
        assert!(registry.has_tool("echo"));
        assert!(registry.get_spec("missing").is_none());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_spec(), Arc::new(EchoHandler), "builtin")
            .unwrap();
        let err = registry
            .register(echo_spec(), Arc::new(EchoHandler), "builtin")
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn enable_disable() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_spec(), Arc::new(EchoHandler), "builtin")
            .unwrap();
        assert!(registry.is_enabled("echo"));
        registry.disable("echo").unwrap();
        assert!(!registry.is_enabled("echo"));
        assert!(registry.enabled_specs().is_empty());
        registry.enable("echo").unwrap();
        assert_eq!(registry.enabled_specs().len(), 1);
    }

    #[test]
    fn definition_shape() {
        let def = echo_spec().to_definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.parameters["type"], "object");
        assert_eq!(def.parameters["required"], serde_json::json!(["text"]));
        assert!(def.parameters["properties"]["text"].is_object());
    }

    #[test]
    fn validation_missing_required() {
        let err =
            ToolRegistry::validate_args(&echo_spec(), &serde_json::json!({})).unwrap_err();
        assert!(matches!(
            err,
            Error::Tool(ToolError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn validation_wrong_type() {
        let err = ToolRegistry::validate_args(&echo_spec(), &serde_json::json!({"text": 42}))
            .unwrap_err();
        assert!(err.to_string().contains("expected string"));
    }

    #[test]
    fn validation_enum_membership() {
        let spec = ToolSpec::new("mode_tool", "Tool with a mode.").with_param(
            ParamSpec::new("mode", "Operating mode", ParamType::String)
                .required()
                .with_enum(vec!["fast".into(), "slow".into()]),
        );

        assert!(ToolRegistry::validate_args(&spec, &serde_json::json!({"mode": "fast"})).is_ok());
        assert!(
            ToolRegistry::validate_args(&spec, &serde_json::json!({"mode": "medium"})).is_err()
        );
    }

    #[test]
    fn validation_unknown_args_are_ok() {
        let args = serde_json::json!({"text": "hi", "extra": true});
        assert!(ToolRegistry::validate_args(&echo_spec(), &args).is_ok());
    }

    #[tokio::test]
    async fn execute_happy_path() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_spec(), Arc::new(EchoHandler), "builtin")
            .unwrap();

        let result = registry
            .execute("echo", serde_json::json!({"text": "hello"}), &test_ctx())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn execute_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("ghost", serde_json::json!({}), &test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(ToolError::NotFound(_))));
    }

    #[tokio::test]
    async fn execute_disabled_tool() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_spec(), Arc::new(EchoHandler), "builtin")
            .unwrap();
        registry.disable("echo").unwrap();

        let err = registry
            .execute("echo", serde_json::json!({"text": "hi"}), &test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(ToolError::Disabled(_))));
    }

    #[tokio::test]
    async fn handler_panic_becomes_execution_failed() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("bomb", "Always panics."),
                Arc::new(PanicHandler),
                "builtin",
            )
            .unwrap();

        let err = registry
            .execute("bomb", serde_json::json!({}), &test_ctx())
            .await
            .unwrap_err();
        match err {
            Error::Tool(ToolError::ExecutionFailed { reason, .. }) => {
                assert!(reason.contains("boom"));
            }
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[test]
    fn search_ranks_name_over_keyword_over_description() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("grep", "Search file contents for a pattern.")
                    .with_keywords(&["search", "pattern", "match"]),
                Arc::new(EchoHandler),
                "builtin",
            )
            .unwrap();
        registry
            .register(
                ToolSpec::new("web_search", "Query the web.")
                    .with_keywords(&["web", "internet"]),
                Arc::new(EchoHandler),
                "builtin",
            )
            .unwrap();
        registry
            .register(
                ToolSpec::new("file_read", "Read a file; can search inside it later.")
                    .with_keywords(&["read", "file"]),
                Arc::new(EchoHandler),
                "builtin",
            )
            .unwrap();

        let results = registry.search("search");
        assert_eq!(results[0].name, "web_search"); // name + keyword hit
        assert_eq!(results[1].name, "grep"); // keyword + description
        assert_eq!(results[2].name, "file_read"); // description only
    }
}
