//! Memory tools — let the model store and recall durable facts.
//!
//! Facts live in cross-thread memory under the "facts" namespace by
//! default, so they survive the session. Recall also surfaces matching
//! past episodes.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use ironquill_core::error::Result;
use ironquill_core::tool::{ParamSpec, ParamType, ToolContext, ToolHandler, ToolResult, ToolSpec};
use ironquill_memory::MemoryManager;

const DEFAULT_NAMESPACE: &str = "facts";

pub struct MemoryStoreTool {
    memory: Arc<Mutex<MemoryManager>>,
}

pub struct MemoryRecallTool {
    memory: Arc<Mutex<MemoryManager>>,
}

pub fn store_spec() -> ToolSpec {
    ToolSpec::new(
        "memory_store",
        "Store a fact in durable memory so it can be recalled in later sessions.",
    )
    .with_param(ParamSpec::new("key", "Name of the fact", ParamType::String).required())
    .with_param(ParamSpec::new("value", "The fact content", ParamType::String).required())
    .with_param(ParamSpec::new(
        "namespace",
        "Grouping namespace (defaults to 'facts')",
        ParamType::String,
    ))
    .with_keywords(&["remember", "store", "save", "note", "memorize", "fact"])
}

pub fn recall_spec() -> ToolSpec {
    ToolSpec::new(
        "memory_recall",
        "Recall a stored fact by key, or search past episodes by query.",
    )
    .with_param(ParamSpec::new("key", "Name of the fact to recall", ParamType::String))
    .with_param(ParamSpec::new(
        "query",
        "Free-text search over past task episodes",
        ParamType::String,
    ))
    .with_param(ParamSpec::new(
        "namespace",
        "Grouping namespace (defaults to 'facts')",
        ParamType::String,
    ))
    .with_keywords(&["recall", "remember", "retrieve", "memory", "past", "previous"])
}

pub fn store_handler(memory: Arc<Mutex<MemoryManager>>) -> Arc<dyn ToolHandler> {
    Arc::new(MemoryStoreTool { memory })
}

pub fn recall_handler(memory: Arc<Mutex<MemoryManager>>) -> Arc<dyn ToolHandler> {
    Arc::new(MemoryRecallTool { memory })
}

#[async_trait]
impl ToolHandler for MemoryStoreTool {
    async fn run(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let key = args["key"].as_str().unwrap_or_default().to_string();
        let value = args["value"].as_str().unwrap_or_default().to_string();
        let namespace = args["namespace"]
            .as_str()
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_string();

        let mut memory = self.memory.lock().unwrap();
        memory.store_fact(&namespace, &key, serde_json::Value::String(value));
        Ok(ToolResult::ok(format!("Stored fact '{key}' in '{namespace}'")))
    }
}

#[async_trait]
impl ToolHandler for MemoryRecallTool {
    async fn run(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let namespace = args["namespace"].as_str().unwrap_or(DEFAULT_NAMESPACE);
        let memory = self.memory.lock().unwrap();

        if let Some(key) = args["key"].as_str() {
            return Ok(match memory.retrieve_fact(namespace, key) {
                Some(value) => {
                    let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                    ToolResult::ok(text)
                }
                None => ToolResult::error(format!("No fact stored under '{key}' in '{namespace}'")),
            });
        }

        if let Some(query) = args["query"].as_str() {
            let episodes = memory.retrieve_episodes(query, 3);
            if episodes.is_empty() {
                return Ok(ToolResult::ok("No matching past episodes.".to_string()));
            }
            let mut out = String::new();
            for episode in episodes {
                out.push_str(&format!(
                    "- {} ({}, {} tools)\n",
                    episode.task_description,
                    if episode.outcome.success { "succeeded" } else { "failed" },
                    episode.outcome.tools_used,
                ));
            }
            return Ok(ToolResult::ok(out));
        }

        let keys = memory.list_fact_keys(namespace);
        Ok(ToolResult::ok(format!(
            "Known facts in '{namespace}': {}",
            keys.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironquill_config::{AgentConfig, MemoryConfig};

    fn setup(dir: &std::path::Path) -> (Arc<Mutex<MemoryManager>>, ToolContext) {
        let memory = MemoryManager::new(MemoryConfig {
            storage_path: dir.to_path_buf(),
            ..MemoryConfig::default()
        })
        .unwrap();
        (
            Arc::new(Mutex::new(memory)),
            ToolContext::new(Arc::new(AgentConfig::default())),
        )
    }

    #[tokio::test]
    async fn store_then_recall() {
        let dir = tempfile::tempdir().unwrap();
        let (memory, ctx) = setup(dir.path());

        store_handler(Arc::clone(&memory))
            .run(
                serde_json::json!({"key": "favorite_shell", "value": "fish"}),
                &ctx,
            )
            .await
            .unwrap();

        let result = recall_handler(memory)
            .run(serde_json::json!({"key": "favorite_shell"}), &ctx)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.content, "fish");
    }

    #[tokio::test]
    async fn recall_missing_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (memory, ctx) = setup(dir.path());

        let result = recall_handler(memory)
            .run(serde_json::json!({"key": "absent"}), &ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.content.contains("No fact stored"));
    }

    #[tokio::test]
    async fn recall_lists_keys_without_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let (memory, ctx) = setup(dir.path());

        store_handler(Arc::clone(&memory))
            .run(serde_json::json!({"key": "editor", "value": "helix"}), &ctx)
            .await
            .unwrap();

        let result = recall_handler(memory)
            .run(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert!(result.content.contains("editor"));
    }
}
