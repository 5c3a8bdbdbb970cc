//! Context assembly and compaction for the agent loop.

pub mod builder;
pub mod compactor;
pub mod token;

pub use builder::{ContextBuilder, ContextWindow};
pub use compactor::Compactor;

use std::sync::{Arc, Mutex};

use ironquill_config::ContextConfig;
use ironquill_core::error::Result;
use ironquill_core::provider::ToolDefinition;
use ironquill_memory::MemoryManager;
use ironquill_providers::LlmGateway;

/// Facade over the builder and compactor used by the orchestrator.
pub struct ContextManager {
    config: ContextConfig,
    compactor: Compactor,
}

impl ContextManager {
    pub fn new(config: ContextConfig, gateway: Arc<LlmGateway>) -> Self {
        let compactor = Compactor::new(config.clone(), gateway);
        Self { config, compactor }
    }

    /// Run a compaction pass if the thread is over threshold.
    pub async fn compact_if_needed(&self, memory: &Arc<Mutex<MemoryManager>>) -> Result<usize> {
        self.compactor.compact_if_needed(memory).await
    }

    /// Assemble the window for one LLM call from the memory layers.
    pub fn build_context(
        &self,
        memory: &Arc<Mutex<MemoryManager>>,
        system_prompt: &str,
        tools: Vec<ToolDefinition>,
        task: &str,
    ) -> Result<ContextWindow> {
        let (user_memory, project_memory, history, recent, episodes) = {
            let guard = memory.lock().unwrap();
            (
                guard.user_memory(),
                guard.project_memory(),
                guard.combined_history(),
                guard.recent_messages(self.config.keep_raw_turns * 2),
                if task.is_empty() {
                    Vec::new()
                } else {
                    guard.retrieve_episodes(task, 3)
                },
            )
        };

        let mut builder = ContextBuilder::new(self.config.clone())
            .with_system_prompt(system_prompt)
            .with_messages(recent)
            .with_tools(tools);

        if !user_memory.is_empty() {
            builder = builder.with_user_memory(user_memory);
        }
        if !project_memory.is_empty() {
            builder = builder.with_project_memory(project_memory);
        }
        if !history.is_empty() {
            builder = builder.with_compressed_history(history);
        }
        if !episodes.is_empty() {
            builder = builder.with_episodes(&episodes);
        }
        if !task.is_empty() {
            builder = builder.with_task_context(task);
        }

        builder.build()
    }

    /// Tokens left for new content once the response reserve is held back.
    pub fn remaining_tokens(&self, current: usize) -> isize {
        self.config.max_tokens as isize
            - self.config.reserved_for_response as isize
            - current as isize
    }
}
