//! Context compaction — replace old raw messages with summaries.
//!
//! Triggered when the message-area token estimate crosses the
//! configured threshold and more messages exist than the raw-keep
//! window. Old messages are summarized in batches by the summarizer
//! provider; a failed batch is skipped and the rest continue. After
//! summarization the thread is trimmed to the last
//! `keep_raw_turns × 2` messages. The estimate is not re-measured
//! after one pass; a still-too-large thread compacts again next turn.

use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use ironquill_config::ContextConfig;
use ironquill_core::error::Result;
use ironquill_core::message::Message;
use ironquill_core::provider::LlmRequest;
use ironquill_memory::MemoryManager;
use ironquill_providers::LlmGateway;

use super::token;

const SUMMARIZATION_PROMPT: &str = "You are a conversation summarizer. Summarize the following \
conversation excerpt concisely, focusing on:\n\
1. Key decisions made\n\
2. Important information learned\n\
3. Actions taken and their outcomes\n\
4. Any pending items or context needed for future turns\n\
Be concise but preserve all important details. Output only the summary, no preamble.";

pub struct Compactor {
    config: ContextConfig,
    gateway: Arc<LlmGateway>,
}

impl Compactor {
    pub fn new(config: ContextConfig, gateway: Arc<LlmGateway>) -> Self {
        Self { config, gateway }
    }

    pub fn needs_compaction(&self, message_tokens: usize) -> bool {
        message_tokens > self.config.compaction_threshold
    }

    /// Compact the active thread if it is over threshold. Returns the
    /// number of batches successfully summarized.
    pub async fn compact_if_needed(&self, memory: &Arc<Mutex<MemoryManager>>) -> Result<usize> {
        let keep_raw = self.config.keep_raw_turns * 2;

        // Snapshot the compaction range without holding the lock across
        // any summarization call.
        let batches: Vec<(usize, usize, Vec<Message>)> = {
            let guard = memory.lock().unwrap();
            let thread = guard.thread_memory()?;
            let total = thread.len();

            let tokens = token::estimate_messages_tokens(&thread.recent(total));
            if !self.needs_compaction(tokens) || total <= keep_raw {
                return Ok(0);
            }

            let compact_end = total - keep_raw;
            let batch_size = self.config.summarize_batch.max(1);
            let mut batches = Vec::new();
            let mut start = 0;
            while start < compact_end {
                let end = (start + batch_size).min(compact_end);
                batches.push((start, end, thread.range(start, end)));
                start = end;
            }
            batches
        };

        let mut summarized = 0;
        for (start, end, messages) in batches {
            match self.summarize_batch(&messages).await {
                Ok(summary) => {
                    let mut guard = memory.lock().unwrap();
                    guard
                        .compressed_history_mut()?
                        .add_summary(start, end, summary);
                    summarized += 1;
                }
                Err(e) => {
                    warn!(start, end, error = %e, "Compaction batch failed, skipping");
                }
            }
        }

        {
            let mut guard = memory.lock().unwrap();
            guard.trim_thread(keep_raw)?;
        }

        info!(batches = summarized, "Compacted conversation history");
        Ok(summarized)
    }

    async fn summarize_batch(&self, messages: &[Message]) -> Result<String> {
        let mut text = String::new();
        for message in messages {
            text.push_str(&format!("{}: {}\n", message.role.as_str(), message.content));
            for call in &message.tool_calls {
                text.push_str(&format!("[Tool: {}]\n", call.name));
            }
            text.push('\n');
        }

        let request = LlmRequest {
            system_prompt: SUMMARIZATION_PROMPT.into(),
            messages: vec![Message::user(text)],
            tools: vec![],
            max_tokens: 1000,
            temperature: 0.3,
            stop_sequences: vec![],
        };

        let response = self.gateway.summarizer().complete(request).await?;
        Ok(response.content)
    }
}
