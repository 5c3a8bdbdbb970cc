//! Context window assembly.
//!
//! Layers, in order, into the system prompt: base prompt, user memory,
//! project memory, compressed history, retrieved episodes, current
//! task. Then the recent raw messages and tool schemas. The whole
//! window is rejected when the token estimate exceeds the budget.

use ironquill_config::ContextConfig;
use ironquill_core::error::{ContextError, Result};
use ironquill_core::message::Message;
use ironquill_core::provider::ToolDefinition;
use ironquill_memory::Episode;

use super::token;

/// The assembled input for one LLM call.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub estimated_tokens: usize,
}

#[derive(Default)]
pub struct ContextBuilder {
    config: ContextConfig,
    system_prompt: String,
    user_memory: String,
    project_memory: String,
    compressed_history: String,
    episodes_context: String,
    task_context: String,
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_user_memory(mut self, memory: impl Into<String>) -> Self {
        self.user_memory = memory.into();
        self
    }

    pub fn with_project_memory(mut self, memory: impl Into<String>) -> Self {
        self.project_memory = memory.into();
        self
    }

    pub fn with_compressed_history(mut self, history: impl Into<String>) -> Self {
        self.compressed_history = history.into();
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Render up to three retrieved episodes: outcome plus the first
    /// five tools each, and any recorded learnings.
    pub fn with_episodes(mut self, episodes: &[Episode]) -> Self {
        if episodes.is_empty() {
            return self;
        }

        let mut text = String::from("## Relevant Past Experiences\n\n");
        for episode in episodes.iter().take(3) {
            text.push_str(&format!("### {}\n", episode.task_description));
            text.push_str(&format!(
                "- Outcome: {}\n",
                if episode.outcome.success { "Success" } else { "Failed" }
            ));
            let tools: Vec<&str> = episode
                .actions
                .iter()
                .take(5)
                .map(|a| a.tool.as_str())
                .collect();
            text.push_str(&format!("- Tools used: {}\n", tools.join(", ")));
            if !episode.learnings.is_empty() {
                text.push_str("- Learnings:\n");
                for learning in &episode.learnings {
                    text.push_str(&format!("  - {learning}\n"));
                }
            }
            text.push('\n');
        }

        self.episodes_context = text;
        self
    }

    pub fn with_task_context(mut self, task: impl Into<String>) -> Self {
        self.task_context = task.into();
        self
    }

    pub fn estimated_tokens(&self) -> usize {
        let mut tokens = token::estimate_tokens(&self.system_prompt)
            + token::estimate_tokens(&self.user_memory)
            + token::estimate_tokens(&self.project_memory)
            + token::estimate_tokens(&self.compressed_history)
            + token::estimate_tokens(&self.episodes_context)
            + token::estimate_tokens(&self.task_context)
            + token::estimate_messages_tokens(&self.messages);
        if !self.tools.is_empty() {
            tokens += token::estimate_tools_tokens(&self.tools);
        }
        tokens
    }

    pub fn build(self) -> Result<ContextWindow> {
        let estimated = self.estimated_tokens();
        if estimated > self.config.max_tokens {
            return Err(ironquill_core::Error::Context(ContextError::TooLarge {
                estimated,
                max: self.config.max_tokens,
            }));
        }

        let mut system = self.system_prompt;
        if !self.user_memory.is_empty() {
            system.push_str("\n\n## User Memory\n");
            system.push_str(&self.user_memory);
        }
        if !self.project_memory.is_empty() {
            system.push_str("\n\n## Project Memory\n");
            system.push_str(&self.project_memory);
        }
        if !self.compressed_history.is_empty() {
            system.push_str("\n\n## Conversation History Summary\n");
            system.push_str(&self.compressed_history);
        }
        if !self.episodes_context.is_empty() {
            system.push_str("\n\n");
            system.push_str(&self.episodes_context);
        }
        if !self.task_context.is_empty() {
            system.push_str("\n\n## Current Task\n");
            system.push_str(&self.task_context);
        }

        Ok(ContextWindow {
            system_prompt: system,
            messages: self.messages,
            tools: self.tools,
            estimated_tokens: estimated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ironquill_memory::{EpisodeAction, EpisodeOutcome};

    fn episode(description: &str, success: bool, tools: &[&str]) -> Episode {
        let now = Utc::now();
        Episode {
            id: "ep_t".into(),
            task_description: description.into(),
            task_category: String::new(),
            started_at: now,
            completed_at: now,
            files_involved: vec![],
            actions: tools
                .iter()
                .map(|t| EpisodeAction::new(*t, serde_json::json!({}), "out", true))
                .collect(),
            outcome: EpisodeOutcome {
                success,
                ..EpisodeOutcome::default()
            },
            learnings: vec!["check permissions first".into()],
            keywords: vec![],
        }
    }

    #[test]
    fn layers_appear_in_order() {
        let window = ContextBuilder::new(ContextConfig::default())
            .with_system_prompt("BASE")
            .with_user_memory("likes rust")
            .with_project_memory("cargo workspace")
            .with_compressed_history("earlier we discussed parsing")
            .with_episodes(&[episode("fix the parser", true, &["file_read", "shell"])])
            .with_task_context("add error recovery")
            .build()
            .unwrap();

        let s = &window.system_prompt;
        let order = [
            s.find("BASE").unwrap(),
            s.find("## User Memory").unwrap(),
            s.find("## Project Memory").unwrap(),
            s.find("## Conversation History Summary").unwrap(),
            s.find("## Relevant Past Experiences").unwrap(),
            s.find("## Current Task").unwrap(),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn empty_layers_are_omitted() {
        let window = ContextBuilder::new(ContextConfig::default())
            .with_system_prompt("BASE")
            .build()
            .unwrap();
        assert_eq!(window.system_prompt, "BASE");
    }

    #[test]
    fn episodes_show_outcome_and_first_five_tools() {
        let window = ContextBuilder::new(ContextConfig::default())
            .with_system_prompt("B")
            .with_episodes(&[episode(
                "long pipeline",
                false,
                &["a", "b", "c", "d", "e", "f", "g"],
            )])
            .build()
            .unwrap();

        assert!(window.system_prompt.contains("Outcome: Failed"));
        assert!(window.system_prompt.contains("a, b, c, d, e"));
        assert!(!window.system_prompt.contains(", f"));
        assert!(window.system_prompt.contains("check permissions first"));
    }

    #[test]
    fn at_most_three_episodes() {
        let episodes: Vec<Episode> = (0..5)
            .map(|i| episode(&format!("task number {i}"), true, &["shell"]))
            .collect();
        let window = ContextBuilder::new(ContextConfig::default())
            .with_system_prompt("B")
            .with_episodes(&episodes)
            .build()
            .unwrap();

        assert!(window.system_prompt.contains("task number 2"));
        assert!(!window.system_prompt.contains("task number 3"));
    }

    #[test]
    fn over_budget_is_rejected() {
        let config = ContextConfig {
            max_tokens: 10,
            ..ContextConfig::default()
        };
        let err = ContextBuilder::new(config)
            .with_system_prompt("a".repeat(500))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ironquill_core::Error::Context(ContextError::TooLarge { .. })
        ));
    }

    #[test]
    fn estimate_counts_messages_and_tools() {
        let builder = ContextBuilder::new(ContextConfig::default())
            .with_system_prompt("prompt")
            .with_messages(vec![Message::user("hello there"), Message::assistant("hi")])
            .with_tools(vec![ToolDefinition {
                name: "shell".into(),
                description: "Run commands".into(),
                parameters: serde_json::json!({"type": "object"}),
            }]);
        assert!(builder.estimated_tokens() > token::estimate_tokens("prompt"));
    }
}
