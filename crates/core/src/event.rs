//! Agent event stream — advisory notifications for observers.
//!
//! Events are published as the orchestrator moves through a turn. They
//! are strictly advisory: delivery never blocks the turn, and a missing
//! subscriber is not an error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Everything an observer can learn about a running turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The agent started working on the request.
    Thinking { message: String },

    /// The model selected tools to run.
    ToolSelected { tools: Vec<String> },

    /// A tool is about to execute.
    ToolExecuting { tool: String },

    /// A tool finished successfully.
    ToolCompleted { tool: String, duration_ms: u64 },

    /// A tool failed (the turn continues; the error goes back to the model).
    ToolFailed { tool: String, error: String },

    /// The final assistant response for this turn is ready.
    ResponseReady { content: String },

    /// A task's episode was persisted.
    EpisodeComplete { episode_id: String, success: bool },

    /// Background recommender training started.
    TrainingStarted,

    /// Per-epoch training progress.
    TrainingProgress {
        epoch: u32,
        total_epochs: u32,
        loss: f32,
    },

    /// Training finished.
    TrainingComplete { final_loss: f32 },

    /// Something went wrong outside the tool path.
    Error { context: String, message: String },
}

/// A broadcast-based bus for agent events.
///
/// Publishing with no subscribers is a no-op; slow subscribers lag and
/// drop rather than backpressure the orchestrator.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers. Never blocks, never fails.
    pub fn publish(&self, event: AgentEvent) {
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(AgentEvent::ToolSelected {
            tools: vec!["file_read".into()],
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AgentEvent::ToolSelected { tools } => assert_eq!(tools, &["file_read".to_string()]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(AgentEvent::TrainingStarted);
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_string(&AgentEvent::TrainingProgress {
            epoch: 2,
            total_epochs: 10,
            loss: 0.5,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"training_progress\""));
        assert!(json.contains("\"epoch\":2"));
    }
}
