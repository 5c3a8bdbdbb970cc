//! Mutable per-session state: turn counter, current task, scratchpad.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use ironquill_core::error::{MemoryError, Result};
use ironquill_core::id;

/// Lifecycle of the task the session is currently working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// Descriptor of the in-flight task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentTask {
    pub description: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Free-form working state the agent accumulates during a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scratchpad {
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub pending_actions: Vec<String>,
    #[serde(default)]
    pub custom_data: serde_json::Map<String, serde_json::Value>,
}

/// Record of the most recent tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolState {
    pub last_tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Everything mutable about one session, persisted as a single JSON
/// document (`state.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    session_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    conversation_turn: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_task: Option<CurrentTask>,
    #[serde(default)]
    scratchpad: Scratchpad,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_state: Option<ToolState>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::with_id(id::session_id())
    }

    pub fn with_id(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            updated_at: now,
            conversation_turn: 0,
            current_task: None,
            scratchpad: Scratchpad::default(),
            tool_state: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn conversation_turn(&self) -> u64 {
        self.conversation_turn
    }

    pub fn current_task(&self) -> Option<&CurrentTask> {
        self.current_task.as_ref()
    }

    pub fn scratchpad(&self) -> &Scratchpad {
        &self.scratchpad
    }

    pub fn tool_state(&self) -> Option<&ToolState> {
        self.tool_state.as_ref()
    }

    pub fn set_current_task(&mut self, description: impl Into<String>) {
        self.current_task = Some(CurrentTask {
            description: description.into(),
            status: TaskStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
        });
        self.touch();
    }

    pub fn complete_task(&mut self) {
        if let Some(task) = &mut self.current_task {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
        }
        self.touch();
    }

    pub fn clear_task(&mut self) {
        self.current_task = None;
        self.touch();
    }

    pub fn add_modified_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.scratchpad.files_modified.contains(&path) {
            self.scratchpad.files_modified.push(path);
        }
        self.touch();
    }

    pub fn add_pending_action(&mut self, action: impl Into<String>) {
        self.scratchpad.pending_actions.push(action.into());
        self.touch();
    }

    pub fn clear_pending_actions(&mut self) {
        self.scratchpad.pending_actions.clear();
        self.touch();
    }

    pub fn record_tool_execution(
        &mut self,
        tool: impl Into<String>,
        success: bool,
        error: Option<String>,
    ) {
        self.tool_state = Some(ToolState {
            last_tool: tool.into(),
            success,
            last_error: error,
            executed_at: Utc::now(),
        });
        self.touch();
    }

    /// Bump the turn counter. Strictly monotonic within a session.
    pub fn increment_turn(&mut self) -> u64 {
        self.conversation_turn += 1;
        self.touch();
        self.conversation_turn
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ironquill_core::Error::Memory(MemoryError::SaveFailed {
                    what: "session state".into(),
                    reason: e.to_string(),
                })
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "session state".into(),
                reason: e.to_string(),
            })
        })?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ironquill_core::Error::Memory(MemoryError::SessionNotFound(
                path.display().to_string(),
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::LoadFailed {
                what: "session state".into(),
                reason: e.to_string(),
            })
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::Corrupted {
                what: "session state".into(),
                reason: e.to_string(),
            })
        })
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_counter_is_strictly_monotonic() {
        let mut state = SessionState::new();
        let mut last = 0;
        for _ in 0..20 {
            let turn = state.increment_turn();
            assert!(turn > last);
            last = turn;
        }
        assert_eq!(state.conversation_turn(), 20);
    }

    #[test]
    fn task_lifecycle() {
        let mut state = SessionState::new();
        assert!(state.current_task().is_none());

        state.set_current_task("fix the tests");
        assert_eq!(
            state.current_task().unwrap().status,
            TaskStatus::InProgress
        );

        state.complete_task();
        let task = state.current_task().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());

        state.clear_task();
        assert!(state.current_task().is_none());
    }

    #[test]
    fn modified_files_deduplicate() {
        let mut state = SessionState::new();
        state.add_modified_file("src/main.rs");
        state.add_modified_file("src/lib.rs");
        state.add_modified_file("src/main.rs");
        assert_eq!(state.scratchpad().files_modified.len(), 2);
    }

    #[test]
    fn tool_state_records_last_execution() {
        let mut state = SessionState::new();
        state.record_tool_execution("shell", false, Some("exit 1".into()));
        let ts = state.tool_state().unwrap();
        assert_eq!(ts.last_tool, "shell");
        assert!(!ts.success);
        assert_eq!(ts.last_error.as_deref(), Some("exit 1"));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = SessionState::with_id("sess_test");
        state.set_current_task("investigate");
        state.increment_turn();
        state.increment_turn();
        state.add_pending_action("run tests");
        state.save(&path).unwrap();

        let loaded = SessionState::load(&path).unwrap();
        assert_eq!(loaded.id(), "sess_test");
        assert_eq!(loaded.conversation_turn(), 2);
        assert_eq!(loaded.scratchpad().pending_actions, vec!["run tests"]);
        assert_eq!(loaded.current_task().unwrap().description, "investigate");
    }

    #[test]
    fn missing_file_is_session_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionState::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(
            err,
            ironquill_core::Error::Memory(MemoryError::SessionNotFound(_))
        ));
    }

    #[test]
    fn corrupt_file_is_corrupted_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ definitely not json").unwrap();
        let err = SessionState::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ironquill_core::Error::Memory(MemoryError::Corrupted { .. })
        ));
    }
}
