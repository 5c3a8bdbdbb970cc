//! MemoryManager — the single entry point over the memory hierarchy.
//!
//! Owns the three persistent sub-stores (cross-thread facts, episodic
//! memory, checkpointer) and the currently active session's mutable
//! snapshots (state, thread log, compressed history). At most one
//! session is active at a time.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use ironquill_core::error::{MemoryError, Result};
use ironquill_core::message::{Message, Role};

use ironquill_config::MemoryConfig;

use crate::checkpoint::{Checkpointer, CheckpointInfo};
use crate::cross_thread::CrossThreadMemory;
use crate::episodic::{Episode, EpisodicMemory};
use crate::session::SessionState;
use crate::thread::{CompressedHistory, ThreadMemory};

/// Summary row for `list_sessions`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub preview: String,
}

pub struct MemoryManager {
    config: MemoryConfig,
    storage_path: PathBuf,
    cross_thread: CrossThreadMemory,
    episodic: EpisodicMemory,
    checkpointer: Checkpointer,

    current_session_id: Option<String>,
    session_state: Option<SessionState>,
    thread_memory: Option<ThreadMemory>,
    compressed_history: Option<CompressedHistory>,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> Result<Self> {
        let storage_path = config.storage_path.clone();
        std::fs::create_dir_all(storage_path.join("sessions")).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "storage root".into(),
                reason: e.to_string(),
            })
        })?;

        let cross_thread = CrossThreadMemory::new(storage_path.join("cross_thread"))?;
        let episodic = EpisodicMemory::new(storage_path.join("episodic"))?;
        let checkpointer = Checkpointer::new(storage_path.join("checkpoints"))?;

        Ok(Self {
            config,
            storage_path,
            cross_thread,
            episodic,
            checkpointer,
            current_session_id: None,
            session_state: None,
            thread_memory: None,
            compressed_history: None,
        })
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.storage_path.join("sessions").join(session_id)
    }

    fn thread_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("thread.jsonl")
    }

    // --- Session lifecycle ---

    pub fn start_session(&mut self, session_id: &str) -> Result<()> {
        std::fs::create_dir_all(self.session_dir(session_id)).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "session directory".into(),
                reason: e.to_string(),
            })
        })?;

        self.current_session_id = Some(session_id.to_string());
        self.session_state = Some(SessionState::with_id(session_id));
        self.thread_memory = Some(ThreadMemory::new());
        self.compressed_history = Some(CompressedHistory::new());

        info!(session = %session_id, "Started session");
        Ok(())
    }

    pub fn resume_session(&mut self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(ironquill_core::Error::Memory(MemoryError::SessionNotFound(
                session_id.into(),
            )));
        }

        let state = SessionState::load(&dir.join("state.json"))?;
        let thread = ThreadMemory::load(&dir.join("thread.jsonl"))
            .unwrap_or_else(|_| ThreadMemory::new());
        let history = CompressedHistory::load(&dir.join("history.json"))?;

        self.current_session_id = Some(session_id.to_string());
        self.session_state = Some(state);
        self.thread_memory = Some(thread);
        self.compressed_history = Some(history);

        info!(session = %session_id, "Resumed session");
        Ok(())
    }

    pub fn end_session(&mut self) -> Result<()> {
        if self.current_session_id.is_none() {
            return Ok(());
        }
        let saved = self.save_all();

        self.current_session_id = None;
        self.session_state = None;
        self.thread_memory = None;
        self.compressed_history = None;

        saved
    }

    pub fn has_active_session(&self) -> bool {
        self.current_session_id.is_some()
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    /// Scan the sessions directory for summaries, newest first. The
    /// preview is the first user message, truncated to 50 characters.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions_dir = self.storage_path.join("sessions");
        let Ok(entries) = std::fs::read_dir(&sessions_dir) else {
            return Vec::new();
        };

        let mut sessions: Vec<SessionInfo> = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();

            let mut info = SessionInfo {
                id: id.clone(),
                created_at: None,
                updated_at: None,
                preview: String::new(),
            };

            if let Ok(state) = SessionState::load(&entry.path().join("state.json")) {
                info.created_at = Some(state.created_at());
                info.updated_at = Some(state.updated_at());
            }

            if let Ok(thread) = ThreadMemory::load(&entry.path().join("thread.jsonl")) {
                if let Some(first_user) = thread
                    .messages()
                    .find(|m| m.role == Role::User && !m.content.is_empty())
                {
                    info.preview = first_user.content.chars().take(50).collect();
                    if first_user.content.chars().count() > 50 {
                        info.preview.push_str("...");
                    }
                }
            }

            sessions.push(info);
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    // --- Active-session accessors ---

    pub fn session_state(&self) -> Result<&SessionState> {
        self.session_state
            .as_ref()
            .ok_or_else(|| no_session_err())
    }

    pub fn session_state_mut(&mut self) -> Result<&mut SessionState> {
        self.session_state
            .as_mut()
            .ok_or_else(|| no_session_err())
    }

    pub fn thread_memory(&self) -> Result<&ThreadMemory> {
        self.thread_memory
            .as_ref()
            .ok_or_else(|| no_session_err())
    }

    pub fn compressed_history(&self) -> Result<&CompressedHistory> {
        self.compressed_history
            .as_ref()
            .ok_or_else(|| no_session_err())
    }

    pub fn compressed_history_mut(&mut self) -> Result<&mut CompressedHistory> {
        self.compressed_history
            .as_mut()
            .ok_or_else(|| no_session_err())
    }

    // --- Append path ---

    /// Append a message: in-memory push, durable JSONL append, turn
    /// counter bump, and an auto-checkpoint every `checkpoint_interval`
    /// appends when enabled.
    pub fn append_message(&mut self, message: Message) -> Result<()> {
        let session_id = self
            .current_session_id
            .clone()
            .ok_or_else(no_session_err)?;

        let thread_path = self.thread_path(&session_id);
        if let Err(e) = ThreadMemory::append_to_file(&thread_path, &message) {
            warn!(error = %e, "Durable append failed; message kept in memory only");
        }

        let thread = self.thread_memory.as_mut().ok_or_else(no_session_err)?;
        thread.append(message);

        let turn = self
            .session_state
            .as_mut()
            .ok_or_else(no_session_err)?
            .increment_turn();

        if self.config.auto_checkpoint
            && self.config.checkpoint_interval > 0
            && turn % self.config.checkpoint_interval == 0
        {
            if let Err(e) = self.create_checkpoint_with_trigger("periodic snapshot", "auto") {
                warn!(error = %e, "Auto-checkpoint failed");
            }
        }

        Ok(())
    }

    /// Last `n` messages of the active thread (empty without a session).
    pub fn recent_messages(&self, n: usize) -> Vec<Message> {
        self.thread_memory
            .as_ref()
            .map(|t| t.recent(n))
            .unwrap_or_default()
    }

    pub fn combined_history(&self) -> String {
        self.compressed_history
            .as_ref()
            .map(|h| h.combined())
            .unwrap_or_default()
    }

    /// Replace the in-memory thread after compaction and persist it.
    pub fn trim_thread(&mut self, keep_last: usize) -> Result<()> {
        let session_id = self
            .current_session_id
            .clone()
            .ok_or_else(no_session_err)?;
        let thread = self.thread_memory.as_mut().ok_or_else(no_session_err)?;
        thread.trim(keep_last);
        let path = self.thread_path(&session_id);
        self.thread_memory.as_ref().unwrap().save(&path)
    }

    // --- Cross-thread facts ---

    pub fn store_fact(&mut self, namespace: &str, key: &str, value: serde_json::Value) {
        self.cross_thread.store(namespace, key, value);
        if let Err(e) = self.cross_thread.save() {
            warn!(error = %e, "Failed to persist cross-thread memory");
        }
    }

    pub fn retrieve_fact(&self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        self.cross_thread.retrieve(namespace, key).cloned()
    }

    pub fn list_fact_keys(&self, namespace: &str) -> Vec<String> {
        self.cross_thread.list_keys(namespace)
    }

    pub fn remove_fact(&mut self, namespace: &str, key: &str) {
        self.cross_thread.remove(namespace, key);
        if let Err(e) = self.cross_thread.save() {
            warn!(error = %e, "Failed to persist cross-thread memory");
        }
    }

    // --- Episodes ---

    pub fn store_episode(&mut self, episode: &Episode) -> Result<()> {
        self.episodic.store(episode)
    }

    pub fn retrieve_episodes(&self, query: &str, limit: usize) -> Vec<Episode> {
        self.episodic.search(query, limit)
    }

    pub fn episodic(&self) -> &EpisodicMemory {
        &self.episodic
    }

    pub fn episode_count(&self) -> usize {
        self.episodic.count()
    }

    pub fn successful_episode_count(&self) -> usize {
        self.episodic.count_successful()
    }

    // --- Checkpoints ---

    pub fn create_checkpoint(&mut self, description: &str) -> Result<String> {
        self.create_checkpoint_with_trigger(description, "manual")
    }

    fn create_checkpoint_with_trigger(
        &mut self,
        description: &str,
        trigger: &str,
    ) -> Result<String> {
        let state = self.session_state.as_ref().ok_or_else(no_session_err)?;
        let thread = self.thread_memory.as_ref().ok_or_else(no_session_err)?;
        let history = self
            .compressed_history
            .as_ref()
            .ok_or_else(no_session_err)?;

        let parent = self.checkpointer.latest(state.id()).map(|info| info.id);
        let id = self
            .checkpointer
            .create(state, thread, history, parent, description, trigger)?;
        debug!(checkpoint = %id, trigger, "Created checkpoint");
        Ok(id)
    }

    /// Adopt a checkpoint's snapshots as the current session.
    pub fn restore_checkpoint(&mut self, checkpoint_id: &str) -> Result<()> {
        let checkpoint = self.checkpointer.restore(checkpoint_id)?;
        self.current_session_id = Some(checkpoint.info.session_id.clone());
        self.session_state = Some(checkpoint.session_state);
        self.thread_memory = Some(checkpoint.thread_memory);
        self.compressed_history = Some(checkpoint.compressed_history);
        info!(checkpoint = %checkpoint_id, "Restored checkpoint");
        Ok(())
    }

    pub fn list_checkpoints(&self) -> Vec<CheckpointInfo> {
        match &self.current_session_id {
            Some(id) => self.checkpointer.list(id),
            None => Vec::new(),
        }
    }

    // --- User / project memory (free-form markdown) ---

    pub fn user_memory(&self) -> String {
        std::fs::read_to_string(self.storage_path.join("user_memory.md")).unwrap_or_default()
    }

    pub fn project_memory(&self) -> String {
        std::fs::read_to_string(self.storage_path.join("project_memory.md")).unwrap_or_default()
    }

    pub fn update_user_memory(&self, content: &str) -> Result<()> {
        std::fs::write(self.storage_path.join("user_memory.md"), content).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "user memory".into(),
                reason: e.to_string(),
            })
        })
    }

    pub fn update_project_memory(&self, content: &str) -> Result<()> {
        std::fs::write(self.storage_path.join("project_memory.md"), content).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "project memory".into(),
                reason: e.to_string(),
            })
        })
    }

    // --- Bulk persistence ---

    pub fn save_all(&mut self) -> Result<()> {
        let Some(session_id) = self.current_session_id.clone() else {
            return Ok(());
        };
        let dir = self.session_dir(&session_id);

        if let Some(state) = &self.session_state {
            state.save(&dir.join("state.json"))?;
        }
        if let Some(thread) = &self.thread_memory {
            thread.save(&dir.join("thread.jsonl"))?;
        }
        if let Some(history) = &self.compressed_history {
            history.save(&dir.join("history.json"))?;
        }
        self.cross_thread.save()?;
        Ok(())
    }
}

fn no_session_err() -> ironquill_core::Error {
    ironquill_core::Error::Memory(MemoryError::SessionNotFound("no active session".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &std::path::Path) -> MemoryManager {
        let config = MemoryConfig {
            storage_path: dir.to_path_buf(),
            ..MemoryConfig::default()
        };
        MemoryManager::new(config).unwrap()
    }

    #[test]
    fn session_lifecycle_and_counters() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = manager(dir.path());

        memory.start_session("sess_a").unwrap();
        assert!(memory.has_active_session());

        memory.append_message(Message::user("hello")).unwrap();
        memory.append_message(Message::assistant("hi")).unwrap();
        assert_eq!(memory.session_state().unwrap().conversation_turn(), 2);
        assert_eq!(memory.recent_messages(10).len(), 2);

        memory.end_session().unwrap();
        assert!(!memory.has_active_session());
    }

    #[test]
    fn resume_restores_thread_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = manager(dir.path());

        memory.start_session("sess_resume").unwrap();
        memory
            .append_message(Message::user("what is the plan for today"))
            .unwrap();
        memory.end_session().unwrap();

        memory.resume_session("sess_resume").unwrap();
        assert_eq!(memory.session_state().unwrap().conversation_turn(), 1);
        assert_eq!(memory.recent_messages(10).len(), 1);
    }

    #[test]
    fn resume_unknown_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = manager(dir.path());
        let err = memory.resume_session("sess_ghost").unwrap_err();
        assert!(matches!(
            err,
            ironquill_core::Error::Memory(MemoryError::SessionNotFound(_))
        ));
    }

    #[test]
    fn list_sessions_with_preview() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = manager(dir.path());

        memory.start_session("sess_preview").unwrap();
        let long_input = "a".repeat(80);
        memory.append_message(Message::user(long_input)).unwrap();
        memory.end_session().unwrap();

        let sessions = memory.list_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "sess_preview");
        assert_eq!(sessions[0].preview, format!("{}...", "a".repeat(50)));
    }

    #[test]
    fn auto_checkpoint_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig {
            storage_path: dir.path().to_path_buf(),
            checkpoint_interval: 2,
            auto_checkpoint: true,
            ..MemoryConfig::default()
        };
        let mut memory = MemoryManager::new(config).unwrap();

        memory.start_session("sess_auto").unwrap();
        memory.append_message(Message::user("one")).unwrap();
        assert!(memory.list_checkpoints().is_empty());
        memory.append_message(Message::assistant("two")).unwrap();

        let checkpoints = memory.list_checkpoints();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].trigger, "auto");
    }

    #[test]
    fn checkpoint_restore_reverts_later_messages() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig {
            storage_path: dir.path().to_path_buf(),
            auto_checkpoint: false,
            ..MemoryConfig::default()
        };
        let mut memory = MemoryManager::new(config).unwrap();

        memory.start_session("sess_restore").unwrap();
        for i in 0..5 {
            memory.append_message(Message::user(format!("m{i}"))).unwrap();
        }
        let checkpoint_id = memory.create_checkpoint("midpoint").unwrap();

        for i in 5..10 {
            memory.append_message(Message::user(format!("m{i}"))).unwrap();
        }
        assert_eq!(memory.recent_messages(100).len(), 10);

        memory.restore_checkpoint(&checkpoint_id).unwrap();
        assert_eq!(memory.recent_messages(100).len(), 5);
        assert_eq!(memory.session_state().unwrap().conversation_turn(), 5);
    }

    #[test]
    fn facts_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = manager(dir.path());

        memory.store_fact("prefs", "language", serde_json::json!("rust"));
        assert_eq!(
            memory.retrieve_fact("prefs", "language"),
            Some(serde_json::json!("rust"))
        );
        assert_eq!(memory.list_fact_keys("prefs"), vec!["language"]);

        memory.remove_fact("prefs", "language");
        assert!(memory.retrieve_fact("prefs", "language").is_none());
    }

    #[test]
    fn user_and_project_memory_files() {
        let dir = tempfile::tempdir().unwrap();
        let memory = manager(dir.path());

        assert!(memory.user_memory().is_empty());
        memory.update_user_memory("# Prefers terse answers").unwrap();
        memory.update_project_memory("# Rust workspace").unwrap();
        assert!(memory.user_memory().contains("terse"));
        assert!(memory.project_memory().contains("workspace"));
    }

    #[test]
    fn append_without_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = manager(dir.path());
        assert!(memory.append_message(Message::user("orphan")).is_err());
    }
}
