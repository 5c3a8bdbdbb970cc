//! Checkpointing — point-in-time snapshots of a session.
//!
//! A checkpoint bundles session state, the thread log, and compressed
//! history into its own directory, tracked by a flat index. Parent ids
//! form a DAG (by id, never by live reference). The index is
//! rebuildable: a corrupt index starts empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use ironquill_core::error::{MemoryError, Result};
use ironquill_core::id;

use crate::session::SessionState;
use crate::thread::{CompressedHistory, ThreadMemory};

/// Checkpoint metadata, stored both in the checkpoint directory and in
/// the flat index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub id: String,
    pub session_id: String,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub description: String,
    /// "manual", "auto", or a caller-defined trigger.
    pub trigger: String,
    pub conversation_turn: u64,
}

/// A restored checkpoint bundle.
#[derive(Debug)]
pub struct Checkpoint {
    pub info: CheckpointInfo,
    pub session_state: SessionState,
    pub thread_memory: ThreadMemory,
    pub compressed_history: CompressedHistory,
    pub custom_state: serde_json::Value,
}

pub struct Checkpointer {
    storage_path: PathBuf,
    index_path: PathBuf,
    index: Vec<CheckpointInfo>,
}

impl Checkpointer {
    pub fn new(storage_path: impl Into<PathBuf>) -> Result<Self> {
        let storage_path = storage_path.into();
        std::fs::create_dir_all(&storage_path).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "checkpoint storage".into(),
                reason: e.to_string(),
            })
        })?;
        let index_path = storage_path.join("index.json");
        let index = Self::load_index(&index_path);
        Ok(Self {
            storage_path,
            index_path,
            index,
        })
    }

    fn checkpoint_dir(&self, id: &str) -> PathBuf {
        self.storage_path.join(id)
    }

    /// Snapshot the given session into a new checkpoint directory.
    pub fn create(
        &mut self,
        session: &SessionState,
        thread: &ThreadMemory,
        history: &CompressedHistory,
        parent_id: Option<String>,
        description: &str,
        trigger: &str,
    ) -> Result<String> {
        let checkpoint_id = id::checkpoint_id();
        let dir = self.checkpoint_dir(&checkpoint_id);
        std::fs::create_dir_all(&dir).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "checkpoint".into(),
                reason: e.to_string(),
            })
        })?;

        let info = CheckpointInfo {
            id: checkpoint_id.clone(),
            session_id: session.id().to_string(),
            thread_id: thread.id().to_string(),
            timestamp: Utc::now(),
            parent_id,
            description: description.to_string(),
            trigger: trigger.to_string(),
            conversation_turn: session.conversation_turn(),
        };

        let info_json = serde_json::to_string_pretty(&info)?;
        std::fs::write(dir.join("info.json"), info_json).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "checkpoint info".into(),
                reason: e.to_string(),
            })
        })?;

        session.save(&dir.join("session.json"))?;
        thread.save(&dir.join("thread.jsonl"))?;
        history.save(&dir.join("history.json"))?;

        self.index.push(info);
        self.save_index()?;

        Ok(checkpoint_id)
    }

    /// Read back a checkpoint bundle.
    pub fn restore(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        let dir = self.checkpoint_dir(checkpoint_id);
        if !dir.exists() {
            return Err(ironquill_core::Error::Memory(
                MemoryError::CheckpointNotFound(checkpoint_id.into()),
            ));
        }

        let info = self.info(checkpoint_id)?;
        let session_state = SessionState::load(&dir.join("session.json"))?;
        let thread_memory = ThreadMemory::load(&dir.join("thread.jsonl"))?;
        let compressed_history = CompressedHistory::load(&dir.join("history.json"))?;

        Ok(Checkpoint {
            info,
            session_state,
            thread_memory,
            compressed_history,
            custom_state: serde_json::Value::Null,
        })
    }

    pub fn info(&self, checkpoint_id: &str) -> Result<CheckpointInfo> {
        let path = self.checkpoint_dir(checkpoint_id).join("info.json");
        if !path.exists() {
            return Err(ironquill_core::Error::Memory(
                MemoryError::CheckpointNotFound(checkpoint_id.into()),
            ));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::LoadFailed {
                what: "checkpoint info".into(),
                reason: e.to_string(),
            })
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::Corrupted {
                what: format!("checkpoint {checkpoint_id}"),
                reason: e.to_string(),
            })
        })
    }

    /// Checkpoints for one session, newest first.
    pub fn list(&self, session_id: &str) -> Vec<CheckpointInfo> {
        let mut result: Vec<CheckpointInfo> = self
            .index
            .iter()
            .filter(|info| info.session_id == session_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        result
    }

    /// Every checkpoint, newest first.
    pub fn list_all(&self) -> Vec<CheckpointInfo> {
        let mut result = self.index.clone();
        result.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        result
    }

    pub fn latest(&self, session_id: &str) -> Option<CheckpointInfo> {
        self.list(session_id).into_iter().next()
    }

    pub fn exists(&self, checkpoint_id: &str) -> bool {
        self.checkpoint_dir(checkpoint_id).exists()
    }

    pub fn remove(&mut self, checkpoint_id: &str) -> Result<()> {
        let dir = self.checkpoint_dir(checkpoint_id);
        if !dir.exists() {
            return Err(ironquill_core::Error::Memory(
                MemoryError::CheckpointNotFound(checkpoint_id.into()),
            ));
        }
        std::fs::remove_dir_all(&dir).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "checkpoint".into(),
                reason: e.to_string(),
            })
        })?;
        self.index.retain(|info| info.id != checkpoint_id);
        self.save_index()
    }

    fn load_index(path: &Path) -> Vec<CheckpointInfo> {
        if !path.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
        {
            Some(index) => index,
            None => {
                warn!(path = %path.display(), "Checkpoint index unreadable, starting empty");
                Vec::new()
            }
        }
    }

    fn save_index(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.index)?;
        std::fs::write(&self.index_path, json).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "checkpoint index".into(),
                reason: e.to_string(),
            })
        })
    }
}
