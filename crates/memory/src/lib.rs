//! # ironquill memory
//!
//! The layered memory hierarchy: ephemeral per-session message logs,
//! rolling summaries, durable episodes with a keyword index, persistent
//! cross-thread facts, and restorable checkpoints — all coordinated by
//! [`MemoryManager`].
//!
//! Persistence is plain JSON on disk: thread logs as JSONL (durable
//! append), everything else as one document per file.

pub mod checkpoint;
pub mod cross_thread;
pub mod episodic;
pub mod manager;
pub mod session;
pub mod thread;

pub use checkpoint::{Checkpoint, CheckpointInfo, Checkpointer};
pub use cross_thread::CrossThreadMemory;
pub use episodic::{
    extract_keywords, Episode, EpisodeAction, EpisodeIndexEntry, EpisodeOutcome, EpisodicMemory,
    RESULT_SUMMARY_MAX,
};
pub use manager::{MemoryManager, SessionInfo};
pub use session::{CurrentTask, Scratchpad, SessionState, TaskStatus, ToolState};
pub use thread::{CompressedHistory, Summary, ThreadMemory};
