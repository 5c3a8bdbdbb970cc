//! Per-session message log and rolling summaries.
//!
//! [`ThreadMemory`] is the ordered sequence of messages for one session,
//! persisted as JSONL (one JSON message per line, durable append).
//! [`CompressedHistory`] holds the summaries that replace compacted
//! message prefixes; spans are non-overlapping and monotonic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::warn;

use ironquill_core::error::{MemoryError, Result};
use ironquill_core::id;
use ironquill_core::message::Message;

/// Ordered message log for one conversation thread.
#[derive(Debug, Clone)]
pub struct ThreadMemory {
    thread_id: String,
    messages: VecDeque<Message>,
}

impl ThreadMemory {
    pub fn new() -> Self {
        Self::with_id(id::thread_id())
    }

    pub fn with_id(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: VecDeque::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.thread_id
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Messages in `[start, end)`, clamped to the valid range.
    pub fn range(&self, start: usize, end: usize) -> Vec<Message> {
        if start >= self.messages.len() {
            return Vec::new();
        }
        let end = end.min(self.messages.len());
        self.messages.iter().skip(start).take(end - start).cloned().collect()
    }

    /// Drop everything but the last `keep_last` messages.
    pub fn trim(&mut self, keep_last: usize) {
        while self.messages.len() > keep_last {
            self.messages.pop_front();
        }
    }

    /// Write the whole log as JSONL.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_err("thread memory", e))?;
        }

        let mut content = String::new();
        for message in &self.messages {
            content.push_str(&serde_json::to_string(message)?);
            content.push('\n');
        }
        std::fs::write(path, content).map_err(|e| save_err("thread memory", e))?;
        Ok(())
    }

    /// Append a single message line to the on-disk log (durable append).
    pub fn append_to_file(path: &Path, message: &Message) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_err("thread memory", e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| save_err("thread memory", e))?;
        let line = serde_json::to_string(message)?;
        writeln!(file, "{line}").map_err(|e| save_err("thread memory", e))?;
        Ok(())
    }

    /// Load a log from JSONL. Corrupt lines are skipped with a warning;
    /// a missing file is an error (callers decide whether that is fatal).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::LoadFailed {
                what: "thread memory".into(),
                reason: format!("{}: {e}", path.display()),
            })
        })?;

        let mut memory = Self::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => memory.append(message),
                Err(e) => warn!(error = %e, "Skipping corrupt thread memory line"),
            }
        }
        Ok(memory)
    }
}

impl Default for ThreadMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// One summary covering a span of compacted turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub start_turn: usize,
    pub end_turn: usize,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Rolling summaries of compacted conversation prefixes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressedHistory {
    summaries: Vec<Summary>,
}

impl CompressedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_summary(&mut self, start_turn: usize, end_turn: usize, content: String) {
        self.summaries.push(Summary {
            start_turn,
            end_turn,
            content,
            created_at: Utc::now(),
        });
    }

    pub fn summaries(&self) -> &[Summary] {
        &self.summaries
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    /// All summaries joined, newest last, with their turn spans.
    pub fn combined(&self) -> String {
        let mut out = String::new();
        for (i, summary) in self.summaries.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            out.push_str(&format!(
                "[Turns {}-{}]\n{}",
                summary.start_turn, summary.end_turn, summary.content
            ));
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_err("compressed history", e))?;
        }
        let json = serde_json::to_string_pretty(&self.summaries)?;
        std::fs::write(path, json).map_err(|e| save_err("compressed history", e))?;
        Ok(())
    }

    /// Load from disk. A missing file is an empty history; a corrupt
    /// file is a `Corrupted` error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::LoadFailed {
                what: "compressed history".into(),
                reason: e.to_string(),
            })
        })?;
        let summaries: Vec<Summary> = serde_json::from_str(&content).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::Corrupted {
                what: "compressed history".into(),
                reason: e.to_string(),
            })
        })?;
        Ok(Self { summaries })
    }
}

fn save_err(what: &str, e: std::io::Error) -> ironquill_core::Error {
    ironquill_core::Error::Memory(MemoryError::SaveFailed {
        what: what.into(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironquill_core::message::ToolCall;

    #[test]
    fn append_and_recent() {
        let mut thread = ThreadMemory::new();
        for i in 0..5 {
            thread.append(Message::user(format!("message {i}")));
        }

        let recent = thread.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "message 3");
        assert_eq!(recent[1].content, "message 4");

        // Asking for more than exists returns everything.
        assert_eq!(thread.recent(100).len(), 5);
    }

    #[test]
    fn range_clamps() {
        let mut thread = ThreadMemory::new();
        for i in 0..4 {
            thread.append(Message::user(format!("m{i}")));
        }
        assert_eq!(thread.range(1, 3).len(), 2);
        assert_eq!(thread.range(2, 100).len(), 2);
        assert!(thread.range(10, 12).is_empty());
    }

    #[test]
    fn trim_keeps_last() {
        let mut thread = ThreadMemory::new();
        for i in 0..10 {
            thread.append(Message::user(format!("m{i}")));
        }
        thread.trim(3);
        assert_eq!(thread.len(), 3);
        assert_eq!(thread.recent(1)[0].content, "m9");
    }

    #[test]
    fn jsonl_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thread.jsonl");

        let mut thread = ThreadMemory::new();
        thread.append(Message::user("hello"));
        thread.append(
            Message::assistant("checking").with_tool_calls(vec![ToolCall {
                id: "tc_1".into(),
                name: "file_read".into(),
                arguments: serde_json::json!({"file_path": "a.txt"}),
            }]),
        );
        thread.append(Message::tool_result("tc_1", "contents"));
        thread.save(&path).unwrap();

        let loaded = ThreadMemory::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        let messages: Vec<_> = loaded.messages().collect();
        assert_eq!(messages[1].tool_calls[0].id, "tc_1");
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("tc_1"));
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thread.jsonl");

        let good = serde_json::to_string(&Message::user("kept")).unwrap();
        std::fs::write(&path, format!("{good}\nnot json at all\n{good}\n")).unwrap();

        let loaded = ThreadMemory::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn durable_append_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thread.jsonl");

        ThreadMemory::append_to_file(&path, &Message::user("one")).unwrap();
        ThreadMemory::append_to_file(&path, &Message::assistant("two")).unwrap();

        let loaded = ThreadMemory::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn history_spans_and_combined() {
        let mut history = CompressedHistory::new();
        history.add_summary(0, 10, "first block".into());
        history.add_summary(10, 20, "second block".into());

        let combined = history.combined();
        assert!(combined.contains("[Turns 0-10]"));
        assert!(combined.contains("[Turns 10-20]"));
        assert!(combined.find("first block").unwrap() < combined.find("second block").unwrap());

        // Spans are monotonic in end_turn and non-overlapping.
        let spans = history.summaries();
        assert!(spans.windows(2).all(|w| w[0].end_turn <= w[1].start_turn));
    }

    #[test]
    fn history_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        assert!(CompressedHistory::load(&path).unwrap().is_empty());

        let mut history = CompressedHistory::new();
        history.add_summary(0, 21, "compacted".into());
        history.save(&path).unwrap();

        let loaded = CompressedHistory::load(&path).unwrap();
        assert_eq!(loaded.summaries().len(), 1);
        assert_eq!(loaded.summaries()[0].end_turn, 21);
    }
}
