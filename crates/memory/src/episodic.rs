//! Episodic memory — the append-only store of completed tasks.
//!
//! One JSON file per episode plus a flat keyword index for search
//! without reading every record. Index corruption is recoverable:
//! the index starts empty and episodes stay on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

use ironquill_core::error::{MemoryError, Result};

/// Maximum stored length of a tool result summary.
pub const RESULT_SUMMARY_MAX: usize = 500;

/// One tool invocation inside an episode's action trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeAction {
    pub tool: String,
    pub arguments: serde_json::Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool output, truncated to [`RESULT_SUMMARY_MAX`] chars.
    pub result_summary: String,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl EpisodeAction {
    pub fn new(
        tool: impl Into<String>,
        arguments: serde_json::Value,
        result: &str,
        success: bool,
    ) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            success,
            error: None,
            result_summary: truncate(result, RESULT_SUMMARY_MAX),
            execution_time_ms: 0,
            timestamp: Utc::now(),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// How the task ended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeOutcome {
    pub success: bool,
    pub turns_taken: u32,
    pub tools_used: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// A durable record of one completed task. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub task_description: String,
    #[serde(default)]
    pub task_category: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub files_involved: Vec<String>,
    #[serde(default)]
    pub actions: Vec<EpisodeAction>,
    pub outcome: EpisodeOutcome,
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Slim index entry for fast search without loading full episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeIndexEntry {
    pub id: String,
    pub keywords: Vec<String>,
    pub category: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub turns: u32,
}

/// File-backed episode store with a keyword index.
pub struct EpisodicMemory {
    storage_path: PathBuf,
    index_path: PathBuf,
    index: Vec<EpisodeIndexEntry>,
}

impl EpisodicMemory {
    pub fn new(storage_path: impl Into<PathBuf>) -> Result<Self> {
        let storage_path = storage_path.into();
        std::fs::create_dir_all(&storage_path).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "episodic storage".into(),
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

    fn episode_path(&self, id: &str) -> PathBuf {
        self.storage_path.join(format!("{id}.json"))
    }

    /// Persist an episode and update the index.
    pub fn store(&mut self, episode: &Episode) -> Result<()> {
        let json = serde_json::to_string_pretty(episode)?;
        std::fs::write(self.episode_path(&episode.id), json).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "episode".into(),
                reason: e.to_string(),
            })
        })?;

        self.index.retain(|entry| entry.id != episode.id);
        self.index.push(EpisodeIndexEntry {
            id: episode.id.clone(),
            keywords: if episode.keywords.is_empty() {
                extract_keywords(&episode.task_description)
            } else {
                episode.keywords.clone()
            },
            category: episode.task_category.clone(),
            success: episode.outcome.success,
            timestamp: episode.completed_at,
            turns: episode.outcome.turns_taken,
        });
        self.save_index()
    }

    pub fn get(&self, id: &str) -> Result<Episode> {
        let path = self.episode_path(id);
        if !path.exists() {
            return Err(ironquill_core::Error::Memory(MemoryError::EpisodeNotFound(
                id.into(),
            )));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::LoadFailed {
                what: "episode".into(),
                reason: e.to_string(),
            })
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::Corrupted {
                what: format!("episode {id}"),
                reason: e.to_string(),
            })
        })
    }

    /// Keyword search: score each index entry by the fraction of query
    /// keywords it contains, return the top `limit` episodes.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Episode> {
        let query_keywords = extract_keywords(query);
        if query_keywords.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f32, &EpisodeIndexEntry)> = self
            .index
            .iter()
            .filter_map(|entry| {
                let score = keyword_score(&entry.keywords, &query_keywords);
                (score > 0.0).then_some((score, entry))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(limit)
            .filter_map(|(_, entry)| self.get(&entry.id).ok())
            .collect()
    }

    pub fn search_by_category(&self, category: &str, limit: usize) -> Vec<Episode> {
        self.index
            .iter()
            .filter(|entry| entry.category == category)
            .take(limit)
            .filter_map(|entry| self.get(&entry.id).ok())
            .collect()
    }

    pub fn recent(&self, limit: usize) -> Vec<Episode> {
        let mut sorted: Vec<&EpisodeIndexEntry> = self.index.iter().collect();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sorted
            .into_iter()
            .take(limit)
            .filter_map(|entry| self.get(&entry.id).ok())
            .collect()
    }

    pub fn successful(&self, limit: usize) -> Vec<Episode> {
        self.index
            .iter()
            .filter(|entry| entry.success)
            .take(limit)
            .filter_map(|entry| self.get(&entry.id).ok())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.index.len()
    }

    pub fn count_successful(&self) -> usize {
        self.index.iter().filter(|entry| entry.success).count()
    }

    /// Load every stored episode (used to seed the training buffer).
    pub fn all_episodes(&self) -> Vec<Episode> {
        self.index
            .iter()
            .filter_map(|entry| self.get(&entry.id).ok())
            .collect()
    }

    fn load_index(path: &Path) -> Vec<EpisodeIndexEntry> {
        if !path.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
        {
            Some(index) => index,
            None => {
                warn!(path = %path.display(), "Episode index unreadable, starting empty");
                Vec::new()
            }
        }
    }

    fn save_index(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.index)?;
        std::fs::write(&self.index_path, json).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "episode index".into(),
                reason: e.to_string(),
            })
        })
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "to", "of", "in", "for", "on",
    "with", "at", "by", "from", "it", "this", "that", "these", "those", "i", "you", "we", "and",
    "or", "but", "if", "then", "else", "when", "while",
];

/// Tokenize text into search keywords: lowercase, strip punctuation,
/// drop stop-words and tokens shorter than 3 characters, deduplicate.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for raw in text.split_whitespace() {
        let word: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        if word.len() < 3 || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            keywords.push(word);
        }
    }

    keywords
}

fn keyword_score(episode_keywords: &[String], query_keywords: &[String]) -> f32 {
    if episode_keywords.is_empty() || query_keywords.is_empty() {
        return 0.0;
    }
    let set: HashSet<&String> = episode_keywords.iter().collect();
    let matches = query_keywords.iter().filter(|k| set.contains(k)).count();
    matches as f32 / query_keywords.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(id: &str, description: &str, success: bool) -> Episode {
        let now = Utc::now();
        Episode {
            id: id.into(),
            task_description: description.into(),
            task_category: "general".into(),
            started_at: now,
            completed_at: now,
            files_involved: vec![],
            actions: vec![EpisodeAction::new(
                "file_read",
                serde_json::json!({"file_path": "a.txt"}),
                "contents",
                true,
            )],
            outcome: EpisodeOutcome {
                success,
                turns_taken: 2,
                tools_used: 1,
                duration_ms: 1200,
                summary: "done".into(),
                failure_reason: None,
            },
            learnings: vec![],
            keywords: vec![],
        }
    }

    #[test]
    fn keyword_extraction_rules() {
        let keywords = extract_keywords("Read the README.md file and summarize it!");
        assert!(keywords.contains(&"read".to_string()));
        assert!(keywords.contains(&"readmemd".to_string()));
        assert!(keywords.contains(&"file".to_string()));
        assert!(keywords.contains(&"summarize".to_string()));
        // Stop words and short tokens are gone.
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"and".to_string()));
        assert!(!keywords.contains(&"it".to_string()));
    }

    #[test]
    fn result_summary_truncated() {
        let long = "x".repeat(2000);
        let action = EpisodeAction::new("shell", serde_json::json!({}), &long, true);
        assert_eq!(action.result_summary.len(), RESULT_SUMMARY_MAX);
    }

    #[test]
    fn store_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = EpisodicMemory::new(dir.path()).unwrap();

        memory
            .store(&episode("ep_1", "read configuration file and report settings", true))
            .unwrap();
        memory
            .store(&episode("ep_2", "download weather data from the network", false))
            .unwrap();

        let results = memory.search("read the configuration file", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "ep_1");

        assert_eq!(memory.count(), 2);
        assert_eq!(memory.count_successful(), 1);
    }

    #[test]
    fn episode_roundtrip_preserves_actions() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = EpisodicMemory::new(dir.path()).unwrap();
        memory.store(&episode("ep_rt", "roundtrip test case", true)).unwrap();

        let loaded = memory.get("ep_rt").unwrap();
        assert_eq!(loaded.actions.len(), 1);
        assert_eq!(loaded.actions[0].tool, "file_read");
        assert!(loaded.outcome.success);
    }

    #[test]
    fn missing_episode_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let memory = EpisodicMemory::new(dir.path()).unwrap();
        let err = memory.get("ep_ghost").unwrap_err();
        assert!(matches!(
            err,
            ironquill_core::Error::Memory(MemoryError::EpisodeNotFound(_))
        ));
    }

    #[test]
    fn corrupt_index_recovers_empty_but_episodes_survive() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut memory = EpisodicMemory::new(dir.path()).unwrap();
            memory.store(&episode("ep_keep", "keep this episode", true)).unwrap();
        }

        std::fs::write(dir.path().join("index.json"), "garbage{{{").unwrap();

        let memory = EpisodicMemory::new(dir.path()).unwrap();
        assert_eq!(memory.count(), 0); // index wiped
        assert!(memory.get("ep_keep").is_ok()); // episode file intact
    }

    #[test]
    fn recent_orders_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = EpisodicMemory::new(dir.path()).unwrap();

        let mut old = episode("ep_old", "an older completed task", true);
        old.completed_at = Utc::now() - chrono::Duration::hours(5);
        memory.store(&old).unwrap();
        memory.store(&episode("ep_new", "the newest task", true)).unwrap();

        let recent = memory.recent(1);
        assert_eq!(recent[0].id, "ep_new");
    }
}
