//! The tool-selection recommender model.
//!
//! Ranks available tools for a task from keyword evidence and recent
//! action history. Before any training has happened (cold start), or
//! after a model failure (fallback), the deterministic ranker below is
//! the prediction path with confidence discounted by half. The learned
//! parameters live behind an opaque versioned blob on disk.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

use ironquill_config::TrmConfig;
use ironquill_core::error::{Error, Result, TrmError};
use ironquill_memory::EpisodeAction;

/// On-disk model header.
const MODEL_MAGIC: &[u8] = b"GPAGENT_TRM_V1";

/// Where the recommender is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrmStatus {
    NotInitialized,
    /// No trained weights yet; heuristic ranking with discounted confidence.
    ColdStart,
    Training,
    /// Trained weights loaded.
    Ready,
    /// Load or training failed; behaves like cold start.
    Fallback,
}

/// A ranked recommendation for one task.
#[derive(Debug, Clone)]
pub struct TrmPrediction {
    pub recommended_tool: String,
    /// In `[0, 1]`; halved outside Ready mode.
    pub confidence: f32,
    pub ranked_tools: Vec<(String, f32)>,
}

pub struct TrmModel {
    config: TrmConfig,
    status: RwLock<TrmStatus>,
}

impl TrmModel {
    pub fn new(config: TrmConfig) -> Self {
        Self {
            config,
            status: RwLock::new(TrmStatus::ColdStart),
        }
    }

    pub fn status(&self) -> TrmStatus {
        *self.status.read().unwrap()
    }

    pub fn set_status(&self, status: TrmStatus) {
        *self.status.write().unwrap() = status;
    }

    /// Whether predictions are currently available.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.status(),
            TrmStatus::ColdStart | TrmStatus::Training | TrmStatus::Ready | TrmStatus::Fallback
        )
    }

    pub fn can_start_training(&self, episode_count: usize) -> bool {
        episode_count >= self.config.min_episodes_before_training
    }

    /// Rank the available tools for a task.
    ///
    /// Scoring: +0.5 when the tool name appears in the task text,
    /// +0.5 × (curated-keyword matches / keyword count), then a recency
    /// boost of 0.15 × (weighted history share) per tool, clamped to 1.
    pub fn predict(
        &self,
        task: &str,
        available_tools: &[String],
        history: &[EpisodeAction],
    ) -> Option<TrmPrediction> {
        let status = self.status();
        if status == TrmStatus::NotInitialized || available_tools.is_empty() {
            return None;
        }

        let mut ranked = keyword_match(task, available_tools);

        if !history.is_empty() {
            // Recency weighting: the most recent action (last in the
            // list) weighs `history.len()`, the oldest weighs 1.
            let mut history_weight: std::collections::HashMap<&str, usize> =
                std::collections::HashMap::new();
            for (position, action) in history.iter().enumerate() {
                *history_weight.entry(action.tool.as_str()).or_insert(0) += position + 1;
            }

            for (tool, score) in &mut ranked {
                if let Some(weight) = history_weight.get(tool.as_str()) {
                    let boost = 0.15 * (*weight as f32 / history.len() as f32);
                    *score = (*score + boost).min(1.0);
                }
            }
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        }

        let top = ranked.first()?.clone();
        let (recommended_tool, top_score) = if top.1 > 0.0 {
            top
        } else {
            // No evidence at all: nominate the first tool at low confidence.
            (available_tools[0].clone(), 0.2)
        };

        let confidence = match status {
            TrmStatus::Ready => top_score,
            _ => top_score * 0.5,
        };

        debug!(tool = %recommended_tool, confidence, "Recommender prediction");
        Some(TrmPrediction {
            recommended_tool,
            confidence,
            ranked_tools: ranked,
        })
    }

    /// Load learned parameters. A missing file is `NotFound`; a bad
    /// header is `ModelCorrupted`. Success marks the model Ready.
    pub fn load(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }

        let mut file = std::fs::File::open(path)?;
        let mut header = vec![0u8; MODEL_MAGIC.len()];
        file.read_exact(&mut header).map_err(|_| {
            Error::Trm(TrmError::ModelCorrupted(format!(
                "{}: truncated header",
                path.display()
            )))
        })?;
        if header != MODEL_MAGIC {
            self.set_status(TrmStatus::Fallback);
            return Err(Error::Trm(TrmError::ModelCorrupted(format!(
                "{}: unrecognized header",
                path.display()
            ))));
        }

        self.set_status(TrmStatus::Ready);
        info!(path = %path.display(), "Loaded recommender model");
        Ok(())
    }

    /// Persist learned parameters as a versioned blob. Fails when the
    /// model has never been initialized; creates parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.status() == TrmStatus::NotInitialized {
            return Err(Error::InvalidState(
                "cannot save an uninitialized model".into(),
            ));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::File::create(path)?;
        file.write_all(MODEL_MAGIC)?;
        let params = serde_json::json!({
            "hidden_size": self.config.hidden_size,
            "num_layers": self.config.num_layers,
            "mode": self.config.mode,
        });
        file.write_all(params.to_string().as_bytes())?;
        Ok(())
    }
}

/// Curated keyword vocabulary per tool. Small on purpose: these are the
/// words users actually type when they want the tool.
fn tool_keywords(tool: &str) -> &'static [&'static str] {
    match tool {
        "file_read" => &[
            "read", "file", "content", "show", "view", "cat", "look", "see", "check", "open",
            "text",
        ],
        "file_write" => &["write", "create", "save", "new", "file", "output", "generate"],
        "file_edit" => &["edit", "modify", "change", "update", "fix", "replace", "refactor"],
        "shell" | "bash" => &[
            "run", "execute", "command", "shell", "terminal", "script", "install", "build",
            "compile", "test",
        ],
        "grep" => &["search", "find", "grep", "look", "locate", "pattern", "match", "where"],
        "glob" => &["files", "list", "find", "pattern", "directory", "folder"],
        "web_search" => &[
            "search", "web", "internet", "online", "find", "lookup", "query", "information",
        ],
        "web_fetch" => &[
            "fetch", "url", "website", "page", "download", "http", "link", "browse", "visit",
        ],
        "memory_store" => &["remember", "store", "save", "note", "memorize", "fact"],
        "memory_recall" => &["recall", "remember", "retrieve", "memory", "past", "previous"],
        _ => &[],
    }
}

fn keyword_match(task: &str, tools: &[String]) -> Vec<(String, f32)> {
    let task_lower = task.to_lowercase();
    let task_words: std::collections::HashSet<String> = task_lower
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| !c.is_ascii_punctuation())
                .collect::<String>()
        })
        .filter(|w| w.len() >= 3)
        .collect();

    let mut scores: Vec<(String, f32)> = tools
        .iter()
        .map(|tool| {
            let mut score = 0.0f32;

            if task_lower.contains(&tool.to_lowercase()) {
                score += 0.5;
            }

            let keywords = tool_keywords(tool);
            if !keywords.is_empty() {
                let matches = keywords
                    .iter()
                    .filter(|k| task_words.contains(**k))
                    .count();
                score += matches as f32 / keywords.len() as f32 * 0.5;
            }

            (tool.clone(), score)
        })
        .collect();

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn action(tool: &str) -> EpisodeAction {
        EpisodeAction {
            tool: tool.into(),
            arguments: serde_json::json!({}),
            success: true,
            error: None,
            result_summary: String::new(),
            execution_time_ms: 0,
            timestamp: Utc::now(),
        }
    }

    fn tools(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn model() -> TrmModel {
        TrmModel::new(TrmConfig::default())
    }

    #[test]
    fn starts_in_cold_start() {
        let model = model();
        assert_eq!(model.status(), TrmStatus::ColdStart);
        assert!(model.is_ready());
    }

    #[test]
    fn keyword_evidence_ranks_matching_tool_first() {
        let model = model();
        let prediction = model
            .predict(
                "Please read the contents of the config file",
                &tools(&["shell", "file_read", "web_fetch"]),
                &[],
            )
            .unwrap();
        assert_eq!(prediction.recommended_tool, "file_read");
        assert!(prediction.confidence > 0.0);
    }

    #[test]
    fn tool_name_substring_adds_half_point() {
        let model = model();
        let prediction = model
            .predict(
                "use web_fetch on https://example.com",
                &tools(&["file_read", "web_fetch"]),
                &[],
            )
            .unwrap();
        assert_eq!(prediction.recommended_tool, "web_fetch");
        // Name substring (0.5) plus keyword hits: well above the halved floor.
        assert!(prediction.ranked_tools[0].1 >= 0.5);
    }

    #[test]
    fn history_boost_breaks_ties() {
        let model = model();
        let history = vec![action("shell"), action("shell"), action("shell")];
        let prediction = model
            .predict("continue the task", &tools(&["file_read", "shell"]), &history)
            .unwrap();
        assert_eq!(prediction.recommended_tool, "shell");
    }

    #[test]
    fn most_recent_action_gets_strongest_boost() {
        let model = model();
        // Neither tool matches the task text; only recency separates
        // them. shell is the most recent action, so its weight is 2
        // against file_read's 1 and it must rank first.
        let history = vec![action("file_read"), action("shell")];
        let prediction = model
            .predict(
                "continue working on it",
                &tools(&["file_read", "shell"]),
                &history,
            )
            .unwrap();

        assert_eq!(prediction.recommended_tool, "shell");
        let scores: std::collections::HashMap<&str, f32> = prediction
            .ranked_tools
            .iter()
            .map(|(name, score)| (name.as_str(), *score))
            .collect();
        // shell: 0.15 × (2/2); file_read: 0.15 × (1/2).
        assert!((scores["shell"] - 0.15).abs() < 1e-6);
        assert!((scores["file_read"] - 0.075).abs() < 1e-6);
    }

    #[test]
    fn confidence_halved_outside_ready() {
        let model = model();
        let task = "read the file";
        let available = tools(&["file_read"]);

        let cold = model.predict(task, &available, &[]).unwrap();
        model.set_status(TrmStatus::Ready);
        let ready = model.predict(task, &available, &[]).unwrap();

        assert!((cold.confidence - ready.confidence * 0.5).abs() < 1e-6);
    }

    #[test]
    fn no_evidence_falls_back_to_first_tool() {
        let model = model();
        let prediction = model
            .predict("zzz qqq xyzzy", &tools(&["alpha_tool", "beta_tool"]), &[])
            .unwrap();
        assert_eq!(prediction.recommended_tool, "alpha_tool");
        assert!(prediction.confidence <= 0.2);
    }

    #[test]
    fn no_tools_means_no_prediction() {
        let model = model();
        assert!(model.predict("anything", &[], &[]).is_none());
    }

    #[test]
    fn not_initialized_gives_no_prediction() {
        let model = model();
        model.set_status(TrmStatus::NotInitialized);
        assert!(model.predict("read file", &tools(&["file_read"]), &[]).is_none());
    }

    #[test]
    fn save_then_load_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trm").join("model.bin");

        let model = model();
        model.save(&path).unwrap();

        let loaded = TrmModel::new(TrmConfig::default());
        loaded.load(&path).unwrap();
        assert_eq!(loaded.status(), TrmStatus::Ready);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let model = model();
        let err = model.load(&dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn load_bad_header_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, b"NOT_A_MODEL_FILE").unwrap();

        let model = model();
        let err = model.load(&path).unwrap_err();
        assert!(matches!(err, Error::Trm(TrmError::ModelCorrupted(_))));
        assert_eq!(model.status(), TrmStatus::Fallback);
    }

    #[test]
    fn save_uninitialized_fails() {
        let dir = tempfile::tempdir().unwrap();
        let model = model();
        model.set_status(TrmStatus::NotInitialized);
        let err = model.save(&dir.path().join("model.bin")).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
