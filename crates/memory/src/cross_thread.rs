//! Cross-thread memory — facts that outlive any single session.
//!
//! A namespaced key/value map persisted as one JSON document. A corrupt
//! file recovers to an empty map; facts are cheap to regenerate.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use ironquill_core::error::{MemoryError, Result};

pub struct CrossThreadMemory {
    path: PathBuf,
    data: HashMap<String, HashMap<String, Value>>,
}

impl CrossThreadMemory {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        std::fs::create_dir_all(&storage_dir).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "cross-thread storage".into(),
                reason: e.to_string(),
            })
        })?;
        let path = storage_dir.join("cross_thread.json");
        let data = Self::load_data(&path);
        Ok(Self { path, data })
    }

    pub fn store(&mut self, namespace: &str, key: &str, value: Value) {
        self.data
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn retrieve(&self, namespace: &str, key: &str) -> Option<&Value> {
        self.data.get(namespace).and_then(|ns| ns.get(key))
    }

    pub fn list_keys(&self, namespace: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn remove(&mut self, namespace: &str, key: &str) {
        if let Some(ns) = self.data.get_mut(namespace) {
            ns.remove(key);
        }
    }

    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&self.path, json).map_err(|e| {
            ironquill_core::Error::Memory(MemoryError::SaveFailed {
                what: "cross-thread memory".into(),
                reason: e.to_string(),
            })
        })
    }

    fn load_data(path: &Path) -> HashMap<String, HashMap<String, Value>> {
        if !path.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
        {
            Some(data) => data,
            None => {
                warn!(path = %path.display(), "Cross-thread memory unreadable, starting empty");
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_retrieve_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = CrossThreadMemory::new(dir.path()).unwrap();

        memory.store("facts", "editor", serde_json::json!("helix"));
        assert_eq!(
            memory.retrieve("facts", "editor"),
            Some(&serde_json::json!("helix"))
        );
        assert!(memory.retrieve("facts", "shell").is_none());
        assert!(memory.retrieve("other", "editor").is_none());

        memory.remove("facts", "editor");
        assert!(memory.retrieve("facts", "editor").is_none());
    }

    #[test]
    fn list_keys_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut memory = CrossThreadMemory::new(dir.path()).unwrap();
        memory.store("prefs", "zeta", serde_json::json!(1));
        memory.store("prefs", "alpha", serde_json::json!(2));
        assert_eq!(memory.list_keys("prefs"), vec!["alpha", "zeta"]);
        assert!(memory.list_keys("empty").is_empty());
    }

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut memory = CrossThreadMemory::new(dir.path()).unwrap();
            memory.store("facts", "os", serde_json::json!({"name": "linux"}));
            memory.save().unwrap();
        }

        let memory = CrossThreadMemory::new(dir.path()).unwrap();
        assert_eq!(
            memory.retrieve("facts", "os").unwrap()["name"],
            serde_json::json!("linux")
        );
    }

    #[test]
    fn corrupt_file_recovers_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cross_thread.json"), "][not json").unwrap();

        let memory = CrossThreadMemory::new(dir.path()).unwrap();
        assert!(memory.list_keys("facts").is_empty());
    }
}
