//! Persistent set of drive-file ids whose handling reached a terminal
//! outcome.
//!
//! On disk this is a JSON list. String elements are the processed ids;
//! anything else in the list is treated as opaque and preserved verbatim on
//! rewrite. Writes go to a temp file in the same directory followed by an
//! atomic rename, so a crash never leaves a truncated state file. The set
//! never shrinks during a process lifetime.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

struct ProcessedInner {
    ids: HashSet<String>,
    /// Non-string list elements found in the file; kept as-is on rewrite.
    opaque: Vec<serde_json::Value>,
}

pub struct ProcessedSet {
    path: PathBuf,
    inner: RwLock<ProcessedInner>,
}

impl ProcessedSet {
    /// Load the set from `path`. A missing file is an empty set.
    pub fn load(path: &Path) -> Result<Self, String> {
        let inner = match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProcessedInner {
                ids: HashSet::new(),
                opaque: Vec::new(),
            },
            Err(e) => return Err(format!("Failed to read {}: {}", path.display(), e)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(inner),
        })
    }

    fn parse(raw: &str) -> Result<ProcessedInner, String> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| format!("Invalid processed-set JSON: {}", e))?;
        let list = value
            .as_array()
            .ok_or_else(|| "Processed-set file is not a JSON list".to_string())?;

        let mut ids = HashSet::new();
        let mut opaque = Vec::new();
        for element in list {
            match element.as_str() {
                Some(id) => {
                    ids.insert(id.to_string());
                }
                None => opaque.push(element.clone()),
            }
        }

        Ok(ProcessedInner { ids, opaque })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.ids.contains(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record `id` and persist the set atomically.
    pub fn insert(&self, id: &str) -> Result<(), String> {
        let snapshot = {
            let mut inner = self
                .inner
                .write()
                .map_err(|e| format!("Processed-set lock poisoned: {}", e))?;
            inner.ids.insert(id.to_string());
            Self::render(&inner)
        };
        self.persist(&snapshot)
    }

    fn render(inner: &ProcessedInner) -> String {
        let mut ids: Vec<&String> = inner.ids.iter().collect();
        ids.sort();

        let mut list: Vec<serde_json::Value> = ids
            .into_iter()
            .map(|id| serde_json::Value::String(id.clone()))
            .collect();
        list.extend(inner.opaque.iter().cloned());

        serde_json::to_string_pretty(&serde_json::Value::Array(list))
            .expect("processed-set JSON is always serializable")
    }

    fn persist(&self, contents: &str) -> Result<(), String> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| format!("Failed to create temp state file: {}", e))?;
        temp.write_all(contents.as_bytes())
            .map_err(|e| format!("Failed to write temp state file: {}", e))?;
        temp.flush()
            .map_err(|e| format!("Failed to flush temp state file: {}", e))?;
        temp.persist(&self.path)
            .map_err(|e| format!("Failed to replace {}: {}", self.path.display(), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let set = ProcessedSet::load(&dir.path().join("processed.json")).unwrap();
        assert!(set.is_empty());
        assert!(!set.contains("anything"));
    }

    #[test]
    fn test_insert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");

        let set = ProcessedSet::load(&path).unwrap();
        set.insert("file-a").unwrap();
        set.insert("file-b").unwrap();
        assert!(set.contains("file-a"));

        let reloaded = ProcessedSet::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("file-a"));
        assert!(reloaded.contains("file-b"));
    }

    #[test]
    fn test_opaque_elements_survive_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");
        std::fs::write(&path, r#"["file-a", {"migrated_from": "v0"}]"#).unwrap();

        let set = ProcessedSet::load(&path).unwrap();
        set.insert("file-b").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let list = value.as_array().unwrap();
        assert!(list.iter().any(|v| v["migrated_from"] == "v0"));
        assert!(list.iter().any(|v| v == "file-a"));
        assert!(list.iter().any(|v| v == "file-b"));
    }

    #[test]
    fn test_non_list_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");
        std::fs::write(&path, r#"{"processed": []}"#).unwrap();
        assert!(ProcessedSet::load(&path).is_err());
    }
}
