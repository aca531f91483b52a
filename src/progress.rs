use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::atomic;
use crate::error::PersistenceError;

/// Durable set of URLs that reached a recorded terminal outcome.
///
/// Backed by a JSON array of strings. The whole array is rewritten through a
/// temp file on every new entry, so the file on disk is always a complete,
/// duplicate-free array.
pub struct ProgressStore {
    path: PathBuf,
    seen: HashSet<String>,
    order: Vec<String>,
}

impl ProgressStore {
    /// Load prior progress. A missing file means a fresh start; an
    /// unreadable or malformed one is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let entries: Vec<String> = atomic::read_json(&path)?.unwrap_or_default();

        let mut store = ProgressStore {
            path,
            seen: HashSet::with_capacity(entries.len()),
            order: Vec::with_capacity(entries.len()),
        };
        let total = entries.len();
        for url in entries {
            if store.seen.insert(url.clone()) {
                store.order.push(url);
            }
        }
        if store.order.len() != total {
            debug!(
                "Dropped {} duplicate entries from {}",
                total - store.order.len(),
                store.path.display()
            );
        }

        info!("Loaded {} processed URLs from {}", store.len(), store.path.display());
        Ok(store)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    /// Record `url` as processed. Returns `false` (and writes nothing) if it
    /// was already present.
    pub fn record(&mut self, url: &str) -> Result<bool, PersistenceError> {
        if self.seen.contains(url) {
            return Ok(false);
        }
        self.order.push(url.to_string());
        if let Err(e) = atomic::write_json(&self.path, &self.order) {
            self.order.pop();
            return Err(e);
        }
        self.seen.insert(url.to_string());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::load(dir.path().join("progress.json")).unwrap();
        assert!(store.is_empty());
        assert!(!store.contains("https://shop.test/p/a/1"));
    }

    #[test]
    fn record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let mut store = ProgressStore::load(&path).unwrap();

        assert!(store.record("u1").unwrap());
        assert!(!store.record("u1").unwrap());
        assert!(store.record("u2").unwrap());
        assert!(!store.record("u1").unwrap());

        let on_disk: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["u1", "u2"]);
    }

    #[test]
    fn file_is_written_compact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let mut store = ProgressStore::load(&path).unwrap();
        store.record("u1").unwrap();
        store.record("u2").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"["u1","u2"]"#);
    }

    #[test]
    fn reload_sees_previous_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        {
            let mut store = ProgressStore::load(&path).unwrap();
            store.record("u1").unwrap();
        }
        let store = ProgressStore::load(&path).unwrap();
        assert!(store.contains("u1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicates_on_disk_are_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, r#"["u1","u2","u1"]"#).unwrap();

        let mut store = ProgressStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.record("u2").unwrap());
        store.record("u3").unwrap();

        let on_disk: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "[\"u1\", ").unwrap();

        let err = ProgressStore::load(&path).err().unwrap();
        assert!(matches!(err, PersistenceError::Corrupt { .. }));
    }

    #[test]
    fn wrong_shape_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, r#"{"urls": []}"#).unwrap();
        assert!(ProgressStore::load(&path).is_err());
    }
}
