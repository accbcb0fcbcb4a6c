use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::storage::KeyValueStore;

/// JSON-file-backed store. The whole map is loaded on open and written
/// through on every mutation, which is fine for the handful of credential
/// and cache keys a client process keeps.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| anyhow!("store file {:?} is not valid JSON: {}", path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(anyhow!("failed to read store file {:?}: {}", path, e)),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) {
        match serde_json::to_string_pretty(entries) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.path, raw) {
                    tracing::error!("failed to write store file {:?}: {}", self.path, e);
                }
            }
            Err(e) => tracing::error!("failed to serialize store: {}", e),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_owned(), value);
            self.flush(&entries);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.remove(key).is_some() {
                self.flush(&entries);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("courier-{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn persists_across_reopen() {
        let path = temp_path("reopen");

        let store = FileStore::open(&path).unwrap();
        store.set("a", "1".to_string());
        store.set("b", "2".to_string());
        store.remove("a");
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some("2".to_string()));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_malformed_file() {
        let path = temp_path("malformed");
        std::fs::write(&path, "not json").unwrap();
        assert!(FileStore::open(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
