use dashmap::DashMap;

use crate::storage::KeyValueStore;

/// In-memory store, used by tests and the "fake" persistence backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: String) {
        self.entries.insert(key.to_owned(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k"), None);

        store.set("k", "v1".to_string());
        assert_eq!(store.get("k"), Some("v1".to_string()));

        store.set("k", "v2".to_string());
        assert_eq!(store.get("k"), Some("v2".to_string()));

        store.remove("k");
        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());
    }
}
