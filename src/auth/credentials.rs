use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::KeyValueStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken(pub String);

/// The one credential pair the client owns. Mutated only by a successful
/// sign-in or refresh, destroyed on sign-out or terminal refresh failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

const CREDENTIALS_KEY: &str = "auth.credentials";

/// Persisted home of the credential pair. A stored value that fails to
/// parse is discarded, so a corrupt blob reads as "signed out".
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Option<CredentialPair> {
        let raw = self.store.get(CREDENTIALS_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!("discarding corrupt credential blob: {}", e);
                self.store.remove(CREDENTIALS_KEY);
                None
            }
        }
    }

    pub fn save(&self, pair: &CredentialPair) {
        match serde_json::to_string(pair) {
            Ok(raw) => self.store.set(CREDENTIALS_KEY, raw),
            Err(e) => tracing::error!("failed to serialize credentials: {}", e),
        }
    }

    pub fn clear(&self) {
        self.store.remove(CREDENTIALS_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn pair(access: &str, refresh: &str) -> CredentialPair {
        CredentialPair {
            access_token: AccessToken(access.to_string()),
            refresh_token: RefreshToken(refresh.to_string()),
        }
    }

    #[test]
    fn save_load_clear() {
        let store = Arc::new(MemoryStore::new());
        let creds = CredentialStore::new(store);

        assert_eq!(creds.load(), None);

        creds.save(&pair("T1", "R1"));
        assert_eq!(creds.load(), Some(pair("T1", "R1")));

        creds.save(&pair("T2", "R2"));
        assert_eq!(creds.load(), Some(pair("T2", "R2")));

        creds.clear();
        assert_eq!(creds.load(), None);
    }

    #[test]
    fn corrupt_blob_reads_as_absent_and_is_removed() {
        let store = Arc::new(MemoryStore::new());
        store.set("auth.credentials", "{not json".to_string());

        let creds = CredentialStore::new(store.clone());
        assert_eq!(creds.load(), None);
        assert_eq!(store.get("auth.credentials"), None);
    }

    #[test]
    fn pair_uses_camel_case_on_the_wire() {
        let raw = serde_json::to_string(&pair("T2", "R2")).unwrap();
        assert_eq!(raw, r#"{"accessToken":"T2","refreshToken":"R2"}"#);
    }
}
