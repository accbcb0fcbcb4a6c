use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheConfig, CacheEntry, storage_key};
use crate::storage::KeyValueStore;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http error: {status}")]
    Http { status: u16 },
    #[error("session expired: {0}")]
    SessionExpired(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Fetch port for one resource identified by its key. The cached fetch
/// unit never talks to a concrete client; `ApiClient` implements this.
#[async_trait::async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<String, FetchError>;
}

/// What a call site observes: the latest value if any, whether a fetch
/// cycle is still running, and whether the last cycle exhausted its retries.
#[derive(Debug)]
pub struct ResourceState<T> {
    pub data: Option<Arc<T>>,
    pub is_pending: bool,
    pub is_error: bool,
}

impl<T> Clone for ResourceState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            is_pending: self.is_pending,
            is_error: self.is_error,
        }
    }
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_pending: false,
            is_error: false,
        }
    }
}

struct Cycle {
    generation: u64,
    token: CancellationToken,
    key: Option<String>,
}

struct LoaderInner<T> {
    fetcher: Arc<dyn ResourceFetcher>,
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
    tx: watch::Sender<ResourceState<T>>,
    cycle: Mutex<Cycle>,
}

impl<T> LoaderInner<T> {
    /// Publish a state update iff the cycle is still current. The lock
    /// makes the generation check and the send atomic against `set_key`,
    /// so a superseded cycle can never overwrite a newer cycle's state.
    fn publish(&self, generation: u64, state: ResourceState<T>) -> bool {
        let Ok(cycle) = self.cycle.lock() else {
            return false;
        };
        if cycle.generation != generation || cycle.token.is_cancelled() {
            return false;
        }
        self.tx.send_replace(state);
        true
    }
}

/// Stateful handle over one logical resource fetch: persisted
/// stale-while-revalidate cache, bounded exponential-backoff retry, and
/// cancellation of superseded cycles. Drop-in replacement for a raw fetch
/// at a call site that may re-key or go away at any time.
pub struct CachedResource<T> {
    inner: Arc<LoaderInner<T>>,
    root: CancellationToken,
}

impl<T> CachedResource<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        store: Arc<dyn KeyValueStore>,
        config: CacheConfig,
    ) -> Self {
        let (tx, _rx) = watch::channel(ResourceState::default());
        let root = CancellationToken::new();
        let inner = Arc::new(LoaderInner {
            fetcher,
            store,
            config,
            tx,
            cycle: Mutex::new(Cycle {
                generation: 0,
                token: root.child_token(),
                key: None,
            }),
        });
        Self { inner, root }
    }

    /// Point the handle at a resource key, superseding any earlier cycle.
    pub fn set_key(&self, key: impl Into<String>) {
        self.start_cycle(key.into(), false);
    }

    /// Manual escape hatch: re-run the current key ignoring freshness.
    pub fn refetch(&self) {
        let key = match self.inner.cycle.lock() {
            Ok(cycle) => cycle.key.clone(),
            Err(_) => None,
        };
        match key {
            Some(key) => self.start_cycle(key, true),
            None => tracing::debug!("refetch with no key set"),
        }
    }

    pub fn snapshot(&self) -> ResourceState<T> {
        self.inner.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
        self.inner.tx.subscribe()
    }

    /// Cancel the current cycle and any scheduled retry.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    fn start_cycle(&self, key: String, force: bool) {
        let token = self.root.child_token();
        let generation = {
            let Ok(mut cycle) = self.inner.cycle.lock() else {
                return;
            };
            cycle.token.cancel();
            cycle.generation += 1;
            cycle.token = token.clone();
            cycle.key = Some(key.clone());
            cycle.generation
        };
        tokio::spawn(run_cycle(self.inner.clone(), key, generation, token, force));
    }
}

impl<T> Drop for CachedResource<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn run_cycle<T>(
    inner: Arc<LoaderInner<T>>,
    key: String,
    generation: u64,
    cancel: CancellationToken,
    force: bool,
) where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let now = Utc::now().timestamp_millis();
    let mut interim: Option<Arc<T>> = None;

    if let Some(entry) = read_entry::<T>(inner.store.as_ref(), &key) {
        let fresh = entry.is_fresh(now, inner.config.stale_time);
        let data = Arc::new(entry.data);
        if fresh && !force {
            tracing::debug!(%key, "cache hit, no network call");
            inner.publish(
                generation,
                ResourceState {
                    data: Some(data),
                    is_pending: false,
                    is_error: false,
                },
            );
            return;
        }
        // Best-effort value while revalidating in the background.
        interim = Some(data);
    }

    inner.publish(
        generation,
        ResourceState {
            data: interim.clone(),
            is_pending: true,
            is_error: false,
        },
    );

    let mut attempt = 0u32;
    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = inner.fetcher.fetch(&key) => result,
        };

        let decoded = fetched.and_then(|body| {
            serde_json::from_str::<T>(&body).map_err(|e| FetchError::Decode(e.to_string()))
        });

        match decoded {
            Ok(value) => {
                if cancel.is_cancelled() {
                    return;
                }
                let data = write_entry(inner.store.as_ref(), &key, value);
                inner.publish(
                    generation,
                    ResourceState {
                        data: Some(data),
                        is_pending: false,
                        is_error: false,
                    },
                );
                return;
            }
            Err(err) => {
                if attempt >= inner.config.max_retries {
                    tracing::warn!(%key, %err, attempts = attempt + 1, "fetch retries exhausted");
                    inner.publish(
                        generation,
                        ResourceState {
                            data: interim.clone(),
                            is_pending: false,
                            is_error: true,
                        },
                    );
                    return;
                }
                let delay = inner.config.initial_retry_delay * 2u32.saturating_pow(attempt);
                attempt += 1;
                tracing::debug!(%key, attempt, ?delay, %err, "scheduling fetch retry");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

fn read_entry<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    resource_key: &str,
) -> Option<CacheEntry<T>> {
    let skey = storage_key(resource_key);
    let raw = store.get(&skey)?;
    match serde_json::from_str(&raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(key = resource_key, "discarding corrupt cache entry: {}", e);
            store.remove(&skey);
            None
        }
    }
}

fn write_entry<T: Serialize>(store: &dyn KeyValueStore, resource_key: &str, data: T) -> Arc<T> {
    let skey = storage_key(resource_key);
    let now = Utc::now().timestamp_millis();
    // last_fetched is monotone per key even if the wall clock jumped back.
    let last_fetched = stored_last_fetched(store, &skey).map_or(now, |prev| prev.max(now));
    let entry = CacheEntry { data, last_fetched };
    match serde_json::to_string(&entry) {
        Ok(raw) => store.set(&skey, raw),
        Err(e) => tracing::error!(key = resource_key, "failed to serialize cache entry: {}", e),
    }
    Arc::new(entry.data)
}

fn stored_last_fetched(store: &dyn KeyValueStore, skey: &str) -> Option<i64> {
    let raw = store.get(skey)?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    value.get("lastFetched")?.as_i64()
}
