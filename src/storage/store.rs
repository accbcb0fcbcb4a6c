/// Narrow persisted key-value port shared by the credential store and the
/// resource cache. Implementations must be cheap to call from async code,
/// so the interface is synchronous string-in/string-out.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}
