use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::auth::{
    AccessToken, CredentialPair, CredentialStore, RefreshCoordinator, RefreshRole, RequestSpec,
    SignInGate,
};
use crate::cache::{FetchError, ResourceFetcher};
use crate::storage::KeyValueStore;
use crate::transport::{
    Method, Transport, TransportError, TransportRequest, TransportResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {status} for {path}")]
    Http {
        status: u16,
        path: String,
        body: String,
    },
    #[error("session expired: {0}")]
    SessionExpired(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub refresh_path: String,
    pub sign_in_path: String,
    /// A hung refresh call would otherwise block the queue forever, so the
    /// refresh itself is bounded; expiry counts as refresh failure.
    pub refresh_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            sign_in_path: "/auth/login".to_string(),
            refresh_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequestBody<'a> {
    refresh_token: &'a crate::auth::RefreshToken,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequestBody<'a> {
    username: &'a str,
    password: &'a str,
}

/// Authenticated API client. Every request carries the persisted access
/// token; a 401 triggers at most one single-flight refresh and one replay,
/// coordinated across all concurrent call sites.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    coordinator: RefreshCoordinator,
    gate: Arc<dyn SignInGate>,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        gate: Arc<dyn SignInGate>,
        config: ApiConfig,
    ) -> Self {
        Self {
            transport,
            credentials: CredentialStore::new(store),
            coordinator: RefreshCoordinator::new(),
            gate,
            config,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Issue an authenticated request and parse the response body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ClientError> {
        let response = self
            .execute(RequestSpec {
                method,
                path: path.to_string(),
                body,
            })
            .await?;
        if !response.is_success() {
            return Err(ClientError::Http {
                status: response.status,
                path: path.to_string(),
                body: response.body,
            });
        }
        serde_json::from_str(&response.body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Authenticated GET returning the raw body, for callers that do their
    /// own decoding (the cached fetch unit consumes this through the
    /// `ResourceFetcher` port).
    pub async fn get_raw(&self, path: &str) -> Result<String, ClientError> {
        let response = self
            .execute(RequestSpec {
                method: Method::Get,
                path: path.to_string(),
                body: None,
            })
            .await?;
        if !response.is_success() {
            return Err(ClientError::Http {
                status: response.status,
                path: path.to_string(),
                body: response.body,
            });
        }
        Ok(response.body)
    }

    pub async fn sign_in(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let body = serde_json::to_string(&SignInRequestBody { username, password })
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let request = TransportRequest::new(Method::Post, self.url(&self.config.sign_in_path))
            .with_header("content-type", "application/json")
            .with_body(body);
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(ClientError::Http {
                status: response.status,
                path: self.config.sign_in_path.clone(),
                body: response.body,
            });
        }
        let pair: CredentialPair = serde_json::from_str(&response.body)
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        self.credentials.save(&pair);
        tracing::info!("signed in");
        Ok(())
    }

    pub fn sign_out(&self) {
        self.credentials.clear();
        tracing::info!("signed out");
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn execute(&self, spec: RequestSpec) -> Result<TransportResponse, ClientError> {
        let request_id = Uuid::new_v4();
        tracing::debug!(%request_id, method = %spec.method, path = %spec.path, "outbound request");

        let token = self.credentials.load().map(|pair| pair.access_token);
        let response = self.send_once(&spec, token.as_ref()).await?;
        if response.status != 401 {
            return Ok(response);
        }

        tracing::debug!(%request_id, path = %spec.path, "authorization failure, joining refresh");
        match self.coordinator.join(spec).await {
            RefreshRole::Leader(spec) => self.lead_refresh(spec).await,
            RefreshRole::Follower(rx) => rx
                .await
                .map_err(|_| ClientError::SessionExpired("refresh abandoned".to_string()))?,
        }
    }

    async fn send_once(
        &self,
        spec: &RequestSpec,
        token: Option<&AccessToken>,
    ) -> Result<TransportResponse, ClientError> {
        let mut request = TransportRequest::new(spec.method, self.url(&spec.path));
        if let Some(token) = token {
            request = request.with_header("authorization", format!("Bearer {}", token.0));
        }
        if let Some(body) = &spec.body {
            request = request
                .with_header("content-type", "application/json")
                .with_body(body.to_string());
        }
        Ok(self.transport.send(request).await?)
    }

    /// Drive the refresh and settle every waiter. Queued requests are
    /// replayed in arrival order, the triggering request last, and each is
    /// replayed at most once: a 401 on a replay is final.
    async fn lead_refresh(&self, spec: RequestSpec) -> Result<TransportResponse, ClientError> {
        match self.run_refresh().await {
            Ok(access) => {
                while let Some(batch) = self.coordinator.drain_or_finish().await {
                    for pending in batch {
                        let result = self.send_once(&pending.request, Some(&access)).await;
                        let _ = pending.respond_to.send(result);
                    }
                }
                self.send_once(&spec, Some(&access)).await
            }
            Err(cause) => {
                tracing::warn!(%cause, "refresh failed, session terminated");
                self.credentials.clear();
                self.gate.on_session_expired();
                while let Some(batch) = self.coordinator.drain_or_finish().await {
                    for pending in batch {
                        let _ = pending
                            .respond_to
                            .send(Err(ClientError::SessionExpired(cause.clone())));
                    }
                }
                Err(ClientError::SessionExpired(cause))
            }
        }
    }

    async fn run_refresh(&self) -> Result<AccessToken, String> {
        let Some(pair) = self.credentials.load() else {
            return Err("no stored credentials".to_string());
        };

        let body = serde_json::to_string(&RefreshRequestBody {
            refresh_token: &pair.refresh_token,
        })
        .map_err(|e| e.to_string())?;
        let request = TransportRequest::new(Method::Post, self.url(&self.config.refresh_path))
            .with_header("content-type", "application/json")
            .with_body(body);

        tracing::debug!("issuing credential refresh");
        let response = tokio::time::timeout(self.config.refresh_timeout, self.transport.send(request))
            .await
            .map_err(|_| "refresh timed out".to_string())?
            .map_err(|e| e.to_string())?;

        if !response.is_success() {
            return Err(format!("refresh rejected with status {}", response.status));
        }

        let pair: CredentialPair =
            serde_json::from_str(&response.body).map_err(|e| format!("refresh decode: {}", e))?;
        self.credentials.save(&pair);
        tracing::debug!("credentials refreshed");
        Ok(pair.access_token)
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for ApiClient {
    async fn fetch(&self, key: &str) -> Result<String, FetchError> {
        self.get_raw(key).await.map_err(|e| match e {
            ClientError::Http { status, .. } => FetchError::Http { status },
            ClientError::SessionExpired(cause) => FetchError::SessionExpired(cause),
            other => FetchError::Transport(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{FakeSignInGate, RefreshToken};
    use crate::storage::MemoryStore;
    use crate::transport::{FakeOutcome, FakeTransport};

    const BASE: &str = "http://api.test";

    struct Harness {
        client: Arc<ApiClient>,
        transport: Arc<FakeTransport>,
        store: Arc<MemoryStore>,
        gate: Arc<FakeSignInGate>,
    }

    fn harness(with_credentials: bool) -> Harness {
        let transport = Arc::new(FakeTransport::new());
        let store = Arc::new(MemoryStore::new());
        let gate = Arc::new(FakeSignInGate::new());
        let client = Arc::new(ApiClient::new(
            transport.clone(),
            store.clone(),
            gate.clone(),
            ApiConfig {
                base_url: BASE.to_string(),
                ..ApiConfig::default()
            },
        ));
        if with_credentials {
            client.credentials().save(&CredentialPair {
                access_token: AccessToken("T1".to_string()),
                refresh_token: RefreshToken("R1".to_string()),
            });
        }
        Harness {
            client,
            transport,
            store,
            gate,
        }
    }

    fn url(path: &str) -> String {
        format!("{}{}", BASE, path)
    }

    fn refresh_ok(transport: &FakeTransport, latency_ms: u64) {
        transport.script(
            Method::Post,
            &url("/auth/refresh"),
            FakeOutcome::ok(r#"{"accessToken":"T2","refreshToken":"R2"}"#)
                .with_latency(Duration::from_millis(latency_ms)),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_then_replay_with_new_token() {
        let h = harness(true);
        h.transport
            .script(Method::Get, &url("/users/me"), FakeOutcome::status(401, ""));
        refresh_ok(&h.transport, 0);
        h.transport.script(
            Method::Get,
            &url("/users/me"),
            FakeOutcome::ok(r#"{"id":"u1"}"#),
        );

        let me: serde_json::Value = h.client.request(Method::Get, "/users/me", None).await.unwrap();
        assert_eq!(me["id"], "u1");

        // The persisted pair is rotated and the replay carries the new token.
        assert_eq!(
            h.client.credentials().load(),
            Some(CredentialPair {
                access_token: AccessToken("T2".to_string()),
                refresh_token: RefreshToken("R2".to_string()),
            })
        );
        let log = h.transport.log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].header("authorization"), Some("Bearer T1"));
        assert_eq!(log[2].header("authorization"), Some("Bearer T2"));
        assert_eq!(h.transport.calls_to(Method::Post, &url("/auth/refresh")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_failures_share_one_refresh_and_replay_in_order() {
        let h = harness(true);
        for (path, latency) in [("/a", 10), ("/b", 20), ("/c", 30)] {
            h.transport.script(
                Method::Get,
                &url(path),
                FakeOutcome::status(401, "").with_latency(Duration::from_millis(latency)),
            );
            h.transport.script(
                Method::Get,
                &url(path),
                FakeOutcome::ok(&format!(r#"{{"from":"{}"}}"#, path)),
            );
        }
        refresh_ok(&h.transport, 100);

        let mut handles = Vec::new();
        for path in ["/a", "/b", "/c"] {
            let client = h.client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .request::<serde_json::Value>(Method::Get, path, None)
                    .await
            }));
        }
        for (handle, path) in handles.into_iter().zip(["/a", "/b", "/c"]) {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value["from"], path);
        }

        assert_eq!(h.transport.calls_to(Method::Post, &url("/auth/refresh")), 1);

        // /a led the refresh, so /b and /c replay first in queue order and
        // the triggering request goes last. All replays carry the new token.
        let log = h.transport.log();
        let replays: Vec<_> = log[4..].iter().map(|r| r.url.clone()).collect();
        assert_eq!(replays, vec![url("/b"), url("/c"), url("/a")]);
        for request in &log[4..] {
            assert_eq!(request.header("authorization"), Some("Bearer T2"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_authorization_failure_is_final() {
        let h = harness(true);
        h.transport
            .script(Method::Get, &url("/me"), FakeOutcome::status(401, ""));
        refresh_ok(&h.transport, 0);
        h.transport
            .script(Method::Get, &url("/me"), FakeOutcome::status(401, ""));

        let err = h
            .client
            .request::<serde_json::Value>(Method::Get, "/me", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 401, .. }));
        assert_eq!(h.transport.calls_to(Method::Post, &url("/auth/refresh")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_ends_the_session_for_all_waiters() {
        let h = harness(true);
        for (path, latency) in [("/a", 10), ("/b", 20)] {
            h.transport.script(
                Method::Get,
                &url(path),
                FakeOutcome::status(401, "").with_latency(Duration::from_millis(latency)),
            );
        }
        h.transport.script(
            Method::Post,
            &url("/auth/refresh"),
            FakeOutcome::status(401, "").with_latency(Duration::from_millis(100)),
        );

        let mut handles = Vec::new();
        for path in ["/a", "/b"] {
            let client = h.client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .request::<serde_json::Value>(Method::Get, path, None)
                    .await
            }));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, ClientError::SessionExpired(_)));
        }

        assert_eq!(h.client.credentials().load(), None);
        assert_eq!(h.gate.redirects(), 1);
        assert_eq!(h.transport.calls_to(Method::Post, &url("/auth/refresh")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_authorization_failures_pass_through() {
        let h = harness(true);
        h.transport
            .script(Method::Get, &url("/x"), FakeOutcome::status(500, "boom"));

        let err = h
            .client
            .request::<serde_json::Value>(Method::Get, "/x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 500, .. }));

        // No refresh attempted and credentials untouched.
        assert_eq!(h.transport.calls_to(Method::Post, &url("/auth/refresh")), 0);
        assert!(h.client.credentials().load().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_fail_without_a_refresh_call() {
        let h = harness(false);
        h.transport
            .script(Method::Get, &url("/me"), FakeOutcome::status(401, ""));

        let err = h
            .client
            .request::<serde_json::Value>(Method::Get, "/me", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::SessionExpired(_)));
        assert_eq!(h.transport.calls_to(Method::Post, &url("/auth/refresh")), 0);
        assert_eq!(h.gate.redirects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_persists_the_pair_and_sign_out_destroys_it() {
        let h = harness(false);
        h.transport.script(
            Method::Post,
            &url("/auth/login"),
            FakeOutcome::ok(r#"{"accessToken":"T1","refreshToken":"R1"}"#),
        );

        h.client.sign_in("alice", "secret").await.unwrap();
        assert!(h.client.credentials().load().is_some());
        assert!(h.store.get("auth.credentials").is_some());

        h.client.sign_out();
        assert_eq!(h.client.credentials().load(), None);
    }
}
