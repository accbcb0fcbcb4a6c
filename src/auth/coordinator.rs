use tokio::sync::{Mutex, oneshot};

use crate::auth::ClientError;
use crate::transport::{Method, TransportResponse};

/// Everything needed to reissue a request after the refresh settles.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

/// A request parked while a refresh is in flight. Resolved exactly once
/// when the refresh settles; never persisted.
pub struct PendingRequest {
    pub request: RequestSpec,
    pub respond_to: oneshot::Sender<Result<TransportResponse, ClientError>>,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    queue: Vec<PendingRequest>,
}

/// Outcome of joining the refresh cycle: either this caller drives the
/// refresh, or it waits for the driver to replay its request.
pub enum RefreshRole {
    Leader(RequestSpec),
    Follower(oneshot::Receiver<Result<TransportResponse, ClientError>>),
}

/// Single-flight gate for the credential refresh. While a refresh is in
/// flight every further authorization failure queues in arrival order
/// instead of issuing a second refresh call.
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, request: RequestSpec) -> RefreshRole {
        let mut state = self.state.lock().await;
        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.queue.push(PendingRequest {
                request,
                respond_to: tx,
            });
            RefreshRole::Follower(rx)
        } else {
            state.refreshing = true;
            RefreshRole::Leader(request)
        }
    }

    /// Take the next batch of queued waiters, in arrival order. When the
    /// queue is empty the cycle ends: the refreshing flag is cleared and
    /// `None` is returned. Only the leader may call this.
    pub async fn drain_or_finish(&self) -> Option<Vec<PendingRequest>> {
        let mut state = self.state.lock().await;
        if state.queue.is_empty() {
            state.refreshing = false;
            None
        } else {
            Some(std::mem::take(&mut state.queue))
        }
    }

    pub async fn is_refreshing(&self) -> bool {
        self.state.lock().await.refreshing
    }
}
