use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;

use crate::transport::{Method, Transport, TransportError, TransportRequest, TransportResponse};

/// One scripted response for the fake transport.
#[derive(Debug, Clone)]
pub struct FakeOutcome {
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

impl FakeOutcome {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

// Scriptable transport for tests and demos. Responses are consumed per
// route in FIFO order; every request is recorded in arrival order so tests
// can assert on replay ordering and headers.
#[derive(Default)]
pub struct FakeTransport {
    scripts: DashMap<String, VecDeque<FakeOutcome>>,
    log: Mutex<Vec<TransportRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(method: Method, url: &str) -> String {
        format!("{} {}", method, url)
    }

    pub fn script(&self, method: Method, url: &str, outcome: FakeOutcome) {
        self.scripts
            .entry(Self::route(method, url))
            .or_default()
            .push_back(outcome);
    }

    /// Requests seen so far, in arrival order.
    pub fn log(&self) -> Vec<TransportRequest> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Count of requests seen for one route.
    pub fn calls_to(&self, method: Method, url: &str) -> usize {
        self.log()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let route = Self::route(request.method, &request.url);

        let outcome = self
            .scripts
            .get_mut(&route)
            .and_then(|mut q| q.pop_front());

        if let Ok(mut log) = self.log.lock() {
            log.push(request);
        }

        match outcome {
            Some(outcome) => {
                if outcome.latency > Duration::ZERO {
                    tokio::time::sleep(outcome.latency).await;
                }
                Ok(TransportResponse {
                    status: outcome.status,
                    body: outcome.body,
                })
            }
            None => Err(TransportError::Connection(format!(
                "no scripted response for {}",
                route
            ))),
        }
    }
}
