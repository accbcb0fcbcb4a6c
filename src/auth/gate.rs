use std::sync::atomic::{AtomicUsize, Ordering};

/// Out-of-band side effect fired when the session is unrecoverable: the
/// application is expected to navigate to its sign-in surface.
pub trait SignInGate: Send + Sync {
    fn on_session_expired(&self);
}

/// Default gate for processes without a navigation surface.
#[derive(Debug, Default)]
pub struct LoggingSignInGate;

impl SignInGate for LoggingSignInGate {
    fn on_session_expired(&self) {
        tracing::warn!("session expired; sign-in required");
    }
}

// Minimal fake implementation for basic use only.
// Extend with redirect targets when needed.
#[derive(Debug, Default)]
pub struct FakeSignInGate {
    redirects: AtomicUsize,
}

impl FakeSignInGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl SignInGate for FakeSignInGate {
    fn on_session_expired(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }
}
