//! Per-session control tokens.
//!
//! Each running turn registers a `ControlToken`. `cancel()` makes the agent
//! loop wind down after the in-flight tool returns; `pause()` parks the
//! loop at its cursor until `resume()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Cancellation + pause flag checked by the agent loop at state
/// transitions.
#[derive(Clone, Default)]
pub struct ControlToken {
    inner: Arc<ControlInner>,
}

#[derive(Default)]
struct ControlInner {
    cancelled: AtomicBool,
    paused: AtomicBool,
    resume: Notify,
}

impl ControlToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        // A paused loop must wake up to observe the cancellation.
        self.inner.resume.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
        self.inner.resume.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Block while paused. Returns immediately when not paused; returns on
    /// cancellation even if still paused.
    pub async fn wait_if_paused(&self) {
        while self.is_paused() && !self.is_cancelled() {
            let notified = self.inner.resume.notified();
            // Re-check after arming the notification to avoid a lost wakeup.
            if !self.is_paused() || self.is_cancelled() {
                break;
            }
            notified.await;
        }
    }
}

/// Active control tokens per session.
#[derive(Default)]
pub struct ControlMap {
    tokens: Mutex<HashMap<String, ControlToken>>,
}

impl ControlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a session's turn.
    pub fn register(&self, session_id: &str) -> ControlToken {
        let token = ControlToken::new();
        self.tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn, if any. Returns whether one was found.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn pause(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.pause();
                true
            }
            None => false,
        }
    }

    pub fn resume(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.resume();
                true
            }
            None => false,
        }
    }

    /// Remove the token when the turn completes.
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}
