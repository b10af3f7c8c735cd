//! Cancellable one-shot refresh timer.
//!
//! The timer never performs the refresh itself; on fire it emits
//! `TokenEvent::RefreshRequested` on the token store's event channel and the
//! session coordinator takes it from there. This keeps the storage layer free
//! of network concerns.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use super::token::TokenEvent;

/// At most one timer is outstanding per instance: arming always disarms the
/// previous timer first, so a stale timer can never fire against a
/// since-replaced credential.
#[derive(Default)]
pub struct RefreshTimer {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a refresh request after `delay`, cancelling any pending one.
    pub fn arm(&self, delay: Duration, events: broadcast::Sender<TokenEvent>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        debug!(delay_secs = delay.as_secs(), "arming refresh timer");
        // Anchor the deadline now, not at the spawned task's first poll.
        let deadline = tokio::time::Instant::now() + delay;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            debug!("refresh timer fired");
            let _ = events.send(TokenEvent::RefreshRequested);
        }));
    }

    /// Cancel the pending refresh request, if any.
    pub fn disarm(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pending.take() {
            debug!("disarming refresh timer");
            handle.abort();
        }
    }

    /// Whether a refresh request is currently scheduled.
    pub fn is_armed(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
