//! Single-slot, broadcast-resolution suspension primitive.
//!
//! An [`AsyncCompleter`] starts empty. Any number of tasks may
//! [`wait`](AsyncCompleter::wait) on it; the first
//! [`resume`](AsyncCompleter::resume) resolves the slot and every waiter
//! present at that moment receives a clone of the same value. Later waits
//! return the resolved value immediately until the completer is
//! [`reset`](AsyncCompleter::reset), which fails all pending waiters with
//! [`EngineError::Network`] and returns the slot to empty.
//!
//! The engine keeps one completer per "leg connected" condition and resets it
//! whenever the leg drops, so stale waits fail fast instead of hanging.
//! `Cancelled` is never produced here.

use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
struct Slot<T> {
    /// Bumped on every reset. A waiter that observes a different generation
    /// than the one it started with was cancelled.
    generation: u64,
    value: Option<T>,
}

/// Single-slot async completer with timeout and reset.
#[derive(Debug)]
pub struct AsyncCompleter<T> {
    label: &'static str,
    slot: watch::Sender<Slot<T>>,
}

impl<T: Clone + Send + Sync + 'static> AsyncCompleter<T> {
    /// Create an empty completer. `label` only appears in logs.
    pub fn new(label: &'static str) -> Self {
        let (slot, _) = watch::channel(Slot {
            generation: 0,
            value: None,
        });
        Self { label, slot }
    }

    /// Suspend until the completer resolves, returning the resolved value.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Timeout`] if `timeout` elapses first.
    /// - [`EngineError::Network`] if the completer is reset while waiting.
    pub async fn wait(&self, timeout: Duration) -> Result<T> {
        let mut rx = self.slot.subscribe();
        let generation = {
            let slot = rx.borrow_and_update();
            if let Some(value) = &slot.value {
                return Ok(value.clone());
            }
            slot.generation
        };

        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return Err(self.reset_error());
                }
                let slot = rx.borrow_and_update();
                if slot.generation != generation {
                    return Err(self.reset_error());
                }
                if let Some(value) = &slot.value {
                    return Ok(value.clone());
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                debug!(completer = self.label, ?timeout, "wait timed out");
                Err(EngineError::Timeout)
            }
        }
    }

    /// Resolve the completer. No-op if it is already resolved.
    pub fn resume(&self, value: T) {
        let resolved = self.slot.send_if_modified(|slot| {
            if slot.value.is_some() {
                return false;
            }
            slot.value = Some(value);
            true
        });
        if resolved {
            debug!(completer = self.label, "resolved");
        }
    }

    /// Fail pending waiters with [`EngineError::Network`] and return to empty.
    pub fn reset(&self) {
        self.slot.send_modify(|slot| {
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = None;
        });
        debug!(completer = self.label, "reset");
    }

    /// Returns `true` if the completer currently holds a value.
    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().value.is_some()
    }

    fn reset_error(&self) -> EngineError {
        EngineError::network(format!("{} was reset", self.label))
    }
}
