//! Connection state and the exclusive-access state container.
//!
//! [`StateCell`] is the only way engine, room and participant state is
//! mutated. A mutation runs under the cell's lock; when an observer channel
//! is attached, the `(new, old)` snapshots are queued before the lock is
//! released so observers see changes in commit order, and are processed on
//! the observer's own task, outside the critical section.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::options::ConnectOptions;
use crate::reason::DisconnectReason;

// ── Connection state ────────────────────────────────────────────────

/// How a reconnection attempt restores the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    /// Reopen signaling and restart ICE on the existing legs.
    Quick,
    /// Tear down both legs and perform a fresh join.
    Full,
}

/// Authoritative connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected {
        reason: Option<DisconnectReason>,
    },
    Connecting,
    Connected,
    Reconnecting(ReconnectMode),
    Disconnecting,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::IDLE
    }
}

impl ConnectionState {
    /// The initial, never-connected state.
    pub const IDLE: Self = Self::Disconnected { reason: None };

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting(_))
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

// ── Timing ──────────────────────────────────────────────────────────

/// Labelled split times of a connect or reconnect sequence.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    started_at: Instant,
    splits: Vec<(&'static str, Duration)>,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
            splits: Vec::new(),
        }
    }

    /// Record the time elapsed since [`start`](Self::start) under `label`.
    pub fn split(&mut self, label: &'static str) {
        self.splits.push((label, self.started_at.elapsed()));
    }

    pub fn splits(&self) -> &[(&'static str, Duration)] {
        &self.splits
    }

    pub fn total(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}

// ── Engine state ────────────────────────────────────────────────────

/// Everything the engine knows about the current session.
///
/// Owned by the engine and only changed through its [`StateCell`].
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub connect_options: ConnectOptions,
    pub url: Option<String>,
    pub token: Option<String>,
    pub connection_state: ConnectionState,
    /// Mode of the reconnection campaign in progress, if any.
    pub reconnect_mode: Option<ReconnectMode>,
    /// Overrides the mode of the next reconnection attempt.
    pub next_preferred_reconnect_mode: Option<ReconnectMode>,
    /// Set once any local track has been negotiated onto the publisher leg.
    pub has_published: bool,
    pub timing: Stopwatch,
}

impl EngineState {
    pub fn new(connect_options: ConnectOptions) -> Self {
        Self {
            connect_options,
            connection_state: ConnectionState::IDLE,
            ..Default::default()
        }
    }

    /// `reconnecting` always carries a mode, and it matches `reconnect_mode`.
    pub fn is_consistent(&self) -> bool {
        match self.connection_state {
            ConnectionState::Reconnecting(mode) => self.reconnect_mode == Some(mode),
            _ => true,
        }
    }

    /// State kept across a full reconnect: options, credentials, and the
    /// campaign bookkeeping. Everything else returns to defaults.
    pub fn retained_for_full_reconnect(&self) -> Self {
        Self {
            connect_options: self.connect_options.clone(),
            url: self.url.clone(),
            token: self.token.clone(),
            connection_state: self.connection_state,
            reconnect_mode: self.reconnect_mode,
            next_preferred_reconnect_mode: self.next_preferred_reconnect_mode,
            has_published: false,
            timing: self.timing.clone(),
        }
    }

    /// State after a terminal clean-up.
    pub fn finalized(&self, reason: Option<DisconnectReason>) -> Self {
        Self {
            connect_options: self.connect_options.clone(),
            connection_state: ConnectionState::Disconnected { reason },
            ..Default::default()
        }
    }
}

// ── StateCell ───────────────────────────────────────────────────────

/// A committed state transition.
#[derive(Debug, Clone)]
pub struct StateChange<T> {
    pub new: T,
    pub old: T,
}

/// Exclusive-mutation container with atomic snapshots.
#[derive(Debug)]
pub struct StateCell<T> {
    value: Mutex<T>,
    observer: Option<mpsc::UnboundedSender<StateChange<T>>>,
}

impl<T: Clone + Send + 'static> StateCell<T> {
    /// A cell without observers.
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            observer: None,
        }
    }

    /// A cell whose committed mutations are queued on the returned receiver.
    pub fn observed(value: T) -> (Self, mpsc::UnboundedReceiver<StateChange<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cell = Self {
            value: Mutex::new(value),
            observer: Some(tx),
        };
        (cell, rx)
    }

    /// Read through a closure while holding the lock.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.lock())
    }

    /// A clone of the current value.
    pub fn snapshot(&self) -> T {
        self.value.lock().clone()
    }

    /// Apply `f` exclusively and queue the `(new, old)` change for observers.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.mutate_checked(f, |_| true)
    }

    /// Like [`mutate`](Self::mutate), asserting `invariant` on the result.
    ///
    /// A violated invariant is a programming error and panics.
    pub fn mutate_checked<R>(
        &self,
        f: impl FnOnce(&mut T) -> R,
        invariant: impl FnOnce(&T) -> bool,
    ) -> R {
        let mut guard = self.value.lock();
        let old = self.observer.as_ref().map(|_| guard.clone());
        let result = f(&mut guard);
        assert!(invariant(&guard), "state invariant violated");
        if let (Some(observer), Some(old)) = (&self.observer, old) {
            // Only queued here; the observer task does the work.
            let _ = observer.send(StateChange {
                new: guard.clone(),
                old,
            });
        }
        result
    }
}
