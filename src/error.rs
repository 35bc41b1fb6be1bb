//! Error types for the conference engine.

use thiserror::Error;

use crate::reason::DisconnectReason;

/// Errors that can occur while driving a session.
///
/// `Clone` so that a single failure can be handed to every waiter of an
/// [`AsyncCompleter`](crate::completer::AsyncCompleter).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// An operation was invoked in a state that does not allow it, or a
    /// required collaborator is absent.
    #[error("invalid state: {0}")]
    State(String),

    /// A signaling or transport collaborator failed.
    #[error("network error: {0}")]
    Network(String),

    /// An in-flight operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// A completer deadline elapsed.
    #[error("operation timed out")]
    Timeout,
}

impl EngineError {
    /// Shorthand for [`EngineError::State`].
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Shorthand for [`EngineError::Network`].
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// The reason recorded when this error terminates a connect attempt.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::Cancelled => DisconnectReason::UserCancelled,
            Self::Network(_) | Self::Timeout => DisconnectReason::NetworkError,
            Self::State(_) => DisconnectReason::StateMismatch,
        }
    }
}

/// A specialized [`Result`] type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
