//! Reasons attached to a `disconnected` connection state.
//!
//! Server-supplied reasons arrive inside leave requests and serialize using
//! `snake_case` to match the signaling payloads. Client-side reasons
//! (`ClientInitiated`, `UserCancelled`, `NetworkError`) are produced by the
//! engine itself when it finalizes a session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a session ended.
///
/// Use [`description()`](DisconnectReason::description) for a human-readable
/// explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    #[default]
    UnknownReason,

    // Client side
    ClientInitiated,
    UserCancelled,
    NetworkError,

    // Server side
    DuplicateIdentity,
    ServerShutdown,
    ParticipantRemoved,
    RoomDeleted,
    StateMismatch,
    JoinFailure,
    Migration,
    SignalClose,
    RoomClosed,
}

impl DisconnectReason {
    /// Returns a human-readable description of this reason.
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnknownReason => "The session ended for an unknown reason.",

            Self::ClientInitiated => "The client disconnected from the room.",
            Self::UserCancelled => "The connection attempt was cancelled before it completed.",
            Self::NetworkError => {
                "The connection to the server was lost and could not be re-established."
            }

            Self::DuplicateIdentity => {
                "Another participant joined the room with the same identity."
            }
            Self::ServerShutdown => "The media server is shutting down.",
            Self::ParticipantRemoved => "The participant was removed from the room.",
            Self::RoomDeleted => "The room was deleted.",
            Self::StateMismatch => {
                "The client and server disagreed about the session state."
            }
            Self::JoinFailure => "The server could not complete the join handshake.",
            Self::Migration => "The session is being migrated to another server.",
            Self::SignalClose => "The signaling connection was closed by the server.",
            Self::RoomClosed => "The room was closed.",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
