//! User-facing engine events.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{
    ConnectionQuality, DataPacketKind, ParticipantIdentity, ParticipantSid, RoomInfo, StreamState,
    TrackSid,
};
use crate::reason::DisconnectReason;
use crate::room::ActiveSpeaker;
use crate::state::{ConnectionState, ReconnectMode};

/// Events delivered on the receiver returned by
/// [`Engine::start`](crate::Engine::start).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Every committed change of [`ConnectionState`].
    ConnectionStateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },
    /// A reconnection campaign started.
    Reconnecting { mode: ReconnectMode },
    /// A reconnection attempt is about to run.
    ReconnectAttempt { attempt: u32, mode: ReconnectMode },
    /// A reconnection campaign succeeded.
    Reconnected,
    /// The session ended. Always delivered.
    Disconnected { reason: Option<DisconnectReason> },

    RoomUpdated { room: RoomInfo },
    ParticipantConnected { identity: ParticipantIdentity },
    ParticipantDisconnected { identity: ParticipantIdentity },
    /// Sorted by descending audio level.
    ActiveSpeakersChanged { speakers: Vec<ActiveSpeaker> },
    ConnectionQualityChanged {
        sid: ParticipantSid,
        quality: ConnectionQuality,
    },
    TrackMuted {
        sid: ParticipantSid,
        track_sid: TrackSid,
    },
    TrackUnmuted {
        sid: ParticipantSid,
        track_sid: TrackSid,
    },
    LocalTrackUnpublished { track_sid: TrackSid },
    TrackSubscribed {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
    },
    TrackUnsubscribed {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
    },
    TrackSubscriptionPermissionChanged {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
        allowed: bool,
    },
    TrackStreamStateChanged {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
        state: StreamState,
    },
    DataReceived {
        kind: DataPacketKind,
        payload: Vec<u8>,
    },
}

/// Sender side of the bounded event channel.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Emit an event. If the channel is full, log a warning and drop it so
    /// the engine never blocks on a slow consumer.
    pub fn emit(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }

    /// Emit an event that must never be dropped, waiting for channel space.
    pub async fn emit_reliable(&self, event: EngineEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }
}
