//! Peer transport abstraction.
//!
//! A session runs over two peer transport legs, the publisher and the
//! subscriber. The ICE/DTLS/SRTP machinery behind them is not part of this
//! crate: implement [`TransportFactory`], [`PeerTransport`] and
//! [`DataChannel`] on top of the WebRTC stack of your choice and hand the
//! factory to [`Engine::start`](crate::Engine::start).
//!
//! Legs report what happens to them by pushing [`RtcEvent`]s into the
//! channel they receive at creation. The engine consumes those events on its
//! background loop, so implementations must never block on the engine.
//!
//! # Offers
//!
//! A leg never talks to the signaling server directly. When it has an offer
//! to send (after [`negotiate`](PeerTransport::negotiate) or
//! [`create_and_send_offer`](PeerTransport::create_and_send_offer)) it emits
//! [`RtcEvent::Offer`], which the engine forwards through the signaling
//! collaborator.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::protocol::{
    DataPacketKind, IceCandidate, IceServer, ParticipantSid, SessionDescription, SignalTarget,
    TrackSid,
};

/// Label of the reliable data channel.
pub const RELIABLE_DC_LABEL: &str = "_reliable";

/// Label of the lossy data channel.
pub const LOSSY_DC_LABEL: &str = "_lossy";

/// Sender half handed to every leg at creation.
pub type RtcEmitter = mpsc::UnboundedSender<RtcEvent>;

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

/// Configuration shared by both legs of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataChannelInit {
    pub ordered: bool,
    /// `Some(0)` disables retransmission entirely.
    pub max_retransmits: Option<u16>,
}

impl DataChannelInit {
    /// Ordered, fully retransmitted.
    pub fn reliable() -> Self {
        Self {
            ordered: true,
            max_retransmits: None,
        }
    }

    /// Unordered, zero retransmits.
    pub fn lossy() -> Self {
        Self {
            ordered: false,
            max_retransmits: Some(0),
        }
    }
}

// ── States ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// `true` for states that mean the leg lost its connection.
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

// ── Events ──────────────────────────────────────────────────────────

/// A remote media track that arrived on the subscriber leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub participant_sid: ParticipantSid,
    pub track_sid: TrackSid,
}

/// Events produced by transport legs and their data channels.
pub enum RtcEvent {
    ConnectionStateChanged {
        target: SignalTarget,
        state: PeerConnectionState,
    },
    IceCandidate {
        target: SignalTarget,
        candidate: IceCandidate,
    },
    /// Output of the leg's offer-creation hook.
    Offer {
        target: SignalTarget,
        offer: SessionDescription,
    },
    TrackAdded {
        track: RemoteTrack,
    },
    TrackRemoved {
        track: RemoteTrack,
    },
    /// The remote side opened a data channel on the given leg.
    DataChannelOpened {
        target: SignalTarget,
        channel: Arc<dyn DataChannel>,
    },
    DataChannelStateChanged {
        target: SignalTarget,
        label: String,
        state: DataChannelState,
    },
    DataReceived {
        kind: DataPacketKind,
        payload: Vec<u8>,
    },
}

impl fmt::Debug for RtcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionStateChanged { target, state } => f
                .debug_struct("ConnectionStateChanged")
                .field("target", target)
                .field("state", state)
                .finish(),
            Self::IceCandidate { target, .. } => f
                .debug_struct("IceCandidate")
                .field("target", target)
                .finish_non_exhaustive(),
            Self::Offer { target, .. } => f
                .debug_struct("Offer")
                .field("target", target)
                .finish_non_exhaustive(),
            Self::TrackAdded { track } => f.debug_struct("TrackAdded").field("track", track).finish(),
            Self::TrackRemoved { track } => {
                f.debug_struct("TrackRemoved").field("track", track).finish()
            }
            Self::DataChannelOpened { target, channel } => f
                .debug_struct("DataChannelOpened")
                .field("target", target)
                .field("label", &channel.label())
                .finish(),
            Self::DataChannelStateChanged {
                target,
                label,
                state,
            } => f
                .debug_struct("DataChannelStateChanged")
                .field("target", target)
                .field("label", label)
                .field("state", state)
                .finish(),
            Self::DataReceived { kind, payload } => f
                .debug_struct("DataReceived")
                .field("kind", kind)
                .field("len", &payload.len())
                .finish(),
        }
    }
}

// ── Traits ──────────────────────────────────────────────────────────

/// A data channel on one of the legs.
#[async_trait]
pub trait DataChannel: Send + Sync + 'static {
    fn label(&self) -> String;

    /// Negotiated stream id.
    fn id(&self) -> u16;

    fn state(&self) -> DataChannelState;

    /// Send one binary message.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Network`] if the channel rejects the message.
    async fn send(&self, payload: &[u8]) -> Result<(), EngineError>;

    fn close(&self);
}

/// One peer transport leg.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    fn target(&self) -> SignalTarget;

    fn connection_state(&self) -> PeerConnectionState;

    /// Create a data channel on this leg.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying connection refuses the channel.
    fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>, EngineError>;

    /// Request (debounced) renegotiation. The resulting offer is emitted as
    /// [`RtcEvent::Offer`].
    fn negotiate(&self);

    /// Create an offer immediately and emit it as [`RtcEvent::Offer`].
    ///
    /// # Errors
    ///
    /// Returns an error if the offer cannot be created.
    async fn create_and_send_offer(&self, ice_restart: bool) -> Result<(), EngineError>;

    /// Mark the leg as undergoing an ICE restart initiated by the remote side.
    fn set_restarting_ice(&self);

    /// Apply a remote description. Returns the local answer when `desc` is
    /// an offer.
    ///
    /// # Errors
    ///
    /// Returns an error if the description is rejected.
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<Option<SessionDescription>, EngineError>;

    /// # Errors
    ///
    /// Returns an error if the candidate is rejected.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// # Errors
    ///
    /// Returns an error if the configuration cannot be applied.
    fn set_configuration(&self, config: &RtcConfiguration) -> Result<(), EngineError>;

    fn local_description(&self) -> Option<SessionDescription>;

    fn remote_description(&self) -> Option<SessionDescription>;

    async fn close(&self);
}

/// Creates transport legs.
pub trait TransportFactory: Send + Sync + 'static {
    /// Create one leg. `primary` tells the leg whether it carries the
    /// authoritative "session connected" signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying peer connection cannot be created.
    fn create(
        &self,
        config: &RtcConfiguration,
        target: SignalTarget,
        primary: bool,
        events: RtcEmitter,
    ) -> Result<Arc<dyn PeerTransport>, EngineError>;
}
