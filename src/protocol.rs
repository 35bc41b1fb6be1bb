//! Signaling data types exchanged with the signaling collaborator.
//!
//! The engine never encodes or decodes signaling frames itself; the
//! [`SignalClient`](crate::signal::SignalClient) implementation owns the wire
//! format. Every type here derives `serde` so JSON-based collaborators can
//! use them directly. Inbound messages are modelled by [`SignalResponse`].

use serde::{Deserialize, Serialize};

use crate::reason::DisconnectReason;

// ── Type aliases ────────────────────────────────────────────────────

/// Server-assigned participant identifier.
pub type ParticipantSid = String;

/// Application-assigned participant identity, unique within a room.
pub type ParticipantIdentity = String;

/// Server-assigned track identifier.
pub type TrackSid = String;

// ── Enums ───────────────────────────────────────────────────────────

/// One of the two peer transport legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTarget {
    Publisher,
    Subscriber,
}

/// Delivery guarantee of a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPacketKind {
    /// Ordered, retransmitted.
    Reliable,
    /// Unordered, zero retransmits.
    Lossy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    #[default]
    Joining,
    Joined,
    Active,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    #[default]
    Unknown,
    Lost,
    Poor,
    Good,
    Excellent,
}

/// Per-track buffering/availability reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    #[default]
    Active,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpType {
    Offer,
    Answer,
}

// ── Structs ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClientConfiguration {
    /// Restrict ICE to relay candidates.
    #[serde(default)]
    pub force_relay: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerInfo {
    pub version: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RoomInfo {
    pub sid: String,
    pub name: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub active_recording: bool,
    #[serde(default)]
    pub num_participants: u32,
    #[serde(default)]
    pub num_publishers: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub sid: TrackSid,
    pub name: String,
    pub kind: TrackKind,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub mime_type: String,
    /// Codecs already published for this track.
    #[serde(default)]
    pub codecs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParticipantInfo {
    pub sid: ParticipantSid,
    pub identity: ParticipantIdentity,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub state: ParticipantStatus,
    #[serde(default)]
    pub tracks: Vec<TrackInfo>,
}

/// Payload of the join handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub room: RoomInfo,
    pub participant: ParticipantInfo,
    #[serde(default)]
    pub other_participants: Vec<ParticipantInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    /// When `true` the subscriber leg is primary.
    #[serde(default)]
    pub subscriber_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_configuration: Option<ClientConfiguration>,
}

/// Payload returned when signaling is resumed for a quick reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReconnectResponse {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_configuration: Option<ClientConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerInfo {
    pub sid: ParticipantSid,
    pub level: f32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionQualityInfo {
    pub participant_sid: ParticipantSid,
    pub quality: ConnectionQuality,
    #[serde(default)]
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteTrackRequest {
    pub sid: TrackSid,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPermissionUpdate {
    pub participant_sid: ParticipantSid,
    pub track_sid: TrackSid,
    pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStateInfo {
    pub participant_sid: ParticipantSid,
    pub track_sid: TrackSid,
    pub state: StreamState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    /// Whether the server allows the client to resume with a full reconnect.
    pub can_reconnect: bool,
    #[serde(default)]
    pub reason: DisconnectReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedCodecs {
    pub track_sid: TrackSid,
    pub codecs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: String,
    #[serde(default)]
    pub sdp_m_line_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPublishedResponse {
    /// Client-side id the track was published under.
    pub cid: String,
    pub track: TrackInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChannelInfo {
    pub label: String,
    pub id: u16,
    pub target: SignalTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UpdateSubscription {
    pub track_sids: Vec<TrackSid>,
    pub subscribe: bool,
}

/// Sent on quick reconnect so the server can restore the prior session intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub answer: SessionDescription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    /// Only the tracks whose subscription differs from the auto-subscribe
    /// default.
    pub subscription: UpdateSubscription,
    pub publish_tracks: Vec<TrackPublishedResponse>,
    pub data_channels: Vec<DataChannelInfo>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Inbound signaling events dispatched to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SignalResponse {
    /// Join handshake completed (boxed to reduce enum size).
    Join(Box<JoinResponse>),
    RoomUpdate { room: RoomInfo },
    SpeakersChanged { speakers: Vec<SpeakerInfo> },
    ConnectionQuality { updates: Vec<ConnectionQualityInfo> },
    /// The server muted or unmuted one of the local tracks.
    Mute(MuteTrackRequest),
    SubscriptionPermissionUpdate(SubscriptionPermissionUpdate),
    StreamStateUpdate { stream_states: Vec<StreamStateInfo> },
    ParticipantUpdate { participants: Vec<ParticipantInfo> },
    TrackPublished(TrackPublishedResponse),
    TrackUnpublished { track_sid: TrackSid },
    SubscribedCodecs(SubscribedCodecs),
    Leave(LeaveRequest),
    /// State of the signaling channel itself.
    ConnectionStateChanged { connected: bool },
    Offer(SessionDescription),
    Answer(SessionDescription),
    Trickle {
        candidate: IceCandidate,
        target: SignalTarget,
    },
    RefreshToken { token: String },
}
