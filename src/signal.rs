//! Signaling collaborator.
//!
//! The [`SignalClient`] trait covers the outbound half of the signaling
//! channel: opening it (join or resume), and sending requests. Inbound
//! messages are delivered to the engine as [`SignalResponse`]s over the
//! channel passed to [`Engine::start`](crate::Engine::start).
//!
//! Message framing and encoding belong to the implementation.
//!
//! # Cancel Safety
//!
//! [`connect`](SignalClient::connect) may be dropped at any await point when a
//! connect is cancelled. Implementations must leave themselves in a state
//! where a later `connect` or [`close`](SignalClient::close) succeeds.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::options::ConnectOptions;
use crate::protocol::{
    IceCandidate, JoinResponse, ReconnectResponse, SessionDescription, SignalTarget, SyncState,
};
use crate::state::ReconnectMode;

/// Outcome of opening the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinResult {
    /// A fresh join handshake completed (boxed to reduce enum size).
    Joined(Box<JoinResponse>),
    /// An existing session was resumed (quick reconnect).
    Resumed(ReconnectResponse),
}

/// The signaling channel to the media server.
#[async_trait]
pub trait SignalClient: Send + Sync + 'static {
    /// Open the signaling channel.
    ///
    /// `reconnect_mode` is `None` for a fresh connect, `Some(Quick)` to resume
    /// the existing session with the same token, `Some(Full)` for a fresh
    /// join during a reconnection campaign.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Network`] if the channel cannot be opened or
    /// the server rejects the handshake.
    async fn connect(
        &self,
        url: &str,
        token: &str,
        options: &ConnectOptions,
        reconnect_mode: Option<ReconnectMode>,
        adaptive_stream: bool,
    ) -> Result<JoinResult, EngineError>;

    /// Start delivering inbound messages that were held back while the
    /// handshake completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not open.
    async fn resume_response_queue(&self) -> Result<(), EngineError>;

    /// Flush requests queued while the channel was down.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not open.
    async fn send_queued_requests(&self) -> Result<(), EngineError>;

    /// # Errors
    ///
    /// Returns an error if the channel is not open.
    async fn send_sync_state(&self, sync: SyncState) -> Result<(), EngineError>;

    /// # Errors
    ///
    /// Returns an error if the channel is not open.
    async fn send_candidate(
        &self,
        candidate: IceCandidate,
        target: SignalTarget,
    ) -> Result<(), EngineError>;

    /// # Errors
    ///
    /// Returns an error if the channel is not open.
    async fn send_offer(&self, offer: SessionDescription) -> Result<(), EngineError>;

    /// # Errors
    ///
    /// Returns an error if the channel is not open.
    async fn send_answer(&self, answer: SessionDescription) -> Result<(), EngineError>;

    /// Tell the server the client is leaving.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not open.
    async fn send_leave(&self) -> Result<(), EngineError>;

    /// Close the channel. Must be idempotent.
    async fn close(&self);
}
