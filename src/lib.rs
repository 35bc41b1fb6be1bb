//! # Conference Engine
//!
//! Client-side connection engine for real-time audio/video/data
//! conferencing sessions.
//!
//! The engine establishes, maintains and recovers a session with a media
//! server over a signaling channel plus two peer transport legs (publisher
//! and subscriber), and projects server-pushed events onto a local room
//! model.
//!
//! ## Features
//!
//! - **Collaborator-agnostic**: implement [`SignalClient`] and
//!   [`TransportFactory`] on top of any signaling transport and WebRTC stack
//! - **Transparent recovery**: quick (ICE restart) and full (re-join)
//!   reconnection with a bounded retry policy
//! - **Event-driven**: receive typed [`EngineEvent`]s via a channel
//!
//! ## Quick Start
//!
//! ```text
//! let (engine, mut events) = Engine::start(collaborators, EngineOptions::new());
//! engine.connect("wss://media.example.com", &token, None).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod completer;
pub mod data_channel;
pub mod engine;
pub mod error;
pub mod event;
pub mod gate;
pub mod options;
pub mod projector;
pub mod protocol;
pub mod reason;
pub mod reconnect;
pub mod room;
pub mod signal;
pub mod state;
pub mod transport;
pub mod transport_pair;

// Re-export primary types for ergonomic imports.
pub use engine::{Collaborators, Engine, NetworkPathChange};
pub use error::{EngineError, Result};
pub use event::EngineEvent;
pub use options::{ConnectOptions, EngineOptions};
pub use protocol::{DataPacketKind, SignalResponse, SignalTarget};
pub use reason::DisconnectReason;
pub use reconnect::ReconnectReason;
pub use room::{LocalTrack, Room};
pub use signal::{JoinResult, SignalClient};
pub use state::{ConnectionState, ReconnectMode};
pub use transport::{DataChannel, PeerTransport, RtcEvent, TransportFactory};
