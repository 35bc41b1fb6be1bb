//! Engine and connect configuration.
//!
//! [`EngineOptions`] is supplied once to [`Engine::start`](crate::Engine::start);
//! [`ConnectOptions`] may be overridden per [`connect`](crate::Engine::connect)
//! call. Both serialize with `serde` (durations as milliseconds) so hosts can
//! load them from their own configuration files.
//!
//! # Example
//!
//! ```
//! use conference_engine::options::{ConnectOptions, EngineOptions};
//! use std::time::Duration;
//!
//! let options = EngineOptions::new().with_connect_options(
//!     ConnectOptions::default()
//!         .with_reconnect_attempts(5)
//!         .with_reconnect_attempt_delay(Duration::from_millis(500)),
//! );
//! assert_eq!(options.connect.reconnect_attempts, 5);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::IceServer;
use crate::transport::IceTransportPolicy;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_ATTEMPT_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_TRANSPORT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── ConnectOptions ──────────────────────────────────────────────────

/// Options governing one session: subscription policy, retry policy and
/// transport timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Subscribe to every remote track automatically.
    pub auto_subscribe: bool,
    /// Ask the server to adapt stream quality to rendered size.
    pub adaptive_stream: bool,
    /// Maximum attempts per reconnection campaign. Values below 1 are
    /// clamped to 1.
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnection attempts.
    #[serde(with = "duration_ms")]
    pub reconnect_attempt_delay: Duration,
    /// How long to wait for the primary leg to connect.
    #[serde(with = "duration_ms")]
    pub primary_transport_connect_timeout: Duration,
    /// How long to wait for the publisher leg to connect.
    #[serde(with = "duration_ms")]
    pub publisher_transport_connect_timeout: Duration,
    /// How long `send` waits for the target data channel to open.
    #[serde(with = "duration_ms")]
    pub data_channel_open_timeout: Duration,
    /// Caller-supplied ICE servers. When non-empty they replace the server's
    /// list wholesale.
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
            adaptive_stream: false,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_attempt_delay: DEFAULT_RECONNECT_ATTEMPT_DELAY,
            primary_transport_connect_timeout: DEFAULT_TRANSPORT_CONNECT_TIMEOUT,
            publisher_transport_connect_timeout: DEFAULT_TRANSPORT_CONNECT_TIMEOUT,
            data_channel_open_timeout: DEFAULT_TRANSPORT_CONNECT_TIMEOUT,
            ice_servers: Vec::new(),
            ice_transport_policy: IceTransportPolicy::All,
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn with_auto_subscribe(mut self, auto_subscribe: bool) -> Self {
        self.auto_subscribe = auto_subscribe;
        self
    }

    #[must_use]
    pub fn with_adaptive_stream(mut self, adaptive_stream: bool) -> Self {
        self.adaptive_stream = adaptive_stream;
        self
    }

    /// Set the attempts per reconnection campaign. Values below 1 are clamped
    /// to 1.
    #[must_use]
    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_reconnect_attempt_delay(mut self, delay: Duration) -> Self {
        self.reconnect_attempt_delay = delay;
        self
    }

    /// Set the primary-leg, publisher-leg and data-channel timeouts at once.
    #[must_use]
    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.primary_transport_connect_timeout = timeout;
        self.publisher_transport_connect_timeout = timeout;
        self.data_channel_open_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServer>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    #[must_use]
    pub fn with_ice_transport_policy(mut self, policy: IceTransportPolicy) -> Self {
        self.ice_transport_policy = policy;
        self
    }
}

// ── EngineOptions ───────────────────────────────────────────────────

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Default options used when `connect` is called without overrides.
    pub connect: ConnectOptions,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) rather than blocking the engine. `Disconnected` is always
    /// delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`Engine::shutdown`](crate::Engine::shutdown) waits for the
    /// background loop before aborting it.
    #[serde(with = "duration_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self {
            connect: ConnectOptions::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_options(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
