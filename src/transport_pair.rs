//! Publisher/subscriber leg orchestration.
//!
//! [`TransportPair`] owns both legs of a session, the two "connected"
//! completers the engine waits on, and the [`DataChannelPair`]. It knows
//! nothing about the connection state machine: the engine feeds it leg
//! state changes and decides whether a loss warrants a reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::completer::AsyncCompleter;
use crate::data_channel::DataChannelPair;
use crate::error::{EngineError, Result};
use crate::options::ConnectOptions;
use crate::protocol::{ClientConfiguration, IceServer, JoinResponse, ReconnectResponse, SignalTarget};
use crate::transport::{
    DataChannel, DataChannelInit, IceTransportPolicy, PeerConnectionState, PeerTransport, RtcConfiguration,
    RtcEmitter, TransportFactory, LOSSY_DC_LABEL, RELIABLE_DC_LABEL,
};

/// Build the configuration shared by both legs.
///
/// A non-empty caller ICE list replaces the server's list wholesale. A
/// server forcing relay overrides the caller's transport policy.
pub fn make_rtc_config(
    server_ice_servers: &[IceServer],
    client_configuration: Option<&ClientConfiguration>,
    options: &ConnectOptions,
) -> RtcConfiguration {
    let ice_servers = if options.ice_servers.is_empty() {
        server_ice_servers.to_vec()
    } else {
        options.ice_servers.clone()
    };
    let ice_transport_policy = if client_configuration.is_some_and(|c| c.force_relay) {
        IceTransportPolicy::Relay
    } else {
        options.ice_transport_policy
    };
    RtcConfiguration {
        ice_servers,
        ice_transport_policy,
    }
}

struct Legs {
    publisher: Arc<dyn PeerTransport>,
    subscriber: Arc<dyn PeerTransport>,
}

/// What a leg state change means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegTransition {
    pub is_primary: bool,
    pub is_publisher: bool,
    pub lost: bool,
}

pub struct TransportPair {
    legs: Mutex<Option<Legs>>,
    /// Set before the legs are created so their first events already see it.
    subscriber_primary: AtomicBool,
    pub primary_connected: AsyncCompleter<()>,
    pub publisher_connected: AsyncCompleter<()>,
    pub data_channels: DataChannelPair,
}

impl Default for TransportPair {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransportPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPair")
            .field("configured", &self.is_configured())
            .field("subscriber_primary", &self.subscriber_primary())
            .field("primary_connected", &self.primary_connected.is_resolved())
            .field("publisher_connected", &self.publisher_connected.is_resolved())
            .field("data_channels", &self.data_channels)
            .finish()
    }
}

impl TransportPair {
    pub fn new() -> Self {
        Self {
            legs: Mutex::new(None),
            subscriber_primary: AtomicBool::new(false),
            primary_connected: AsyncCompleter::new("primary_connected"),
            publisher_connected: AsyncCompleter::new("publisher_connected"),
            data_channels: DataChannelPair::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.legs.lock().is_some()
    }

    pub fn subscriber_primary(&self) -> bool {
        self.subscriber_primary.load(Ordering::Acquire)
    }

    pub fn leg(&self, target: SignalTarget) -> Option<Arc<dyn PeerTransport>> {
        self.legs.lock().as_ref().map(|legs| match target {
            SignalTarget::Publisher => Arc::clone(&legs.publisher),
            SignalTarget::Subscriber => Arc::clone(&legs.subscriber),
        })
    }

    /// Create both legs and the publisher's data channels from a join.
    ///
    /// Returns `Ok(false)` without touching anything if the legs already
    /// exist. The caller triggers publisher negotiation when the publisher
    /// is primary.
    ///
    /// # Errors
    ///
    /// Returns an error if a leg or data channel cannot be created. Whatever
    /// was created before the failure is closed before returning, and the
    /// pair stays unconfigured.
    pub async fn configure(
        &self,
        join: &JoinResponse,
        options: &ConnectOptions,
        factory: &dyn TransportFactory,
        events: &RtcEmitter,
    ) -> Result<bool> {
        if self.is_configured() {
            debug!("transports already configured");
            return Ok(false);
        }

        let config = make_rtc_config(
            &join.ice_servers,
            join.client_configuration.as_ref(),
            options,
        );
        let subscriber_primary = join.subscriber_primary;
        self.subscriber_primary
            .store(subscriber_primary, Ordering::Release);

        let publisher = factory.create(
            &config,
            SignalTarget::Publisher,
            !subscriber_primary,
            events.clone(),
        )?;
        let subscriber = match factory.create(
            &config,
            SignalTarget::Subscriber,
            subscriber_primary,
            events.clone(),
        ) {
            Ok(subscriber) => subscriber,
            Err(e) => {
                warn!("failed to create subscriber leg: {e}");
                publisher.close().await;
                return Err(e);
            }
        };

        let (reliable, lossy) = match create_publisher_channels(publisher.as_ref()) {
            Ok(channels) => channels,
            Err(e) => {
                warn!("failed to create publisher data channels: {e}");
                publisher.close().await;
                subscriber.close().await;
                return Err(e);
            }
        };
        self.data_channels.set_publisher_channels(reliable, lossy);

        *self.legs.lock() = Some(Legs {
            publisher,
            subscriber,
        });
        info!(
            subscriber_primary,
            ice_servers = config.ice_servers.len(),
            policy = ?config.ice_transport_policy,
            "transports configured"
        );
        Ok(true)
    }

    /// Apply the configuration returned by a resumed session to both legs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::State`] if no legs exist, or the leg's error.
    pub fn refresh_configuration(
        &self,
        response: &ReconnectResponse,
        options: &ConnectOptions,
    ) -> Result<()> {
        let (publisher, subscriber) = {
            let legs = self.legs.lock();
            let legs = legs
                .as_ref()
                .ok_or_else(|| EngineError::state("transports are not configured"))?;
            (Arc::clone(&legs.publisher), Arc::clone(&legs.subscriber))
        };
        let config = make_rtc_config(
            &response.ice_servers,
            response.client_configuration.as_ref(),
            options,
        );
        publisher.set_configuration(&config)?;
        subscriber.set_configuration(&config)?;
        debug!("transport configuration refreshed");
        Ok(())
    }

    /// Resolve or reset the completers for a leg state change.
    pub fn on_connection_state_changed(
        &self,
        target: SignalTarget,
        state: PeerConnectionState,
    ) -> LegTransition {
        let subscriber_primary = self.subscriber_primary();
        let is_primary = match target {
            SignalTarget::Publisher => !subscriber_primary,
            SignalTarget::Subscriber => subscriber_primary,
        };
        let is_publisher = target == SignalTarget::Publisher;

        match state {
            PeerConnectionState::Connected => {
                if is_primary {
                    self.primary_connected.resume(());
                }
                if is_publisher {
                    self.publisher_connected.resume(());
                }
            }
            s if s.is_lost() => {
                if is_primary {
                    self.primary_connected.reset();
                }
                if is_publisher {
                    self.publisher_connected.reset();
                }
            }
            _ => {}
        }

        LegTransition {
            is_primary,
            is_publisher,
            lost: state.is_lost(),
        }
    }

    /// Fail every pending wait on the connected completers.
    pub fn reset_completers(&self) {
        self.primary_connected.reset();
        self.publisher_connected.reset();
    }

    /// Close both legs and every data channel.
    pub async fn close(&self) {
        self.data_channels.close_all();
        self.reset_completers();
        let legs = self.legs.lock().take();
        if let Some(legs) = legs {
            legs.publisher.close().await;
            legs.subscriber.close().await;
            debug!("transports closed");
        }
    }
}

/// Both publisher channels, or neither.
fn create_publisher_channels(
    publisher: &dyn PeerTransport,
) -> Result<(Arc<dyn DataChannel>, Arc<dyn DataChannel>)> {
    let reliable = publisher.create_data_channel(RELIABLE_DC_LABEL, DataChannelInit::reliable())?;
    match publisher.create_data_channel(LOSSY_DC_LABEL, DataChannelInit::lossy()) {
        Ok(lossy) => Ok((reliable, lossy)),
        Err(e) => {
            reliable.close();
            Err(e)
        }
    }
}
