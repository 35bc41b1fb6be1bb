//! Reliable and lossy data channels of a session.
//!
//! Outbound messages always go through the publisher leg's channels. When
//! the subscriber leg is primary the server may also open channels on that
//! leg; those are adopted by label and only used for receiving.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::completer::AsyncCompleter;
use crate::error::{EngineError, Result};
use crate::protocol::{DataChannelInfo, DataPacketKind, SignalTarget};
use crate::transport::{DataChannel, DataChannelState, LOSSY_DC_LABEL, RELIABLE_DC_LABEL};

#[derive(Default)]
struct Channels {
    reliable: Option<Arc<dyn DataChannel>>,
    lossy: Option<Arc<dyn DataChannel>>,
    sub_reliable: Option<Arc<dyn DataChannel>>,
    sub_lossy: Option<Arc<dyn DataChannel>>,
}

impl Channels {
    fn all(&self) -> impl Iterator<Item = &Arc<dyn DataChannel>> {
        [&self.reliable, &self.lossy, &self.sub_reliable, &self.sub_lossy]
            .into_iter()
            .flatten()
    }
}

/// The publisher's reliable/lossy pair plus any adopted subscriber channels.
pub struct DataChannelPair {
    channels: Mutex<Channels>,
    reliable_open: AsyncCompleter<()>,
    lossy_open: AsyncCompleter<()>,
}

impl Default for DataChannelPair {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DataChannelPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.lock();
        f.debug_struct("DataChannelPair")
            .field("reliable", &channels.reliable.is_some())
            .field("lossy", &channels.lossy.is_some())
            .field("reliable_open", &self.reliable_open.is_resolved())
            .field("lossy_open", &self.lossy_open.is_resolved())
            .finish()
    }
}

impl DataChannelPair {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(Channels::default()),
            reliable_open: AsyncCompleter::new("reliable_dc_open"),
            lossy_open: AsyncCompleter::new("lossy_dc_open"),
        }
    }

    /// Install the channels created on the publisher leg.
    pub fn set_publisher_channels(&self, reliable: Arc<dyn DataChannel>, lossy: Arc<dyn DataChannel>) {
        if reliable.state() == DataChannelState::Open {
            self.reliable_open.resume(());
        }
        if lossy.state() == DataChannelState::Open {
            self.lossy_open.resume(());
        }
        let mut channels = self.channels.lock();
        channels.reliable = Some(reliable);
        channels.lossy = Some(lossy);
    }

    /// Adopt a channel opened by the remote side on the subscriber leg.
    ///
    /// Returns `false` for labels this pair does not know.
    pub fn adopt(&self, channel: Arc<dyn DataChannel>) -> bool {
        let label = channel.label();
        let mut channels = self.channels.lock();
        match label.as_str() {
            RELIABLE_DC_LABEL => channels.sub_reliable = Some(channel),
            LOSSY_DC_LABEL => channels.sub_lossy = Some(channel),
            other => {
                warn!(label = other, "ignoring data channel with unknown label");
                return false;
            }
        }
        debug!(label, "adopted subscriber data channel");
        true
    }

    /// Track open/close of the publisher channels.
    pub fn on_state_changed(&self, target: SignalTarget, label: &str, state: DataChannelState) {
        if target != SignalTarget::Publisher {
            return;
        }
        let completer = match label {
            RELIABLE_DC_LABEL => &self.reliable_open,
            LOSSY_DC_LABEL => &self.lossy_open,
            _ => return,
        };
        debug!(label, ?state, "publisher data channel state");
        if state == DataChannelState::Open {
            completer.resume(());
        } else {
            completer.reset();
        }
    }

    fn completer(&self, kind: DataPacketKind) -> &AsyncCompleter<()> {
        match kind {
            DataPacketKind::Reliable => &self.reliable_open,
            DataPacketKind::Lossy => &self.lossy_open,
        }
    }

    /// Wait until the publisher channel for `kind` is open, then send.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Timeout`] if the channel does not open within `timeout`;
    ///   nothing is sent.
    /// - [`EngineError::State`] if no publisher channels exist.
    /// - Any error returned by the channel itself.
    pub async fn send(&self, payload: &[u8], kind: DataPacketKind, timeout: Duration) -> Result<()> {
        self.completer(kind).wait(timeout).await?;
        let channel = {
            let channels = self.channels.lock();
            match kind {
                DataPacketKind::Reliable => channels.reliable.clone(),
                DataPacketKind::Lossy => channels.lossy.clone(),
            }
        };
        let channel = channel.ok_or_else(|| EngineError::state("data channels are not configured"))?;
        channel.send(payload).await
    }

    /// Descriptions of every known channel, for sync-state.
    pub fn info(&self) -> Vec<DataChannelInfo> {
        let channels = self.channels.lock();
        let publisher = [&channels.reliable, &channels.lossy]
            .into_iter()
            .flatten()
            .map(|c| (c, SignalTarget::Publisher));
        let subscriber = [&channels.sub_reliable, &channels.sub_lossy]
            .into_iter()
            .flatten()
            .map(|c| (c, SignalTarget::Subscriber));
        publisher
            .chain(subscriber)
            .map(|(channel, target)| DataChannelInfo {
                label: channel.label(),
                id: channel.id(),
                target,
            })
            .collect()
    }

    pub fn is_configured(&self) -> bool {
        let channels = self.channels.lock();
        channels.reliable.is_some() && channels.lossy.is_some()
    }

    /// Close every channel and fail pending sends.
    pub fn close_all(&self) {
        let old = std::mem::take(&mut *self.channels.lock());
        for channel in old.all() {
            channel.close();
        }
        self.reliable_open.reset();
        self.lossy_open.reset();
    }
}
