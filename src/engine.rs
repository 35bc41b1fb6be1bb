//! The session engine.
//!
//! [`Engine::start`] spawns two background tasks and returns the handle
//! together with an event receiver:
//!
//! - the **event loop** multiplexes inbound signaling, transport events,
//!   network path changes and the shutdown signal with `tokio::select!`;
//! - the **state observer** consumes committed [`EngineState`] transitions,
//!   drains the [`ExecutionGate`], and turns connection state changes into
//!   [`EngineEvent`]s. It runs outside every state mutation, so gated jobs
//!   and notifications may mutate state again.
//!
//! Reconnection campaigns run on their own task; see [`crate::reconnect`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::event::{EngineEvent, EventEmitter};
use crate::gate::ExecutionGate;
use crate::options::{ConnectOptions, EngineOptions};
use crate::projector::{RoomStateProjector, SessionControl};
use crate::protocol::{DataPacketKind, SignalResponse, SignalTarget, TrackInfo};
use crate::reason::DisconnectReason;
use crate::reconnect::ReconnectReason;
use crate::room::{LocalTrack, Room};
use crate::signal::{JoinResult, SignalClient};
use crate::state::{ConnectionState, EngineState, ReconnectMode, StateCell, StateChange, Stopwatch};
use crate::transport::{RtcEmitter, RtcEvent, TransportFactory};
use crate::transport_pair::TransportPair;

/// Reported by the host's connectivity monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPathChange {
    /// Traffic moved to a different interface (for example Wi-Fi to
    /// cellular). Triggers a reconnect while connected.
    Switched,
    /// No usable path.
    Lost,
    /// A usable path is back after [`Lost`](Self::Lost).
    Restored,
}

/// External collaborators handed to [`Engine::start`].
pub struct Collaborators {
    pub signal: Arc<dyn SignalClient>,
    /// Inbound signaling messages, in arrival order.
    pub signal_events: mpsc::UnboundedReceiver<SignalResponse>,
    pub transports: Arc<dyn TransportFactory>,
    /// Optional connectivity monitor.
    pub network_paths: Option<mpsc::UnboundedReceiver<NetworkPathChange>>,
}

// ── Cancellation ────────────────────────────────────────────────────

/// Cooperative cancellation of an in-flight connect.
#[derive(Debug, Default)]
struct Cancellation {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// A checkpoint.
    fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Run `fut` unless cancellation is requested first.
    async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        self.check()?;
        tokio::select! {
            biased;
            () = notified => Err(EngineError::Cancelled),
            result = fut => result,
        }
    }
}

// ── Connect guard ───────────────────────────────────────────────────

/// Finalizes a connect whose future was dropped before it completed.
///
/// `Drop` cannot await, so the clean-up runs on a spawned task. It only
/// touches the session if no newer connect has started since.
struct ConnectGuard {
    inner: Option<Arc<EngineInner>>,
    attempt: u64,
}

impl ConnectGuard {
    fn arm(inner: &Arc<EngineInner>) -> Self {
        let attempt = inner.connect_attempt.fetch_add(1, Ordering::AcqRel) + 1;
        Self {
            inner: Some(Arc::clone(inner)),
            attempt,
        }
    }

    fn disarm(mut self) {
        self.inner = None;
    }
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        if !inner.is_current_connect(self.attempt) {
            return;
        }
        warn!("connect dropped before completion, cleaning up");
        inner.cancel.cancel();
        let attempt = self.attempt;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if inner.is_current_connect(attempt) {
                        inner
                            .clean_up(Some(DisconnectReason::UserCancelled), false)
                            .await;
                    }
                });
            }
            Err(_) => debug!("no runtime, skipping clean-up of dropped connect"),
        }
    }
}

// ── Engine internals ────────────────────────────────────────────────

pub(crate) struct EngineInner {
    state: StateCell<EngineState>,
    pub(crate) signal: Arc<dyn SignalClient>,
    factory: Arc<dyn TransportFactory>,
    pub(crate) transports: TransportPair,
    pub(crate) room: Arc<Room>,
    projector: RoomStateProjector,
    gate: ExecutionGate<EngineState>,
    pub(crate) events: EventEmitter,
    rtc_tx: RtcEmitter,
    cancel: Cancellation,
    /// Bumped by every connect.
    connect_attempt: AtomicU64,
    campaign: Mutex<Option<JoinHandle<()>>>,
}

impl EngineInner {
    pub(crate) fn read_state<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        self.state.read(f)
    }

    /// Every engine state mutation goes through here.
    pub(crate) fn mutate_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        self.state.mutate_checked(f, EngineState::is_consistent)
    }

    pub(crate) async fn cancel_guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.cancel.guard(fut).await
    }

    pub(crate) fn cancel_check(&self) -> Result<()> {
        self.cancel.check()
    }

    pub(crate) fn credentials(&self) -> Result<(String, String, ConnectOptions)> {
        self.read_state(|s| match (&s.url, &s.token) {
            (Some(url), Some(token)) => Ok((url.clone(), token.clone(), s.connect_options.clone())),
            _ => Err(EngineError::state("no url or token")),
        })
    }

    // ── Connect ─────────────────────────────────────────────────────

    /// `attempt` is still the latest connect and has not settled.
    fn is_current_connect(&self, attempt: u64) -> bool {
        self.connect_attempt.load(Ordering::Acquire) == attempt
            && self.read_state(|s| s.connection_state == ConnectionState::Connecting)
    }

    async fn connect(
        self: &Arc<Self>,
        url: &str,
        token: &str,
        options: Option<ConnectOptions>,
    ) -> Result<()> {
        let guard = ConnectGuard::arm(self);
        let result = self.connect_inner(url, token, options).await;
        guard.disarm();
        result
    }

    async fn connect_inner(
        &self,
        url: &str,
        token: &str,
        options: Option<ConnectOptions>,
    ) -> Result<()> {
        self.clean_up(None, false).await;
        self.cancel.reset();
        self.mutate_state(|s| {
            if let Some(options) = options {
                s.connect_options = options;
            }
            s.url = Some(url.to_string());
            s.token = Some(token.to_string());
            s.connection_state = ConnectionState::Connecting;
        });
        info!(url, "connecting");

        match self.full_connect_sequence(url, token, None).await {
            Ok(()) => {
                let connected = self.mutate_state(|s| {
                    if s.connection_state != ConnectionState::Connecting {
                        return false;
                    }
                    s.connection_state = ConnectionState::Connected;
                    true
                });
                if !connected {
                    return Err(EngineError::Cancelled);
                }
                info!(room = %self.room.sid(), "connected");
                Ok(())
            }
            Err(e) => {
                warn!("connect failed: {e}");
                if self.read_state(|s| s.connection_state == ConnectionState::Connecting) {
                    self.clean_up(Some(e.disconnect_reason()), false).await;
                }
                Err(e)
            }
        }
    }

    /// Join handshake, transport configuration, wait for the primary leg.
    ///
    /// Shared by a fresh connect and a full reconnect. Cancellation is
    /// honoured while waiting and at the checkpoints after the signaling
    /// connect and after transport configuration.
    pub(crate) async fn full_connect_sequence(
        &self,
        url: &str,
        token: &str,
        reconnect_mode: Option<ReconnectMode>,
    ) -> Result<()> {
        let options = self.read_state(|s| s.connect_options.clone());
        self.mutate_state(|s| s.timing = Stopwatch::start());

        let result = self
            .cancel
            .guard(self.signal.connect(
                url,
                token,
                &options,
                reconnect_mode,
                options.adaptive_stream,
            ))
            .await?;
        let JoinResult::Joined(join) = result else {
            return Err(EngineError::state("expected a join response"));
        };
        self.mutate_state(|s| s.timing.split("signal"));
        self.cancel.check()?;

        self.projector.apply_join(&join);
        let created = self
            .transports
            .configure(&join, &options, self.factory.as_ref(), &self.rtc_tx)
            .await?;
        if created && !join.subscriber_primary {
            self.publisher_should_negotiate();
        }
        self.mutate_state(|s| s.timing.split("transports"));
        if let Err(e) = self.cancel.check() {
            // The cancelling clean-up may have run before the legs were stored.
            self.transports.close().await;
            return Err(e);
        }

        self.signal.resume_response_queue().await?;
        self.cancel
            .guard(
                self.transports
                    .primary_connected
                    .wait(options.primary_transport_connect_timeout),
            )
            .await?;

        let timing = self.mutate_state(|s| {
            s.timing.split("primary");
            s.timing.clone()
        });
        debug!(total = ?timing.total(), splits = ?timing.splits(), "connect sequence complete");
        Ok(())
    }

    /// Mark the publisher as in use and ask it to negotiate.
    fn publisher_should_negotiate(&self) {
        let first = self.mutate_state(|s| !std::mem::replace(&mut s.has_published, true));
        if first {
            debug!("publisher negotiation requested");
        }
        if let Some(publisher) = self.transports.leg(SignalTarget::Publisher) {
            publisher.negotiate();
        }
    }

    // ── Clean-up ────────────────────────────────────────────────────

    /// Tear down signaling, both legs and room data.
    ///
    /// A full-reconnect clean-up keeps credentials and the campaign's
    /// connection state; otherwise the session is finalized as
    /// `disconnected(reason)`.
    pub(crate) async fn clean_up(&self, reason: Option<DisconnectReason>, is_full_reconnect: bool) {
        debug!(?reason, is_full_reconnect, "cleaning up");
        self.transports.reset_completers();
        self.signal.close().await;
        self.transports.close().await;
        self.room.clean_up(is_full_reconnect);
        if !is_full_reconnect {
            self.gate.clear();
        }
        self.mutate_state(|s| {
            *s = if is_full_reconnect {
                s.retained_for_full_reconnect()
            } else {
                s.finalized(reason)
            };
        });
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        let was_active = self.mutate_state(|s| {
            if s.connection_state.is_disconnected() {
                return false;
            }
            s.connection_state = ConnectionState::Disconnecting;
            true
        });
        if !was_active {
            return;
        }
        if let Err(e) = self.signal.send_leave().await {
            debug!("failed to send leave: {e}");
        }
        self.clean_up(Some(DisconnectReason::ClientInitiated), false)
            .await;
        info!("disconnected");
    }

    // ── Data and tracks ─────────────────────────────────────────────

    async fn send(&self, payload: &[u8], kind: DataPacketKind) -> Result<()> {
        if !self.transports.is_configured() {
            return Err(EngineError::state("transports are not configured"));
        }
        let options = self.read_state(|s| s.connect_options.clone());
        if !self.read_state(|s| s.has_published) {
            self.publisher_should_negotiate();
        }
        self.transports
            .publisher_connected
            .wait(options.publisher_transport_connect_timeout)
            .await?;
        self.transports
            .data_channels
            .send(payload, kind, options.data_channel_open_timeout)
            .await
    }

    fn publish_track(&self, info: TrackInfo, track: Arc<dyn LocalTrack>) -> Result<()> {
        if !self.transports.is_configured() {
            return Err(EngineError::state("transports are not configured"));
        }
        debug!(track = %info.sid, "publishing local track");
        self.room.local().add_publication(info, track);
        self.publisher_should_negotiate();
        Ok(())
    }

    // ── Reconnect hand-off ──────────────────────────────────────────

    /// Start a campaign on its own task unless one is already running.
    fn spawn_reconnect(self: &Arc<Self>, reason: ReconnectReason) {
        let mut campaign = self.campaign.lock();
        if campaign.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(?reason, "campaign already running");
            return;
        }
        let inner = Arc::clone(self);
        *campaign = Some(tokio::spawn(async move {
            if let Err(e) = inner.start_reconnect(reason).await {
                warn!(?reason, "reconnection did not complete: {e}");
            }
        }));
    }

    // ── Inbound events ──────────────────────────────────────────────

    async fn handle_signal(self: &Arc<Self>, response: SignalResponse) {
        match &response {
            SignalResponse::Offer(offer) => {
                let Some(subscriber) = self.transports.leg(SignalTarget::Subscriber) else {
                    warn!("offer received without a subscriber leg");
                    return;
                };
                match subscriber.set_remote_description(offer.clone()).await {
                    Ok(Some(answer)) => {
                        if let Err(e) = self.signal.send_answer(answer).await {
                            warn!("failed to send answer: {e}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("subscriber rejected offer: {e}"),
                }
            }
            SignalResponse::Answer(answer) => {
                if let Some(publisher) = self.transports.leg(SignalTarget::Publisher) {
                    if let Err(e) = publisher.set_remote_description(answer.clone()).await {
                        warn!("publisher rejected answer: {e}");
                    }
                }
            }
            SignalResponse::Trickle { candidate, target } => {
                if let Some(leg) = self.transports.leg(*target) {
                    if let Err(e) = leg.add_ice_candidate(candidate.clone()).await {
                        warn!(?target, "failed to add remote candidate: {e}");
                    }
                }
            }
            SignalResponse::RefreshToken { token } => {
                let token = token.clone();
                self.mutate_state(|s| s.token = Some(token));
                debug!("token refreshed");
            }
            _ => {}
        }
        self.projector.apply(response).await;
    }

    async fn handle_rtc(self: &Arc<Self>, event: RtcEvent) {
        match event {
            RtcEvent::ConnectionStateChanged { target, state } => {
                debug!(?target, ?state, "leg state changed");
                let leg = self.transports.on_connection_state_changed(target, state);
                if !leg.lost {
                    return;
                }
                let (connected, has_published) =
                    self.read_state(|s| (s.connection_state.is_connected(), s.has_published));
                if connected && (leg.is_primary || (leg.is_publisher && has_published)) {
                    warn!(?target, ?state, "leg lost, reconnecting");
                    self.spawn_reconnect(ReconnectReason::Transport);
                }
            }
            RtcEvent::IceCandidate { target, candidate } => {
                if let Err(e) = self.signal.send_candidate(candidate, target).await {
                    warn!(?target, "failed to send candidate: {e}");
                }
            }
            RtcEvent::Offer { target, offer } => {
                if target != SignalTarget::Publisher {
                    return;
                }
                if let Err(e) = self.signal.send_offer(offer).await {
                    warn!("failed to send offer: {e}");
                }
            }
            RtcEvent::TrackAdded { track } => {
                let events = self.events.clone();
                self.gate.enqueue(
                    || self.state.snapshot(),
                    Box::new(|new: &EngineState, _: Option<&EngineState>| {
                        new.connection_state.is_connected()
                    }),
                    Box::new(|new: &EngineState, _: Option<&EngineState>| {
                        new.connection_state.is_disconnected()
                    }),
                    Box::new(move || {
                        events.emit(EngineEvent::TrackSubscribed {
                            participant_sid: track.participant_sid,
                            track_sid: track.track_sid,
                        });
                    }),
                );
            }
            RtcEvent::TrackRemoved { track } => {
                self.events.emit(EngineEvent::TrackUnsubscribed {
                    participant_sid: track.participant_sid,
                    track_sid: track.track_sid,
                });
            }
            RtcEvent::DataChannelOpened { target, channel } => {
                if target == SignalTarget::Subscriber {
                    self.transports.data_channels.adopt(channel);
                }
            }
            RtcEvent::DataChannelStateChanged {
                target,
                label,
                state,
            } => {
                self.transports
                    .data_channels
                    .on_state_changed(target, &label, state);
            }
            RtcEvent::DataReceived { kind, payload } => {
                self.events.emit(EngineEvent::DataReceived { kind, payload });
            }
        }
    }

    fn on_network_path(self: &Arc<Self>, change: NetworkPathChange) {
        debug!(?change, "network path changed");
        if change == NetworkPathChange::Switched
            && self.read_state(|s| s.connection_state.is_connected())
        {
            info!("network switched, reconnecting");
            self.spawn_reconnect(ReconnectReason::NetworkSwitch);
        }
    }
}

#[async_trait]
impl SessionControl for EngineInner {
    fn connection_state(&self) -> ConnectionState {
        self.read_state(|s| s.connection_state)
    }

    fn auto_subscribe(&self) -> bool {
        self.read_state(|s| s.connect_options.auto_subscribe)
    }

    fn prefer_full_reconnect(&self) {
        self.mutate_state(|s| s.next_preferred_reconnect_mode = Some(ReconnectMode::Full));
    }

    async fn terminate(&self, reason: DisconnectReason) {
        self.cancel.cancel();
        self.clean_up(Some(reason), false).await;
    }
}

// ── Public handle ───────────────────────────────────────────────────

/// Handle to a conferencing session engine.
///
/// Created via [`Engine::start`]. Dropping the handle aborts the background
/// tasks; call [`shutdown`](Self::shutdown) for a graceful stop.
pub struct Engine {
    inner: Arc<EngineInner>,
    task: Option<JoinHandle<()>>,
    observer: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl Engine {
    /// Start the engine's background tasks and return a handle plus event
    /// receiver. Must be called from within a Tokio runtime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        collaborators: Collaborators,
        options: EngineOptions,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = options.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let events = EventEmitter::new(event_tx);
        let (rtc_tx, rtc_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (state, changes) = StateCell::observed(EngineState::new(options.connect));

        let Collaborators {
            signal,
            signal_events,
            transports,
            network_paths,
        } = collaborators;

        let room = Arc::new(Room::new());
        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let session: Weak<dyn SessionControl> = weak.clone();
            EngineInner {
                state,
                signal,
                factory: transports,
                transports: TransportPair::new(),
                room: Arc::clone(&room),
                projector: RoomStateProjector::new(room, events.clone(), session),
                gate: ExecutionGate::new(),
                events: events.clone(),
                rtc_tx,
                cancel: Cancellation::default(),
                connect_attempt: AtomicU64::new(0),
                campaign: Mutex::new(None),
            }
        });

        let observer = tokio::spawn(observe_state(Arc::downgrade(&inner), changes, events));
        let task = tokio::spawn(event_loop(
            Arc::clone(&inner),
            signal_events,
            rtc_rx,
            network_paths,
            shutdown_rx,
        ));

        let engine = Self {
            inner,
            task: Some(task),
            observer: Some(observer),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: options.shutdown_timeout,
        };
        (engine, event_rx)
    }

    /// Connect to `url` with `token`, optionally replacing the connect
    /// options given at start.
    ///
    /// Any previous session is cleaned up first. Dropping the returned
    /// future before it completes cancels the attempt: the session is then
    /// cleaned up in the background and ends
    /// `disconnected(user_cancelled)`.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the sequence; the session is then
    /// `disconnected` with the matching reason.
    pub async fn connect(&self, url: &str, token: &str, options: Option<ConnectOptions>) -> Result<()> {
        self.inner.connect(url, token, options).await
    }

    /// Send a data packet over the publisher's data channels.
    ///
    /// Triggers publisher negotiation if nothing was published yet, then
    /// waits for the publisher leg and the channel to open.
    ///
    /// # Errors
    ///
    /// - [`EngineError::State`] if there is no session.
    /// - [`EngineError::Timeout`] if the leg or channel is not ready in
    ///   time. Nothing is sent.
    pub async fn send(&self, payload: &[u8], kind: DataPacketKind) -> Result<()> {
        self.inner.send(payload, kind).await
    }

    /// Run a reconnection campaign now.
    ///
    /// # Errors
    ///
    /// [`EngineError::State`] if the session is not connected;
    /// [`EngineError::Network`] if every attempt failed.
    pub async fn start_reconnect(&self, reason: ReconnectReason) -> Result<()> {
        self.inner.start_reconnect(reason).await
    }

    /// Tear the session down.
    ///
    /// # Errors
    ///
    /// Currently infallible; collaborator failures during clean-up are
    /// logged.
    pub async fn clean_up(&self, reason: Option<DisconnectReason>, is_full_reconnect: bool) -> Result<()> {
        self.inner.clean_up(reason, is_full_reconnect).await;
        Ok(())
    }

    /// Leave the session: cancel an in-flight connect, tell the server, and
    /// clean up with [`DisconnectReason::ClientInitiated`].
    ///
    /// # Errors
    ///
    /// Currently infallible; a failed leave request is logged.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await;
        Ok(())
    }

    /// Register a local track and negotiate it onto the publisher leg.
    ///
    /// # Errors
    ///
    /// [`EngineError::State`] if there is no session.
    pub fn publish_track(&self, info: TrackInfo, track: Arc<dyn LocalTrack>) -> Result<()> {
        self.inner.publish_track(info, track)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.read_state(|s| s.connection_state)
    }

    /// A snapshot of the whole engine state.
    pub fn state(&self) -> EngineState {
        self.inner.state.snapshot()
    }

    pub fn room(&self) -> Arc<Room> {
        Arc::clone(&self.inner.room)
    }

    /// Stop the background tasks.
    ///
    /// Waits up to the configured shutdown timeout for the event loop to
    /// exit, then aborts it. Does not leave the session; call
    /// [`disconnect`](Self::disconnect) first for that.
    pub async fn shutdown(&mut self) {
        debug!("Engine: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("event loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("event loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("event loop aborted: {join_err}");
                    }
                }
            }
        }

        if let Some(campaign) = self.inner.campaign.lock().take() {
            campaign.abort();
        }
        if let Some(observer) = self.observer.take() {
            observer.abort();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connection_state", &self.connection_state())
            .field("transports", &self.inner.transports)
            .field("gate", &self.inner.gate)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // `Drop` cannot await a graceful shutdown; abort the tasks instead.
        for task in [self.task.take(), self.observer.take()].into_iter().flatten() {
            task.abort();
        }
        if let Some(campaign) = self.inner.campaign.lock().take() {
            campaign.abort();
        }
    }
}

// ── Background tasks ────────────────────────────────────────────────

async fn next_path(
    paths: &mut Option<mpsc::UnboundedReceiver<NetworkPathChange>>,
) -> Option<NetworkPathChange> {
    match paths {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Background loop that multiplexes collaborator input via `tokio::select!`.
///
/// Exits on the shutdown signal. Closed input channels are disabled
/// individually.
async fn event_loop(
    inner: Arc<EngineInner>,
    mut signal_rx: mpsc::UnboundedReceiver<SignalResponse>,
    mut rtc_rx: mpsc::UnboundedReceiver<RtcEvent>,
    mut paths: Option<mpsc::UnboundedReceiver<NetworkPathChange>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("event loop started");
    let mut signal_open = true;
    let mut paths_open = paths.is_some();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                break;
            }

            response = signal_rx.recv(), if signal_open => match response {
                Some(response) => inner.handle_signal(response).await,
                None => {
                    debug!("signal event channel closed");
                    signal_open = false;
                }
            },

            event = rtc_rx.recv() => match event {
                Some(event) => inner.handle_rtc(event).await,
                // The sender lives in `inner`, so this only happens on teardown.
                None => break,
            },

            change = next_path(&mut paths), if paths_open => match change {
                Some(change) => inner.on_network_path(change),
                None => {
                    debug!("network path channel closed");
                    paths_open = false;
                }
            },
        }
    }

    debug!("event loop exited");
}

/// Consume committed state transitions outside the mutation's lock.
async fn observe_state(
    inner: Weak<EngineInner>,
    mut changes: mpsc::UnboundedReceiver<StateChange<EngineState>>,
    events: EventEmitter,
) {
    while let Some(StateChange { new, old }) = changes.recv().await {
        if let Some(inner) = inner.upgrade() {
            inner.gate.process(&new, &old);
        }

        let (old, new) = (old.connection_state, new.connection_state);
        if old == new {
            continue;
        }
        debug!(?old, ?new, "connection state changed");
        events.emit(EngineEvent::ConnectionStateChanged { old, new });

        match (old, new) {
            (ConnectionState::Connected, ConnectionState::Reconnecting(mode)) => {
                events.emit(EngineEvent::Reconnecting { mode });
            }
            (ConnectionState::Reconnecting(_), ConnectionState::Connected) => {
                events.emit(EngineEvent::Reconnected);
            }
            (old, ConnectionState::Disconnected { reason }) if !old.is_disconnected() => {
                events
                    .emit_reliable(EngineEvent::Disconnected { reason })
                    .await;
            }
            _ => {}
        }
    }
    debug!("state observer exited");
}
