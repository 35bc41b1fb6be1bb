#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for conference engine integration tests.
//!
//! Provides scripted mock collaborators ([`MockSignalClient`],
//! [`MockTransportFactory`], [`MockPeerTransport`], [`MockDataChannel`],
//! [`MockLocalTrack`]) and a [`Harness`] that wires them into an engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use conference_engine::options::ConnectOptions;
use conference_engine::protocol::{
    IceCandidate, JoinResponse, ParticipantInfo, ParticipantStatus, ReconnectResponse, RoomInfo,
    SessionDescription, SignalTarget, SyncState, TrackInfo, TrackKind,
};
use conference_engine::room::LocalTrack;
use conference_engine::state::ReconnectMode;
use conference_engine::transport::{
    DataChannel, DataChannelInit, DataChannelState, PeerConnectionState, PeerTransport,
    RtcConfiguration, RtcEmitter, RtcEvent, TransportFactory,
};
use conference_engine::{
    Collaborators, Engine, EngineError, EngineEvent, EngineOptions, JoinResult, NetworkPathChange,
    SignalClient, SignalResponse,
};
use tokio::sync::mpsc;

// ── Fixtures ────────────────────────────────────────────────────────

pub fn join_response(subscriber_primary: bool) -> JoinResponse {
    JoinResponse {
        room: RoomInfo {
            sid: "RM_test".into(),
            name: "standup".into(),
            ..Default::default()
        },
        participant: ParticipantInfo {
            sid: "PA_local".into(),
            identity: "me".into(),
            state: ParticipantStatus::Active,
            ..Default::default()
        },
        other_participants: vec![ParticipantInfo {
            sid: "PA_alice".into(),
            identity: "alice".into(),
            state: ParticipantStatus::Active,
            tracks: vec![track_info("TR_alice_cam")],
            ..Default::default()
        }],
        server_info: None,
        ice_servers: Vec::new(),
        subscriber_primary,
        client_configuration: None,
    }
}

pub fn track_info(sid: &str) -> TrackInfo {
    TrackInfo {
        sid: sid.into(),
        name: sid.into(),
        kind: TrackKind::Video,
        muted: false,
        mime_type: "video/vp8".into(),
        codecs: vec!["vp8".into()],
    }
}

// ── MockSignalClient ────────────────────────────────────────────────

/// Everything the engine asked the signaling collaborator to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalCall {
    Connect { mode: Option<ReconnectMode> },
    ResumeResponseQueue,
    SendQueuedRequests,
    SyncState(SyncState),
    Candidate(SignalTarget),
    Offer,
    Answer,
    Leave,
    Close,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Counts a connect call that never returns until it is dropped.
struct ParkedCall(Arc<AtomicUsize>);

impl ParkedCall {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ParkedCall {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted signaling collaborator.
///
/// Fresh and full connects return [`MockSignalClient::join`]; quick connects
/// return an empty [`ReconnectResponse`]. Reconnects fail while
/// `fail_reconnects` is set.
pub struct MockSignalClient {
    pub join: StdMutex<JoinResponse>,
    pub calls: StdMutex<Vec<SignalCall>>,
    pub fail_connect: AtomicBool,
    pub fail_reconnects: AtomicBool,
    /// Makes a fresh connect hang until cancelled.
    pub hang_connect: AtomicBool,
    /// Makes reconnects hang until the call is dropped.
    pub hang_reconnects: AtomicBool,
    /// Hanging reconnect calls that have not been dropped yet.
    pub parked: Arc<AtomicUsize>,
    /// Runs after a successful quick connect, before it returns.
    pub on_quick_connect: StdMutex<Option<Hook>>,
}

impl MockSignalClient {
    pub fn new(join: JoinResponse) -> Arc<Self> {
        Arc::new(Self {
            join: StdMutex::new(join),
            calls: StdMutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            fail_reconnects: AtomicBool::new(false),
            hang_connect: AtomicBool::new(false),
            hang_reconnects: AtomicBool::new(false),
            parked: Arc::new(AtomicUsize::new(0)),
            on_quick_connect: StdMutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<SignalCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Modes of every connect call that was part of a reconnection.
    pub fn reconnect_modes(&self) -> Vec<ReconnectMode> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SignalCall::Connect { mode } => mode,
                _ => None,
            })
            .collect()
    }

    pub fn parked_calls(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }

    pub fn sync_states(&self) -> Vec<SyncState> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SignalCall::SyncState(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SignalCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SignalClient for MockSignalClient {
    async fn connect(
        &self,
        _url: &str,
        _token: &str,
        _options: &ConnectOptions,
        reconnect_mode: Option<ReconnectMode>,
        _adaptive_stream: bool,
    ) -> Result<JoinResult, EngineError> {
        self.record(SignalCall::Connect {
            mode: reconnect_mode,
        });
        match reconnect_mode {
            None => {
                if self.hang_connect.load(Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                if self.fail_connect.load(Ordering::SeqCst) {
                    return Err(EngineError::network("server unreachable"));
                }
                Ok(JoinResult::Joined(Box::new(self.join.lock().unwrap().clone())))
            }
            Some(_) if self.hang_reconnects.load(Ordering::SeqCst) => {
                let _parked = ParkedCall::new(&self.parked);
                std::future::pending().await
            }
            Some(_) if self.fail_reconnects.load(Ordering::SeqCst) => {
                Err(EngineError::network("server unreachable"))
            }
            Some(ReconnectMode::Quick) => {
                if let Some(hook) = self.on_quick_connect.lock().unwrap().as_ref() {
                    hook();
                }
                Ok(JoinResult::Resumed(ReconnectResponse::default()))
            }
            Some(ReconnectMode::Full) => {
                Ok(JoinResult::Joined(Box::new(self.join.lock().unwrap().clone())))
            }
        }
    }

    async fn resume_response_queue(&self) -> Result<(), EngineError> {
        self.record(SignalCall::ResumeResponseQueue);
        Ok(())
    }

    async fn send_queued_requests(&self) -> Result<(), EngineError> {
        self.record(SignalCall::SendQueuedRequests);
        Ok(())
    }

    async fn send_sync_state(&self, sync: SyncState) -> Result<(), EngineError> {
        self.record(SignalCall::SyncState(sync));
        Ok(())
    }

    async fn send_candidate(
        &self,
        _candidate: IceCandidate,
        target: SignalTarget,
    ) -> Result<(), EngineError> {
        self.record(SignalCall::Candidate(target));
        Ok(())
    }

    async fn send_offer(&self, _offer: SessionDescription) -> Result<(), EngineError> {
        self.record(SignalCall::Offer);
        Ok(())
    }

    async fn send_answer(&self, _answer: SessionDescription) -> Result<(), EngineError> {
        self.record(SignalCall::Answer);
        Ok(())
    }

    async fn send_leave(&self) -> Result<(), EngineError> {
        self.record(SignalCall::Leave);
        Ok(())
    }

    async fn close(&self) {
        self.record(SignalCall::Close);
    }
}

// ── MockDataChannel ─────────────────────────────────────────────────

pub struct MockDataChannel {
    label: String,
    id: u16,
    target: SignalTarget,
    open: AtomicBool,
    events: RtcEmitter,
    pub sent: StdMutex<Vec<Vec<u8>>>,
    pub closed: AtomicBool,
}

impl MockDataChannel {
    /// Open or close the channel and report it like a real stack would.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
        let state = if open {
            DataChannelState::Open
        } else {
            DataChannelState::Closed
        };
        let _ = self.events.send(RtcEvent::DataChannelStateChanged {
            target: self.target,
            label: self.label.clone(),
            state,
        });
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn id(&self) -> u16 {
        self.id
    }

    fn state(&self) -> DataChannelState {
        if self.open.load(Ordering::SeqCst) {
            DataChannelState::Open
        } else {
            DataChannelState::Connecting
        }
    }

    async fn send(&self, payload: &[u8]) -> Result<(), EngineError> {
        self.sent.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ── MockPeerTransport ───────────────────────────────────────────────

pub struct MockPeerTransport {
    pub target: SignalTarget,
    pub primary: bool,
    pub config: StdMutex<RtcConfiguration>,
    events: RtcEmitter,
    state: StdMutex<PeerConnectionState>,
    /// Connect again when an ICE-restart offer is created.
    reconnect_on_restart: bool,
    pub negotiations: AtomicUsize,
    pub offers: StdMutex<Vec<bool>>,
    pub restarting_ice: AtomicBool,
    pub closed: AtomicBool,
    pub channels: StdMutex<Vec<Arc<MockDataChannel>>>,
}

impl MockPeerTransport {
    /// Change the connection state and report it.
    pub fn emit_state(&self, state: PeerConnectionState) {
        *self.state.lock().unwrap() = state;
        let _ = self.events.send(RtcEvent::ConnectionStateChanged {
            target: self.target,
            state,
        });
    }

    pub fn emit(&self, event: RtcEvent) {
        let _ = self.events.send(event);
    }

    pub fn open_channels(&self) {
        for channel in self.channels.lock().unwrap().iter() {
            channel.set_open(true);
        }
    }

    pub fn channel(&self, label: &str) -> Arc<MockDataChannel> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.label == label)
            .cloned()
            .unwrap()
    }

    pub fn negotiations(&self) -> usize {
        self.negotiations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MockPeerTransport {
    fn target(&self) -> SignalTarget {
        self.target
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock().unwrap()
    }

    fn create_data_channel(
        &self,
        label: &str,
        _init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>, EngineError> {
        let mut channels = self.channels.lock().unwrap();
        let channel = Arc::new(MockDataChannel {
            label: label.to_string(),
            id: channels.len() as u16,
            target: self.target,
            open: AtomicBool::new(false),
            events: self.events.clone(),
            sent: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        channels.push(Arc::clone(&channel));
        Ok(channel)
    }

    fn negotiate(&self) {
        self.negotiations.fetch_add(1, Ordering::SeqCst);
    }

    async fn create_and_send_offer(&self, ice_restart: bool) -> Result<(), EngineError> {
        self.offers.lock().unwrap().push(ice_restart);
        self.emit(RtcEvent::Offer {
            target: self.target,
            offer: SessionDescription::offer("v=0 publisher"),
        });
        if ice_restart && self.reconnect_on_restart {
            self.emit_state(PeerConnectionState::Connected);
        }
        Ok(())
    }

    fn set_restarting_ice(&self) {
        self.restarting_ice.store(true, Ordering::SeqCst);
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<Option<SessionDescription>, EngineError> {
        match desc.sdp_type {
            conference_engine::protocol::SdpType::Offer => {
                Ok(Some(SessionDescription::answer("v=0 answer")))
            }
            conference_engine::protocol::SdpType::Answer => Ok(None),
        }
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), EngineError> {
        Ok(())
    }

    fn set_configuration(&self, config: &RtcConfiguration) -> Result<(), EngineError> {
        *self.config.lock().unwrap() = config.clone();
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        match self.target {
            SignalTarget::Subscriber => Some(SessionDescription::answer("v=0 subscriber")),
            SignalTarget::Publisher => Some(SessionDescription::offer("v=0 publisher")),
        }
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        None
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = PeerConnectionState::Closed;
    }
}

// ── MockTransportFactory ────────────────────────────────────────────

/// Creates [`MockPeerTransport`]s and keeps every leg it created.
pub struct MockTransportFactory {
    /// Legs of these targets report `Connected` as soon as they are created.
    pub auto_connect: StdMutex<Vec<SignalTarget>>,
    /// Creating a leg for this target fails.
    pub fail_on: StdMutex<Option<SignalTarget>>,
    /// Runs at the start of every `create`, on the calling thread.
    pub on_create: StdMutex<Option<Hook>>,
    pub legs: StdMutex<Vec<Arc<MockPeerTransport>>>,
}

impl MockTransportFactory {
    pub fn new(auto_connect: &[SignalTarget]) -> Arc<Self> {
        Arc::new(Self {
            auto_connect: StdMutex::new(auto_connect.to_vec()),
            fail_on: StdMutex::new(None),
            on_create: StdMutex::new(None),
            legs: StdMutex::new(Vec::new()),
        })
    }

    /// Most recently created leg for `target`.
    pub fn leg(&self, target: SignalTarget) -> Arc<MockPeerTransport> {
        self.legs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|l| l.target == target)
            .cloned()
            .unwrap()
    }

    pub fn created(&self) -> usize {
        self.legs.lock().unwrap().len()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(
        &self,
        config: &RtcConfiguration,
        target: SignalTarget,
        primary: bool,
        events: RtcEmitter,
    ) -> Result<Arc<dyn PeerTransport>, EngineError> {
        if let Some(hook) = self.on_create.lock().unwrap().as_ref() {
            hook();
        }
        if *self.fail_on.lock().unwrap() == Some(target) {
            return Err(EngineError::network("leg creation failed"));
        }
        let auto = self.auto_connect.lock().unwrap().contains(&target);
        let leg = Arc::new(MockPeerTransport {
            target,
            primary,
            config: StdMutex::new(config.clone()),
            events,
            state: StdMutex::new(PeerConnectionState::New),
            reconnect_on_restart: auto,
            negotiations: AtomicUsize::new(0),
            offers: StdMutex::new(Vec::new()),
            restarting_ice: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            channels: StdMutex::new(Vec::new()),
        });
        if auto {
            leg.emit_state(PeerConnectionState::Connected);
        }
        self.legs.lock().unwrap().push(Arc::clone(&leg));
        Ok(leg)
    }
}

// ── MockLocalTrack ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MockLocalTrack {
    pub muted: StdMutex<Option<bool>>,
    pub unpublished: AtomicBool,
    pub codecs: StdMutex<Vec<String>>,
}

#[async_trait]
impl LocalTrack for MockLocalTrack {
    async fn set_muted(&self, muted: bool) -> Result<(), EngineError> {
        *self.muted.lock().unwrap() = Some(muted);
        Ok(())
    }

    async fn unpublish(&self) -> Result<(), EngineError> {
        self.unpublished.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish_codec(&self, codec: &str) -> Result<(), EngineError> {
        self.codecs.lock().unwrap().push(codec.to_string());
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// Install a test subscriber once. Set `RUST_LOG` to see engine logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// An engine wired to mock collaborators.
pub struct Harness {
    pub engine: Engine,
    pub events: mpsc::Receiver<EngineEvent>,
    pub signal: Arc<MockSignalClient>,
    pub factory: Arc<MockTransportFactory>,
    pub signal_tx: mpsc::UnboundedSender<SignalResponse>,
    pub paths_tx: mpsc::UnboundedSender<NetworkPathChange>,
}

impl Harness {
    pub fn start(
        join: JoinResponse,
        auto_connect: &[SignalTarget],
        connect: ConnectOptions,
    ) -> Self {
        init_tracing();
        let signal = MockSignalClient::new(join);
        let factory = MockTransportFactory::new(auto_connect);
        let (signal_tx, signal_events) = mpsc::unbounded_channel();
        let (paths_tx, paths_rx) = mpsc::unbounded_channel();
        let (engine, events) = Engine::start(
            Collaborators {
                signal: signal.clone(),
                signal_events,
                transports: factory.clone(),
                network_paths: Some(paths_rx),
            },
            EngineOptions::new().with_connect_options(connect),
        );
        Self {
            engine,
            events,
            signal,
            factory,
            signal_tx,
            paths_tx,
        }
    }

    /// Subscriber-primary session whose legs connect on their own.
    pub fn connected_defaults() -> Self {
        Self::start(
            join_response(true),
            &[SignalTarget::Publisher, SignalTarget::Subscriber],
            fast_options(),
        )
    }

    /// Wait for the first event matching `pred`, skipping the others.
    pub async fn wait_for(&mut self, pred: impl Fn(&EngineEvent) -> bool) -> EngineEvent {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => {}
                    None => panic!("event channel closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(30), wait)
            .await
            .expect("timed out waiting for event")
    }

    /// Drain events currently queued.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Short delays and timeouts so failure paths finish quickly.
pub fn fast_options() -> ConnectOptions {
    ConnectOptions::default()
        .with_reconnect_attempt_delay(Duration::from_millis(10))
        .with_transport_timeout(Duration::from_millis(500))
}
