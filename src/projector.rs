//! Applies inbound signaling events to the room model.
//!
//! Every event is applied under one room mutation, so readers never observe
//! a half-applied batch. Derived notifications are emitted only after that
//! mutation returns. Lookups that miss are skipped per item, and failures of
//! per-item work (a participant disconnect, a codec publish, a mute) are
//! logged without affecting their siblings.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, trace, warn};

use crate::error::{EngineError, Result};
use crate::event::{EngineEvent, EventEmitter};
use crate::protocol::{
    ConnectionQualityInfo, JoinResponse, LeaveRequest, MuteTrackRequest, ParticipantInfo,
    ParticipantStatus, RoomInfo, SignalResponse, SpeakerInfo, StreamStateInfo, SubscribedCodecs,
    SubscriptionPermissionUpdate,
};
use crate::reason::DisconnectReason;
use crate::room::{merge_active_speakers, Participant, Room, RoomState};
use crate::state::ConnectionState;

/// The projector's non-owning view of the session that owns it.
#[async_trait]
pub trait SessionControl: Send + Sync + 'static {
    fn connection_state(&self) -> ConnectionState;

    fn auto_subscribe(&self) -> bool;

    /// Make the next reconnection attempt a full one.
    fn prefer_full_reconnect(&self);

    /// End the session with a server-supplied reason.
    async fn terminate(&self, reason: DisconnectReason);
}

pub struct RoomStateProjector {
    room: Arc<Room>,
    events: EventEmitter,
    session: Weak<dyn SessionControl>,
}

impl std::fmt::Debug for RoomStateProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomStateProjector")
            .field("room", &self.room.sid())
            .field("session_alive", &(self.session.strong_count() > 0))
            .finish()
    }
}

/// Insert or patch a remote participant. Returns `true` if it is new.
fn upsert_remote(state: &mut RoomState, info: &ParticipantInfo, auto_subscribe: bool) -> bool {
    match state.remotes.get(&info.identity) {
        Some(existing) => {
            existing.update_from_info(info, auto_subscribe);
            false
        }
        None => {
            state.remotes.insert(
                info.identity.clone(),
                Arc::new(Participant::from_info(info, auto_subscribe)),
            );
            true
        }
    }
}

impl RoomStateProjector {
    pub fn new(room: Arc<Room>, events: EventEmitter, session: Weak<dyn SessionControl>) -> Self {
        Self {
            room,
            events,
            session,
        }
    }

    fn session(&self) -> Result<Arc<dyn SessionControl>> {
        self.session
            .upgrade()
            .ok_or_else(|| EngineError::state("session is gone"))
    }

    fn is_connected(&self) -> bool {
        self.session()
            .is_ok_and(|s| s.connection_state().is_connected())
    }

    fn auto_subscribe(&self) -> bool {
        self.session().map_or(true, |s| s.auto_subscribe())
    }

    /// Apply one inbound signaling event.
    pub async fn apply(&self, response: SignalResponse) {
        match response {
            SignalResponse::Join(join) => self.apply_join(&join),
            SignalResponse::RoomUpdate { room } => self.on_room_update(&room),
            SignalResponse::SpeakersChanged { speakers } => self.on_speakers_changed(&speakers),
            SignalResponse::ConnectionQuality { updates } => self.on_connection_quality(&updates),
            SignalResponse::Mute(request) => self.on_remote_mute(request).await,
            SignalResponse::SubscriptionPermissionUpdate(update) => {
                self.on_subscription_permission(&update);
            }
            SignalResponse::StreamStateUpdate { stream_states } => {
                self.on_stream_state_update(&stream_states);
            }
            SignalResponse::ParticipantUpdate { participants } => {
                self.on_participant_update(&participants).await;
            }
            SignalResponse::TrackUnpublished { track_sid } => {
                self.on_track_unpublished(&track_sid).await;
            }
            SignalResponse::SubscribedCodecs(update) => self.on_subscribed_codecs(update).await,
            SignalResponse::Leave(leave) => {
                if let Err(e) = self.on_leave(leave).await {
                    warn!("failed to handle leave: {e}");
                }
            }
            SignalResponse::ConnectionStateChanged { .. }
            | SignalResponse::Offer(_)
            | SignalResponse::Answer(_)
            | SignalResponse::Trickle { .. }
            | SignalResponse::TrackPublished(_)
            | SignalResponse::RefreshToken { .. } => {
                trace!("signal response not handled by the room projection");
            }
        }
    }

    /// Seed the room and participants from a join handshake.
    pub fn apply_join(&self, join: &JoinResponse) {
        let auto_subscribe = self.auto_subscribe();
        let local = Arc::clone(self.room.local());
        self.room.mutate(|s| {
            s.info = join.room.clone();
            s.server_info.clone_from(&join.server_info);
            local.update_from_info(&join.participant);
            for info in &join.other_participants {
                upsert_remote(s, info, auto_subscribe);
            }
        });
        debug!(
            room = %join.room.sid,
            participants = join.other_participants.len(),
            "applied join"
        );
    }

    fn on_room_update(&self, room: &RoomInfo) {
        let info = self.room.mutate(|s| {
            s.info.metadata.clone_from(&room.metadata);
            s.info.active_recording = room.active_recording;
            s.info.num_participants = room.num_participants;
            s.info.num_publishers = room.num_publishers;
            s.info.clone()
        });
        self.events.emit(EngineEvent::RoomUpdated { room: info });
    }

    fn on_speakers_changed(&self, updates: &[SpeakerInfo]) {
        let local = Arc::clone(self.room.local());
        let speakers = self.room.mutate(|s| {
            let local_sid = local.sid();
            for update in updates {
                if update.sid == local_sid {
                    local.set_speaking(update.level, update.active);
                } else if let Some(p) = s.remotes.values().find(|p| p.sid() == update.sid) {
                    p.set_speaking(update.level, update.active);
                }
            }

            let remotes = &s.remotes;
            let merged = merge_active_speakers(&s.active_speakers, updates, |sid| {
                if sid == local_sid {
                    return Some(local.identity());
                }
                remotes
                    .values()
                    .find(|p| p.sid() == sid)
                    .map(|p| p.identity())
            });
            s.active_speakers.clone_from(&merged);
            merged
        });

        if self.is_connected() {
            self.events
                .emit(EngineEvent::ActiveSpeakersChanged { speakers });
        }
    }

    fn on_connection_quality(&self, updates: &[ConnectionQualityInfo]) {
        let local = Arc::clone(self.room.local());
        let changed: Vec<_> = self.room.mutate(|s| {
            let local_sid = local.sid();
            updates
                .iter()
                .filter(|u| {
                    if u.participant_sid == local_sid {
                        local.mutate(|d| d.connection_quality = u.quality);
                        return true;
                    }
                    match s.remotes.values().find(|p| p.sid() == u.participant_sid) {
                        Some(p) => {
                            p.mutate(|d| d.connection_quality = u.quality);
                            true
                        }
                        None => false,
                    }
                })
                .cloned()
                .collect()
        });
        for update in changed {
            self.events.emit(EngineEvent::ConnectionQualityChanged {
                sid: update.participant_sid,
                quality: update.quality,
            });
        }
    }

    async fn on_remote_mute(&self, request: MuteTrackRequest) {
        let local = self.room.local();
        let Some(publication) = local.publication(&request.sid) else {
            warn!(track = %request.sid, "mute request for unknown local publication");
            return;
        };
        if let Err(e) = publication.track.set_muted(request.muted).await {
            warn!(track = %request.sid, muted = request.muted, "failed to apply remote mute: {e}");
            return;
        }
        local.set_publication_muted(&request.sid, request.muted);
        let sid = local.sid();
        self.events.emit(if request.muted {
            EngineEvent::TrackMuted {
                sid,
                track_sid: request.sid,
            }
        } else {
            EngineEvent::TrackUnmuted {
                sid,
                track_sid: request.sid,
            }
        });
    }

    fn on_subscription_permission(&self, update: &SubscriptionPermissionUpdate) {
        let applied = self.room.mutate(|s| {
            let Some(participant) = s.remotes.values().find(|p| p.sid() == update.participant_sid)
            else {
                return false;
            };
            participant.mutate(|d| match d.tracks.get_mut(&update.track_sid) {
                Some(track) => {
                    track.subscription_allowed = update.allowed;
                    true
                }
                None => false,
            })
        });
        if applied {
            self.events
                .emit(EngineEvent::TrackSubscriptionPermissionChanged {
                    participant_sid: update.participant_sid.clone(),
                    track_sid: update.track_sid.clone(),
                    allowed: update.allowed,
                });
        }
    }

    fn on_stream_state_update(&self, updates: &[StreamStateInfo]) {
        let applied: Vec<_> = self.room.mutate(|s| {
            updates
                .iter()
                .filter(|u| {
                    let Some(participant) =
                        s.remotes.values().find(|p| p.sid() == u.participant_sid)
                    else {
                        return false;
                    };
                    participant.mutate(|d| match d.tracks.get_mut(&u.track_sid) {
                        Some(track) => {
                            track.stream_state = u.state;
                            true
                        }
                        None => false,
                    })
                })
                .cloned()
                .collect()
        });
        for update in applied {
            self.events.emit(EngineEvent::TrackStreamStateChanged {
                participant_sid: update.participant_sid,
                track_sid: update.track_sid,
                state: update.state,
            });
        }
    }

    async fn on_participant_update(&self, participants: &[ParticipantInfo]) {
        let auto_subscribe = self.auto_subscribe();
        let local = Arc::clone(self.room.local());

        let (connected, disconnected) = self.room.mutate(|s| {
            let local_identity = local.identity();
            let mut connected = Vec::new();
            let mut disconnected = Vec::new();
            for info in participants {
                if info.identity == local_identity {
                    local.update_from_info(info);
                } else if info.state == ParticipantStatus::Disconnected {
                    disconnected.push(info);
                } else if upsert_remote(s, info, auto_subscribe) {
                    connected.push(info.identity.clone());
                }
            }
            (connected, disconnected)
        });

        let results = join_all(
            disconnected
                .iter()
                .map(|info| self.on_participant_disconnected(info)),
        )
        .await;
        for (info, result) in disconnected.iter().zip(results) {
            if let Err(e) = result {
                warn!(identity = %info.identity, "failed to process participant disconnect: {e}");
            }
        }

        if connected.is_empty() {
            return;
        }
        if !self.is_connected() {
            debug!(
                count = connected.len(),
                "session not connected, dropping participant connect notifications"
            );
            return;
        }
        for identity in connected {
            self.events
                .emit(EngineEvent::ParticipantConnected { identity });
        }
    }

    async fn on_participant_disconnected(&self, info: &ParticipantInfo) -> Result<()> {
        let participant = self
            .room
            .mutate(|s| {
                s.active_speakers.retain(|a| a.identity != info.identity);
                s.remotes.remove(&info.identity)
            })
            .ok_or_else(|| EngineError::state(format!("unknown participant {}", info.identity)))?;

        let data = participant.snapshot();
        for track in data.tracks.values().filter(|t| t.subscribed) {
            self.events.emit(EngineEvent::TrackUnsubscribed {
                participant_sid: data.sid.clone(),
                track_sid: track.info.sid.clone(),
            });
        }
        self.events.emit(EngineEvent::ParticipantDisconnected {
            identity: data.identity,
        });
        Ok(())
    }

    async fn on_track_unpublished(&self, track_sid: &str) {
        let Some(publication) = self.room.local().remove_publication(track_sid) else {
            warn!(track = track_sid, "unpublish for unknown local publication");
            return;
        };
        if let Err(e) = publication.track.unpublish().await {
            warn!(track = track_sid, "failed to stop unpublished track: {e}");
        }
        self.events.emit(EngineEvent::LocalTrackUnpublished {
            track_sid: track_sid.to_string(),
        });
    }

    /// Publish every requested codec the track does not carry yet. Each
    /// codec succeeds or fails on its own; nothing is rolled back.
    async fn on_subscribed_codecs(&self, update: SubscribedCodecs) {
        let local = self.room.local();
        let Some(publication) = local.publication(&update.track_sid) else {
            warn!(track = %update.track_sid, "subscribed codecs for unknown local publication");
            return;
        };
        let missing: Vec<_> = update
            .codecs
            .iter()
            .filter(|c| !publication.info.codecs.contains(c))
            .collect();
        if missing.is_empty() {
            return;
        }

        let results = join_all(missing.iter().map(|codec| {
            let track = Arc::clone(&publication.track);
            async move { track.publish_codec(codec).await }
        }))
        .await;

        let mut published = Vec::new();
        for (codec, result) in missing.into_iter().zip(results) {
            match result {
                Ok(()) => published.push(codec.clone()),
                Err(e) => warn!(track = %update.track_sid, codec, "failed to publish codec: {e}"),
            }
        }
        local.add_codecs(&update.track_sid, &published);
    }

    async fn on_leave(&self, leave: LeaveRequest) -> Result<()> {
        let session = self.session()?;
        if leave.can_reconnect {
            debug!("server asked to leave, next reconnect will be full");
            session.prefer_full_reconnect();
        } else {
            debug!(reason = %leave.reason, "server ended the session");
            session.terminate(leave.reason).await;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::protocol::{ConnectionQuality, StreamState, TrackInfo, TrackKind};
    use crate::room::LocalTrack;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    struct TestSession {
        state: Mutex<ConnectionState>,
        prefer_full: Mutex<bool>,
        terminated: Mutex<Option<DisconnectReason>>,
    }

    impl TestSession {
        fn new(state: ConnectionState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                prefer_full: Mutex::new(false),
                terminated: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl SessionControl for TestSession {
        fn connection_state(&self) -> ConnectionState {
            *self.state.lock()
        }
        fn auto_subscribe(&self) -> bool {
            true
        }
        fn prefer_full_reconnect(&self) {
            *self.prefer_full.lock() = true;
        }
        async fn terminate(&self, reason: DisconnectReason) {
            *self.terminated.lock() = Some(reason);
        }
    }

    struct TestTrack {
        fail_codecs: Vec<&'static str>,
        published: Mutex<Vec<String>>,
        muted: Mutex<Option<bool>>,
    }

    impl TestTrack {
        fn new(fail_codecs: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                fail_codecs,
                published: Mutex::new(Vec::new()),
                muted: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LocalTrack for TestTrack {
        async fn set_muted(&self, muted: bool) -> Result<()> {
            *self.muted.lock() = Some(muted);
            Ok(())
        }
        async fn unpublish(&self) -> Result<()> {
            Ok(())
        }
        async fn publish_codec(&self, codec: &str) -> Result<()> {
            if self.fail_codecs.contains(&codec) {
                return Err(EngineError::network("codec rejected"));
            }
            self.published.lock().push(codec.to_string());
            Ok(())
        }
    }

    struct Fixture {
        projector: RoomStateProjector,
        room: Arc<Room>,
        session: Arc<TestSession>,
        events: mpsc::Receiver<EngineEvent>,
    }

    fn fixture(state: ConnectionState) -> Fixture {
        let room = Arc::new(Room::new());
        let (tx, events) = mpsc::channel(64);
        let session = TestSession::new(state);
        let weak: Weak<dyn SessionControl> = {
            let strong: Arc<dyn SessionControl> = session.clone();
            Arc::downgrade(&strong)
        };
        Fixture {
            projector: RoomStateProjector::new(Arc::clone(&room), EventEmitter::new(tx), weak),
            room,
            session,
            events,
        }
    }

    fn track(sid: &str) -> TrackInfo {
        TrackInfo {
            sid: sid.into(),
            name: sid.into(),
            kind: TrackKind::Video,
            muted: false,
            mime_type: "video/vp8".into(),
            codecs: vec!["vp8".into()],
        }
    }

    fn remote(sid: &str, identity: &str, state: ParticipantStatus) -> ParticipantInfo {
        ParticipantInfo {
            sid: sid.into(),
            identity: identity.into(),
            state,
            tracks: vec![track(&format!("TR_{sid}"))],
            ..Default::default()
        }
    }

    fn join() -> JoinResponse {
        JoinResponse {
            room: RoomInfo {
                sid: "RM_1".into(),
                name: "standup".into(),
                ..Default::default()
            },
            participant: remote("PL", "me", ParticipantStatus::Active),
            other_participants: vec![remote("PA", "alice", ParticipantStatus::Active)],
            server_info: None,
            ice_servers: Vec::new(),
            subscriber_primary: true,
            client_configuration: None,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn join_seeds_room_and_participants() {
        let f = fixture(ConnectionState::Connecting);
        f.projector.apply(SignalResponse::Join(Box::new(join()))).await;

        assert_eq!(f.room.sid(), "RM_1");
        assert_eq!(f.room.local().identity(), "me");
        assert!(f.room.remote("alice").is_some());
    }

    #[tokio::test]
    async fn participant_batch_partitions_and_notifies_after_commit() {
        let mut f = fixture(ConnectionState::Connected);
        f.projector.apply_join(&join());

        f.projector
            .apply(SignalResponse::ParticipantUpdate {
                participants: vec![
                    ParticipantInfo {
                        name: "Me Renamed".into(),
                        ..remote("PL", "me", ParticipantStatus::Active)
                    },
                    remote("PA", "alice", ParticipantStatus::Disconnected),
                    remote("PB", "bob", ParticipantStatus::Joined),
                    // Unknown participant leaving: logged, siblings unaffected.
                    remote("PZ", "zed", ParticipantStatus::Disconnected),
                ],
            })
            .await;

        assert_eq!(f.room.local().snapshot().name, "Me Renamed");
        assert!(f.room.remote("alice").is_none());
        assert!(f.room.remote("bob").is_some());

        let events = drain(&mut f.events);
        assert!(events.contains(&EngineEvent::ParticipantDisconnected {
            identity: "alice".into()
        }));
        assert!(events.contains(&EngineEvent::TrackUnsubscribed {
            participant_sid: "PA".into(),
            track_sid: "TR_PA".into()
        }));
        assert_eq!(
            events.last(),
            Some(&EngineEvent::ParticipantConnected {
                identity: "bob".into()
            })
        );
    }

    #[tokio::test]
    async fn connect_notifications_dropped_while_not_connected() {
        let mut f = fixture(ConnectionState::Reconnecting(crate::state::ReconnectMode::Quick));
        f.projector
            .apply(SignalResponse::ParticipantUpdate {
                participants: vec![remote("PB", "bob", ParticipantStatus::Active)],
            })
            .await;
        assert!(f.room.remote("bob").is_some());
        assert!(drain(&mut f.events).is_empty());
    }

    #[tokio::test]
    async fn speaker_updates_sort_and_gate_on_connected() {
        let mut f = fixture(ConnectionState::Connected);
        f.projector.apply_join(&join());
        f.projector
            .apply(SignalResponse::SpeakersChanged {
                speakers: vec![
                    SpeakerInfo {
                        sid: "PA".into(),
                        level: 0.3,
                        active: true,
                    },
                    SpeakerInfo {
                        sid: "PL".into(),
                        level: 0.8,
                        active: true,
                    },
                ],
            })
            .await;
        let speakers = f.room.active_speakers();
        assert_eq!(speakers[0].identity, "me");
        assert_eq!(speakers[1].identity, "alice");
        assert!(f.room.remote("alice").unwrap().snapshot().is_speaking);
        assert!(matches!(
            drain(&mut f.events).as_slice(),
            [EngineEvent::ActiveSpeakersChanged { .. }]
        ));

        *f.session.state.lock() = ConnectionState::Connecting;
        f.projector
            .apply(SignalResponse::SpeakersChanged {
                speakers: vec![SpeakerInfo {
                    sid: "PL".into(),
                    level: 0.0,
                    active: false,
                }],
            })
            .await;
        assert_eq!(f.room.active_speakers().len(), 1);
        assert!(drain(&mut f.events).is_empty());
    }

    #[tokio::test]
    async fn quality_stream_state_and_permission_skip_unknowns() {
        let mut f = fixture(ConnectionState::Connected);
        f.projector.apply_join(&join());

        f.projector
            .apply(SignalResponse::ConnectionQuality {
                updates: vec![
                    ConnectionQualityInfo {
                        participant_sid: "PA".into(),
                        quality: ConnectionQuality::Poor,
                        score: 1.0,
                    },
                    ConnectionQualityInfo {
                        participant_sid: "PX".into(),
                        quality: ConnectionQuality::Lost,
                        score: 0.0,
                    },
                ],
            })
            .await;
        f.projector
            .apply(SignalResponse::StreamStateUpdate {
                stream_states: vec![
                    StreamStateInfo {
                        participant_sid: "PA".into(),
                        track_sid: "TR_PA".into(),
                        state: StreamState::Paused,
                    },
                    StreamStateInfo {
                        participant_sid: "PA".into(),
                        track_sid: "missing".into(),
                        state: StreamState::Paused,
                    },
                ],
            })
            .await;
        f.projector
            .apply(SignalResponse::SubscriptionPermissionUpdate(
                SubscriptionPermissionUpdate {
                    participant_sid: "PA".into(),
                    track_sid: "TR_PA".into(),
                    allowed: false,
                },
            ))
            .await;

        let alice = f.room.remote("alice").unwrap().snapshot();
        assert_eq!(alice.connection_quality, ConnectionQuality::Poor);
        assert_eq!(alice.tracks["TR_PA"].stream_state, StreamState::Paused);
        assert!(!alice.tracks["TR_PA"].subscription_allowed);
        assert_eq!(drain(&mut f.events).len(), 3);
    }

    #[tokio::test]
    async fn remote_mute_and_unpublish_touch_local_publications() {
        let mut f = fixture(ConnectionState::Connected);
        f.projector.apply_join(&join());
        let track_impl = TestTrack::new(Vec::new());
        f.room.local().add_publication(track("TL_1"), track_impl.clone());

        f.projector
            .apply(SignalResponse::Mute(MuteTrackRequest {
                sid: "TL_1".into(),
                muted: true,
            }))
            .await;
        assert_eq!(*track_impl.muted.lock(), Some(true));
        assert!(f.room.local().publication("TL_1").unwrap().info.muted);

        // Unknown publication: logged only.
        f.projector
            .apply(SignalResponse::TrackUnpublished {
                track_sid: "nope".into(),
            })
            .await;
        f.projector
            .apply(SignalResponse::TrackUnpublished {
                track_sid: "TL_1".into(),
            })
            .await;
        assert!(f.room.local().publication("TL_1").is_none());

        let events = drain(&mut f.events);
        assert_eq!(
            events,
            vec![
                EngineEvent::TrackMuted {
                    sid: "PL".into(),
                    track_sid: "TL_1".into()
                },
                EngineEvent::LocalTrackUnpublished {
                    track_sid: "TL_1".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn codec_failures_are_isolated() {
        let f = fixture(ConnectionState::Connected);
        let track_impl = TestTrack::new(vec!["av1"]);
        f.room.local().add_publication(track("TL_1"), track_impl.clone());

        f.projector
            .apply(SignalResponse::SubscribedCodecs(SubscribedCodecs {
                track_sid: "TL_1".into(),
                codecs: vec!["vp8".into(), "av1".into(), "h264".into()],
            }))
            .await;

        assert_eq!(track_impl.published.lock().as_slice(), ["h264".to_string()]);
        let codecs = f.room.local().publication("TL_1").unwrap().info.codecs;
        assert_eq!(codecs, vec!["vp8".to_string(), "h264".to_string()]);
    }

    #[tokio::test]
    async fn leave_prefers_full_or_terminates() {
        let f = fixture(ConnectionState::Connected);
        f.projector
            .apply(SignalResponse::Leave(LeaveRequest {
                can_reconnect: true,
                reason: DisconnectReason::Migration,
            }))
            .await;
        assert!(*f.session.prefer_full.lock());
        assert!(f.session.terminated.lock().is_none());

        f.projector
            .apply(SignalResponse::Leave(LeaveRequest {
                can_reconnect: false,
                reason: DisconnectReason::RoomDeleted,
            }))
            .await;
        assert_eq!(*f.session.terminated.lock(), Some(DisconnectReason::RoomDeleted));
    }

    #[tokio::test]
    async fn absent_session_is_an_error_not_a_crash() {
        let f = fixture(ConnectionState::Connected);
        let projector = f.projector;
        drop(f.session);
        let err = projector
            .on_leave(LeaveRequest {
                can_reconnect: false,
                reason: DisconnectReason::ServerShutdown,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
    }
}
