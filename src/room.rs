//! Room, participant and publication model.
//!
//! The room owns its participant collection. Each participant owns its own
//! [`StateCell`], so participant fields can be patched without holding the
//! room lock and concurrent readers always see whole snapshots. Lock order
//! is room, then participant.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;
use crate::protocol::{
    ConnectionQuality, ParticipantIdentity, ParticipantInfo, ParticipantSid, RoomInfo, ServerInfo,
    SpeakerInfo, StreamState, TrackInfo, TrackPublishedResponse, TrackSid,
};
use crate::state::StateCell;

// ── Local tracks ────────────────────────────────────────────────────

/// A locally captured track, implemented by the media layer.
#[async_trait]
pub trait LocalTrack: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns an error if the media layer cannot change the mute state.
    async fn set_muted(&self, muted: bool) -> Result<()>;

    /// Stop sending the track. Called when the server unpublishes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the track cannot be detached from the publisher.
    async fn unpublish(&self) -> Result<()>;

    /// Publish an additional simulcast codec for this track.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec cannot be published.
    async fn publish_codec(&self, codec: &str) -> Result<()>;
}

/// A published local track.
#[derive(Clone)]
pub struct LocalPublication {
    /// Client-side id the track was published under.
    pub cid: String,
    pub info: TrackInfo,
    pub track: Arc<dyn LocalTrack>,
}

impl std::fmt::Debug for LocalPublication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPublication")
            .field("cid", &self.cid)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

// ── Participants ────────────────────────────────────────────────────

/// A remote track publication.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPublication {
    pub info: TrackInfo,
    pub muted: bool,
    pub stream_state: StreamState,
    pub subscription_allowed: bool,
    /// Local subscription intent.
    pub subscribed: bool,
}

impl TrackPublication {
    fn new(info: TrackInfo, subscribed: bool) -> Self {
        Self {
            muted: info.muted,
            info,
            stream_state: StreamState::default(),
            subscription_allowed: true,
            subscribed,
        }
    }
}

/// Mutable fields of a participant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticipantData {
    pub sid: ParticipantSid,
    pub identity: ParticipantIdentity,
    pub name: String,
    pub metadata: String,
    pub audio_level: f32,
    pub is_speaking: bool,
    pub connection_quality: ConnectionQuality,
    pub tracks: HashMap<TrackSid, TrackPublication>,
}

impl ParticipantData {
    /// Patch identity fields and reconcile publications from server info.
    /// Publications absent from `info` are dropped; known ones keep their
    /// local fields.
    fn apply_info(&mut self, info: &ParticipantInfo, auto_subscribe: bool) {
        self.sid.clone_from(&info.sid);
        self.identity.clone_from(&info.identity);
        self.name.clone_from(&info.name);
        self.metadata.clone_from(&info.metadata);

        let mut tracks = HashMap::with_capacity(info.tracks.len());
        for track in &info.tracks {
            let publication = match self.tracks.remove(&track.sid) {
                Some(mut existing) => {
                    existing.muted = track.muted;
                    existing.info = track.clone();
                    existing
                }
                None => TrackPublication::new(track.clone(), auto_subscribe),
            };
            tracks.insert(track.sid.clone(), publication);
        }
        self.tracks = tracks;
    }
}

/// A participant with its own exclusive state container.
#[derive(Debug)]
pub struct Participant {
    data: StateCell<ParticipantData>,
}

impl Participant {
    pub fn from_info(info: &ParticipantInfo, auto_subscribe: bool) -> Self {
        let mut data = ParticipantData::default();
        data.apply_info(info, auto_subscribe);
        Self {
            data: StateCell::new(data),
        }
    }

    pub fn sid(&self) -> ParticipantSid {
        self.data.read(|d| d.sid.clone())
    }

    pub fn identity(&self) -> ParticipantIdentity {
        self.data.read(|d| d.identity.clone())
    }

    pub fn snapshot(&self) -> ParticipantData {
        self.data.snapshot()
    }

    pub fn read<R>(&self, f: impl FnOnce(&ParticipantData) -> R) -> R {
        self.data.read(f)
    }

    pub fn mutate<R>(&self, f: impl FnOnce(&mut ParticipantData) -> R) -> R {
        self.data.mutate(f)
    }

    pub fn update_from_info(&self, info: &ParticipantInfo, auto_subscribe: bool) {
        self.data.mutate(|d| d.apply_info(info, auto_subscribe));
    }

    pub fn set_speaking(&self, level: f32, speaking: bool) {
        self.data.mutate(|d| {
            d.audio_level = level;
            d.is_speaking = speaking;
        });
    }
}

/// The local participant: server-reported fields plus its published tracks.
#[derive(Debug)]
pub struct LocalParticipant {
    data: StateCell<ParticipantData>,
    publications: Mutex<HashMap<TrackSid, LocalPublication>>,
}

impl Default for LocalParticipant {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalParticipant {
    pub fn new() -> Self {
        Self {
            data: StateCell::new(ParticipantData::default()),
            publications: Mutex::new(HashMap::new()),
        }
    }

    pub fn sid(&self) -> ParticipantSid {
        self.data.read(|d| d.sid.clone())
    }

    pub fn identity(&self) -> ParticipantIdentity {
        self.data.read(|d| d.identity.clone())
    }

    pub fn snapshot(&self) -> ParticipantData {
        self.data.snapshot()
    }

    pub fn mutate<R>(&self, f: impl FnOnce(&mut ParticipantData) -> R) -> R {
        self.data.mutate(f)
    }

    /// Self-update. Local publications are tracked separately, so the
    /// server's track list is informational only.
    pub fn update_from_info(&self, info: &ParticipantInfo) {
        self.data.mutate(|d| d.apply_info(info, false));
    }

    pub fn set_speaking(&self, level: f32, speaking: bool) {
        self.data.mutate(|d| {
            d.audio_level = level;
            d.is_speaking = speaking;
        });
    }

    pub fn add_publication(&self, info: TrackInfo, track: Arc<dyn LocalTrack>) {
        let publication = LocalPublication {
            cid: info.sid.clone(),
            info,
            track,
        };
        self.publications
            .lock()
            .insert(publication.info.sid.clone(), publication);
    }

    pub fn publication(&self, sid: &str) -> Option<LocalPublication> {
        self.publications.lock().get(sid).cloned()
    }

    pub fn remove_publication(&self, sid: &str) -> Option<LocalPublication> {
        self.publications.lock().remove(sid)
    }

    /// Record a changed mute state on a publication. Returns `false` if the
    /// publication is unknown.
    pub fn set_publication_muted(&self, sid: &str, muted: bool) -> bool {
        match self.publications.lock().get_mut(sid) {
            Some(publication) => {
                publication.info.muted = muted;
                true
            }
            None => false,
        }
    }

    /// Record codecs that were published in addition to the original ones.
    pub fn add_codecs(&self, sid: &str, codecs: &[String]) {
        if let Some(publication) = self.publications.lock().get_mut(sid) {
            for codec in codecs {
                if !publication.info.codecs.contains(codec) {
                    publication.info.codecs.push(codec.clone());
                }
            }
        }
    }

    /// Every publication, in the form sync-state reports them.
    pub fn published_tracks(&self) -> Vec<TrackPublishedResponse> {
        let mut tracks: Vec<_> = self
            .publications
            .lock()
            .values()
            .map(|p| TrackPublishedResponse {
                cid: p.cid.clone(),
                track: p.info.clone(),
            })
            .collect();
        tracks.sort_by(|a, b| a.cid.cmp(&b.cid));
        tracks
    }

    fn clean_up(&self, keep_publications: bool) {
        self.data.mutate(|d| *d = ParticipantData::default());
        if !keep_publications {
            self.publications.lock().clear();
        }
    }
}

// ── Room ────────────────────────────────────────────────────────────

/// One entry of the active-speaker list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveSpeaker {
    pub sid: ParticipantSid,
    pub identity: ParticipantIdentity,
    pub audio_level: f32,
}

/// Merge a speaker update into the previous active set.
///
/// Speakers reported active are added or refreshed, speakers reported
/// inactive are removed, everyone else keeps their previous entry. The
/// result is sorted by descending audio level, ties broken by sid.
pub fn merge_active_speakers(
    previous: &[ActiveSpeaker],
    updates: &[SpeakerInfo],
    identity_of: impl Fn(&str) -> Option<ParticipantIdentity>,
) -> Vec<ActiveSpeaker> {
    let mut speakers: HashMap<ParticipantSid, ActiveSpeaker> = previous
        .iter()
        .map(|s| (s.sid.clone(), s.clone()))
        .collect();

    for update in updates {
        if !update.active {
            speakers.remove(&update.sid);
            continue;
        }
        let Some(identity) = identity_of(&update.sid) else {
            continue;
        };
        speakers.insert(
            update.sid.clone(),
            ActiveSpeaker {
                sid: update.sid.clone(),
                identity,
                audio_level: update.level,
            },
        );
    }

    let mut sorted: Vec<_> = speakers.into_values().collect();
    sorted.sort_by(|a, b| {
        b.audio_level
            .total_cmp(&a.audio_level)
            .then_with(|| a.sid.cmp(&b.sid))
    });
    sorted
}

/// Room-level state. Cloning is cheap: participants are shared.
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    pub info: RoomInfo,
    pub server_info: Option<ServerInfo>,
    pub remotes: HashMap<ParticipantIdentity, Arc<Participant>>,
    pub active_speakers: Vec<ActiveSpeaker>,
}

/// The room a session is joined to.
#[derive(Debug)]
pub struct Room {
    state: StateCell<RoomState>,
    local: Arc<LocalParticipant>,
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

impl Room {
    pub fn new() -> Self {
        Self {
            state: StateCell::new(RoomState::default()),
            local: Arc::new(LocalParticipant::new()),
        }
    }

    pub fn info(&self) -> RoomInfo {
        self.state.read(|s| s.info.clone())
    }

    /// Room id assigned by the server; empty before the first join.
    pub fn sid(&self) -> String {
        self.state.read(|s| s.info.sid.clone())
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.state.read(|s| s.server_info.clone())
    }

    pub fn local(&self) -> &Arc<LocalParticipant> {
        &self.local
    }

    pub fn remote(&self, identity: &str) -> Option<Arc<Participant>> {
        self.state.read(|s| s.remotes.get(identity).cloned())
    }

    pub fn remote_by_sid(&self, sid: &str) -> Option<Arc<Participant>> {
        self.state
            .read(|s| s.remotes.values().find(|p| p.sid() == sid).cloned())
    }

    pub fn remotes(&self) -> Vec<Arc<Participant>> {
        self.state.read(|s| s.remotes.values().cloned().collect())
    }

    pub fn active_speakers(&self) -> Vec<ActiveSpeaker> {
        self.state.read(|s| s.active_speakers.clone())
    }

    pub fn snapshot(&self) -> RoomState {
        self.state.snapshot()
    }

    pub fn mutate<R>(&self, f: impl FnOnce(&mut RoomState) -> R) -> R {
        self.state.mutate(f)
    }

    /// Track sids whose local subscription differs from what
    /// `auto_subscribe` implies.
    pub fn subscription_diff(&self, auto_subscribe: bool) -> Vec<TrackSid> {
        let mut sids: Vec<_> = self
            .remotes()
            .iter()
            .flat_map(|p| {
                p.read(|d| {
                    d.tracks
                        .values()
                        .filter(|t| t.subscribed != auto_subscribe)
                        .map(|t| t.info.sid.clone())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        sids.sort();
        sids
    }

    /// Forget remote participants and room data. Local publications survive
    /// a full reconnect.
    pub fn clean_up(&self, keep_local_publications: bool) {
        self.state.mutate(|s| *s = RoomState::default());
        self.local.clean_up(keep_local_publications);
    }
}
