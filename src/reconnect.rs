//! Reconnection policy and campaigns.
//!
//! The retry policy is a pure state machine, [`ReconnectPlan::step`], over
//! `{attempts made, current mode, next preferred mode}`. It decides which
//! mode the next attempt uses and when the campaign is over, and is tested
//! without any network timing. The async campaign below feeds it attempt
//! outcomes and runs the quick or full sequence it asks for.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::EngineInner;
use crate::error::{EngineError, Result};
use crate::event::EngineEvent;
use crate::protocol::{SignalTarget, SyncState, UpdateSubscription};
use crate::reason::DisconnectReason;
use crate::signal::JoinResult;
use crate::state::{ConnectionState, ReconnectMode};

/// Why a campaign was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// A transport leg reported a lost connection.
    Transport,
    /// The network path changed.
    NetworkSwitch,
    /// Requested through the public API.
    Manual,
}

/// Result of one reconnection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

/// What the campaign should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Run attempt `number` (1-based) in `mode`.
    Attempt { number: u32, mode: ReconnectMode },
    /// The last attempt succeeded.
    Reconnected,
    /// No attempts left.
    Exhausted,
}

/// Retry bookkeeping for one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPlan {
    pub max_attempts: u32,
    pub attempts_made: u32,
    pub current_mode: Option<ReconnectMode>,
    pub next_preferred: Option<ReconnectMode>,
}

impl ReconnectPlan {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts_made: 0,
            current_mode: None,
            next_preferred: None,
        }
    }

    /// Replace the preferred mode for the next attempt with the one currently
    /// requested by the session (for example by a recoverable leave).
    #[must_use]
    pub fn prefer(mut self, mode: Option<ReconnectMode>) -> Self {
        self.next_preferred = mode;
        self
    }

    /// Advance the plan. Pass `None` to plan the first attempt.
    #[must_use]
    pub fn step(self, outcome: Option<AttemptOutcome>) -> (Self, ReconnectAction) {
        match outcome {
            None => self.plan_attempt(),
            Some(AttemptOutcome::Succeeded) => (self, ReconnectAction::Reconnected),
            Some(AttemptOutcome::Failed) => {
                // A failed full attempt ends the campaign early.
                if self.current_mode == Some(ReconnectMode::Full)
                    || self.attempts_made >= self.max_attempts
                {
                    (self, ReconnectAction::Exhausted)
                } else {
                    self.plan_attempt()
                }
            }
        }
    }

    fn plan_attempt(mut self) -> (Self, ReconnectAction) {
        if self.attempts_made >= self.max_attempts {
            return (self, ReconnectAction::Exhausted);
        }
        self.attempts_made += 1;
        if self.attempts_made == self.max_attempts && self.next_preferred.is_none() {
            self.next_preferred = Some(ReconnectMode::Full);
        }
        let mode = if self.next_preferred == Some(ReconnectMode::Full)
            || self.current_mode == Some(ReconnectMode::Full)
        {
            ReconnectMode::Full
        } else {
            ReconnectMode::Quick
        };
        self.current_mode = Some(mode);
        self.next_preferred = None;
        (
            self,
            ReconnectAction::Attempt {
                number: self.attempts_made,
                mode,
            },
        )
    }
}

// ── Campaign ────────────────────────────────────────────────────────

impl EngineInner {
    /// Run one reconnection campaign to completion.
    ///
    /// # Errors
    ///
    /// - [`EngineError::State`] if the session was not connected, or has no
    ///   url/token/transports to reconnect with.
    /// - [`EngineError::Network`] if every attempt failed; the session is
    ///   then finalized as `disconnected(network_error)`.
    pub(crate) async fn start_reconnect(self: &Arc<Self>, reason: ReconnectReason) -> Result<()> {
        if !self.transports.is_configured() {
            return Err(EngineError::state("transports are not configured"));
        }

        let max_attempts = self.mutate_state(|s| {
            if !s.connection_state.is_connected() {
                return Err(EngineError::state("reconnect requires a connected session"));
            }
            if s.url.is_none() || s.token.is_none() {
                return Err(EngineError::state("reconnect requires a url and token"));
            }
            let mode = match s.next_preferred_reconnect_mode {
                Some(ReconnectMode::Full) => ReconnectMode::Full,
                _ => ReconnectMode::Quick,
            };
            s.connection_state = ConnectionState::Reconnecting(mode);
            s.reconnect_mode = Some(mode);
            Ok(s.connect_options.reconnect_attempts)
        })?;

        info!(?reason, max_attempts, "starting reconnection");

        let delay = self.read_state(|s| s.connect_options.reconnect_attempt_delay);
        let mut plan = ReconnectPlan::new(max_attempts);
        let mut outcome = None;

        loop {
            let preferred = self.read_state(|s| s.next_preferred_reconnect_mode);
            let (next, action) = plan.prefer(preferred).step(outcome);
            plan = next;

            match action {
                ReconnectAction::Attempt { number, mode } => {
                    if number > 1 {
                        tokio::time::sleep(delay).await;
                    }
                    let superseded = self.mutate_state(|s| {
                        if !s.connection_state.is_reconnecting() {
                            return true;
                        }
                        s.connection_state = ConnectionState::Reconnecting(mode);
                        s.reconnect_mode = Some(mode);
                        s.next_preferred_reconnect_mode = None;
                        false
                    });
                    if superseded {
                        debug!("reconnection superseded, aborting campaign");
                        return Ok(());
                    }

                    info!(attempt = number, ?mode, "reconnect attempt");
                    self.events.emit(EngineEvent::ReconnectAttempt {
                        attempt: number,
                        mode,
                    });
                    let result = match mode {
                        ReconnectMode::Quick => self.quick_reconnect_sequence().await,
                        ReconnectMode::Full => self.full_reconnect_sequence().await,
                    };
                    outcome = Some(match result {
                        Ok(()) => AttemptOutcome::Succeeded,
                        Err(e) => {
                            warn!(attempt = number, ?mode, "reconnect attempt failed: {e}");
                            AttemptOutcome::Failed
                        }
                    });
                }
                ReconnectAction::Reconnected => {
                    let restored = self.mutate_state(|s| {
                        if !s.connection_state.is_reconnecting() {
                            return false;
                        }
                        s.connection_state = ConnectionState::Connected;
                        s.reconnect_mode = None;
                        true
                    });
                    if restored {
                        info!(attempts = plan.attempts_made, "reconnected");
                    }
                    return Ok(());
                }
                ReconnectAction::Exhausted => {
                    warn!(attempts = plan.attempts_made, "reconnection attempts exhausted");
                    if self.read_state(|s| s.connection_state.is_reconnecting()) {
                        self.clean_up(Some(DisconnectReason::NetworkError), false)
                            .await;
                    }
                    return Err(EngineError::network("reconnection attempts exhausted"));
                }
            }
        }
    }

    /// Resume the existing session: reopen signaling, restart ICE, and
    /// renegotiate the publisher if anything was ever published.
    ///
    /// Cancellation is honoured while waiting and at the checkpoints after
    /// the signaling connect and after the configuration refresh.
    async fn quick_reconnect_sequence(self: &Arc<Self>) -> Result<()> {
        let (url, token, options) = self.credentials()?;
        self.mutate_state(|s| s.timing = crate::state::Stopwatch::start());

        let result = self
            .cancel_guard(self.signal.connect(
                &url,
                &token,
                &options,
                Some(ReconnectMode::Quick),
                options.adaptive_stream,
            ))
            .await?;
        self.mutate_state(|s| s.timing.split("signal"));
        self.cancel_check()?;

        if let JoinResult::Resumed(response) = &result {
            self.transports.refresh_configuration(response, &options)?;
        }
        self.cancel_check()?;
        self.signal.resume_response_queue().await?;

        self.cancel_guard(
            self.transports
                .primary_connected
                .wait(options.primary_transport_connect_timeout),
        )
        .await?;
        self.mutate_state(|s| s.timing.split("primary"));

        self.send_sync_state(options.auto_subscribe).await?;

        if let Some(subscriber) = self.transports.leg(SignalTarget::Subscriber) {
            subscriber.set_restarting_ice();
        }

        if !self.read_state(|s| s.has_published) {
            debug!("nothing published, quick reconnect complete");
            return Ok(());
        }

        let publisher = self
            .transports
            .leg(SignalTarget::Publisher)
            .ok_or_else(|| EngineError::state("publisher leg is absent"))?;
        publisher.create_and_send_offer(true).await?;
        self.cancel_guard(
            self.transports
                .publisher_connected
                .wait(options.publisher_transport_connect_timeout),
        )
        .await?;
        self.signal.send_queued_requests().await?;
        self.mutate_state(|s| s.timing.split("publisher"));
        Ok(())
    }

    /// Tear down both legs and re-run the fresh connect sequence.
    async fn full_reconnect_sequence(self: &Arc<Self>) -> Result<()> {
        let (url, token, _) = self.credentials()?;
        self.clean_up(None, true).await;
        self.full_connect_sequence(&url, &token, Some(ReconnectMode::Full))
            .await
    }

    /// Tell the server which subscriptions deviate from auto-subscribe and
    /// what was already published.
    async fn send_sync_state(&self, auto_subscribe: bool) -> Result<()> {
        let Some(subscriber) = self.transports.leg(SignalTarget::Subscriber) else {
            return Err(EngineError::state("subscriber leg is absent"));
        };
        let Some(answer) = subscriber.local_description() else {
            warn!("subscriber has no local description, skipping sync state");
            return Ok(());
        };

        let sync = SyncState {
            answer,
            offer: subscriber.remote_description(),
            subscription: UpdateSubscription {
                track_sids: self.room.subscription_diff(auto_subscribe),
                subscribe: !auto_subscribe,
            },
            publish_tracks: self.room.local().published_tracks(),
            data_channels: self.transports.data_channels.info(),
        };
        debug!(
            diff = sync.subscription.track_sids.len(),
            published = sync.publish_tracks.len(),
            "sending sync state"
        );
        self.signal.send_sync_state(sync).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a plan where every attempt fails and collect the modes used.
    fn run_all_failing(plan: ReconnectPlan) -> Vec<ReconnectMode> {
        let mut modes = Vec::new();
        let (mut plan, mut action) = plan.step(None);
        loop {
            match action {
                ReconnectAction::Attempt { mode, .. } => {
                    modes.push(mode);
                    (plan, action) = plan.step(Some(AttemptOutcome::Failed));
                }
                ReconnectAction::Exhausted => return modes,
                ReconnectAction::Reconnected => unreachable!("no attempt succeeded"),
            }
        }
    }

    #[test]
    fn exactly_n_attempts_and_last_is_full() {
        for n in 1..=6 {
            let modes = run_all_failing(ReconnectPlan::new(n));
            assert_eq!(modes.len() as u32, n, "attempts for n={n}");
            assert_eq!(modes.last(), Some(&ReconnectMode::Full));
            assert!(modes
                .iter()
                .take(modes.len() - 1)
                .all(|m| *m == ReconnectMode::Quick));
        }
    }

    #[test]
    fn three_attempts_quick_quick_full() {
        assert_eq!(
            run_all_failing(ReconnectPlan::new(3)),
            vec![ReconnectMode::Quick, ReconnectMode::Quick, ReconnectMode::Full]
        );
    }

    #[test]
    fn preferred_full_escalates_and_ends_early() {
        let (plan, action) = ReconnectPlan::new(5)
            .prefer(Some(ReconnectMode::Full))
            .step(None);
        assert_eq!(
            action,
            ReconnectAction::Attempt {
                number: 1,
                mode: ReconnectMode::Full
            }
        );
        let (_, action) = plan.step(Some(AttemptOutcome::Failed));
        assert_eq!(action, ReconnectAction::Exhausted);
    }

    #[test]
    fn full_is_never_downgraded_within_a_campaign() {
        let plan = ReconnectPlan {
            max_attempts: 5,
            attempts_made: 1,
            current_mode: Some(ReconnectMode::Full),
            next_preferred: Some(ReconnectMode::Quick),
        };
        let (_, action) = plan.plan_attempt();
        assert_eq!(
            action,
            ReconnectAction::Attempt {
                number: 2,
                mode: ReconnectMode::Full
            }
        );
    }

    #[test]
    fn explicit_quick_preference_survives_final_attempt() {
        let (plan, _) = ReconnectPlan::new(2).step(None);
        let (_, action) = plan
            .prefer(Some(ReconnectMode::Quick))
            .step(Some(AttemptOutcome::Failed));
        assert_eq!(
            action,
            ReconnectAction::Attempt {
                number: 2,
                mode: ReconnectMode::Quick
            }
        );
    }

    #[test]
    fn success_reconnects() {
        let (plan, _) = ReconnectPlan::new(3).step(None);
        let (plan, action) = plan.step(Some(AttemptOutcome::Succeeded));
        assert_eq!(action, ReconnectAction::Reconnected);
        assert_eq!(plan.attempts_made, 1);
    }

    #[test]
    fn preference_is_consumed_by_the_attempt() {
        let (plan, _) = ReconnectPlan::new(3)
            .prefer(Some(ReconnectMode::Quick))
            .step(None);
        assert_eq!(plan.next_preferred, None);
        assert_eq!(plan.current_mode, Some(ReconnectMode::Quick));
    }
}
