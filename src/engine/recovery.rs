//! Escalation ladder
//!
//! Four steps, each given time to work before the next fires:
//! retry the video in place, hard-reload the browser source, blink the
//! source's visibility, then page the operator. Every scheduled transition
//! re-checks the still-broken predicate when it fires; playback coming back
//! resolves the ladder instead of escalating it.

use crate::engine::core::{RecoveryEngine, NON_PLAYING_THRESHOLD, STALL_THRESHOLD};
use crate::engine::EngineCommand;
use crate::player::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between the source-manipulation steps
const STEP_DELAY: Duration = Duration::from_secs(15);
/// Idle time after a critical alert before the ladder restarts
const LADDER_RESTART_DELAY: Duration = Duration::from_secs(60);

/// Where the ladder currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    RetryCurrent,
    RefreshSource,
    ToggleVisibility,
    CriticalAlert,
}

impl RecoveryStep {
    pub fn label(self) -> &'static str {
        match self {
            RecoveryStep::RetryCurrent => "retry current",
            RecoveryStep::RefreshSource => "refresh source",
            RecoveryStep::ToggleVisibility => "toggle visibility",
            RecoveryStep::CriticalAlert => "critical alert",
        }
    }
}

/// What a scheduled transition does when it fires and playback is still
/// broken
#[derive(Debug, Clone, Copy)]
pub(super) enum NextAction {
    Escalate(RecoveryStep),
    /// The ladder ran out; start over from the top
    RestartLadder,
}

impl RecoveryEngine {
    /// Enter the ladder at the first step; a no-op while already recovering
    pub(super) fn start_recovery(&mut self, reason: &str) {
        if self.step.is_some() {
            return;
        }
        info!("Recovery started: {}", reason);
        self.execute_step(RecoveryStep::RetryCurrent);
    }

    fn execute_step(&mut self, step: RecoveryStep) {
        self.step = Some(step);
        self.event_log.push(format!("Recovery step: {}", step.label()));
        match step {
            RecoveryStep::RetryCurrent => {
                self.player.send(&ServerMessage::RetryCurrent);
                self.schedule_transition(
                    NextAction::Escalate(RecoveryStep::RefreshSource),
                    self.config.recovery_delay(),
                );
            }
            RecoveryStep::RefreshSource => {
                // Host calls run off-task; a slow host must not starve the
                // mailbox, and a failed call never stops the ladder.
                let host = Arc::clone(&self.host);
                tokio::spawn(async move {
                    host.refresh_browser_source().await;
                });
                self.schedule_transition(
                    NextAction::Escalate(RecoveryStep::ToggleVisibility),
                    STEP_DELAY,
                );
            }
            RecoveryStep::ToggleVisibility => {
                let host = Arc::clone(&self.host);
                tokio::spawn(async move {
                    host.toggle_browser_source().await;
                });
                self.schedule_transition(
                    NextAction::Escalate(RecoveryStep::CriticalAlert),
                    STEP_DELAY,
                );
            }
            RecoveryStep::CriticalAlert => {
                warn!("Recovery exhausted, paging operator");
                self.notifier
                    .notify_critical("Playback still broken after the full recovery ladder");
                self.schedule_transition(NextAction::RestartLadder, LADDER_RESTART_DELAY);
            }
        }
    }

    fn schedule_transition(&mut self, next: NextAction, delay: Duration) {
        self.recovery_generation += 1;
        self.pending_transition = Some(next);
        let generation = self.recovery_generation;
        let tx = self.self_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(EngineCommand::RecoveryTick { generation }).await;
                }
            }
        });
    }

    /// A scheduled transition came due
    pub(super) fn on_recovery_tick(&mut self, generation: u64) {
        if generation != self.recovery_generation {
            return; // superseded or cancelled while the delay ran
        }
        if self.step.is_none() {
            return;
        }
        let Some(next) = self.pending_transition.take() else {
            return;
        };
        if !self.still_broken() {
            self.resolve_recovery();
            return;
        }
        match next {
            NextAction::Escalate(step) => self.execute_step(step),
            NextAction::RestartLadder => {
                debug!("Escalation ladder restarting");
                self.step = None;
                self.start_recovery("ladder restart");
            }
        }
    }

    /// The predicate every transition re-checks before escalating
    fn still_broken(&self) -> bool {
        self.last_heartbeat_at.elapsed() > self.config.heartbeat_timeout()
            || self.stalled_heartbeats >= STALL_THRESHOLD
            || self.non_playing_heartbeats >= NON_PLAYING_THRESHOLD
    }

    /// Playback came back: clear the ladder and tell the operator
    pub(super) fn resolve_recovery(&mut self) {
        self.reset_recovery();
        let state = self.store.get();
        info!("Recovery resolved on video {} ({})", state.video_index, state.video_id);
        self.notifier.notify_resume(state.video_index, &state.video_id);
        self.event_log.push("Recovery resolved");
    }

    /// Clear the ladder without ceremony (player reconnect, teardown)
    pub(super) fn reset_recovery(&mut self) {
        self.step = None;
        self.pending_transition = None;
        // Invalidate any timer already in flight.
        self.recovery_generation += 1;
    }
}
