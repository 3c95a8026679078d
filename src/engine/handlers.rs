//! Player message handlers - heartbeat, state change, playlist load, error

use crate::engine::core::{
    RecoveryEngine, NON_PLAYING_THRESHOLD, PAUSED_RESUME_THRESHOLD, STALL_THRESHOLD,
};
use crate::player::messages::{is_below_quality, Heartbeat, PlayerState};
use crate::player::ServerMessage;
use crate::store::StatePatch;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl RecoveryEngine {
    pub(super) fn on_heartbeat(&mut self, hb: Heartbeat) {
        self.last_heartbeat_at = Instant::now();
        self.playback_quality = hb.playback_quality.clone();

        let playing = hb.player_state.is_playing();
        let paused = hb.player_state.is_paused();

        // Stall detection: PLAYING heartbeats whose position is frozen
        // relative to the last observed progress point.
        if playing
            && hb.current_time > 0.0
            && (hb.current_time - self.last_progress_time).abs() < 1.0
        {
            self.stalled_heartbeats += 1;
            debug!(
                "Stalled heartbeat {} at {:.1}s",
                self.stalled_heartbeats, hb.current_time
            );
            if self.stalled_heartbeats >= STALL_THRESHOLD && self.step.is_none() {
                warn!("Playback stalled at {:.1}s", hb.current_time);
                self.event_log.push(format!("Playback stalled at {:.1}s", hb.current_time));
                self.notifier.notify_recovery("playback stalled");
                self.start_recovery("playback stalled");
            }
        } else {
            self.stalled_heartbeats = 0;
            if playing {
                self.last_progress_time = hb.current_time;
                if self.step.is_some() {
                    // Real progress observed while the ladder was running.
                    self.resolve_recovery();
                }
            }
        }

        // Optional quality recovery: a sustained run of low-quality PLAYING
        // heartbeats gets the same ladder as a stall.
        if self.config.recovery.quality_recovery
            && playing
            && is_below_quality(&hb.playback_quality, &self.config.recovery.min_quality)
        {
            self.low_quality_heartbeats += 1;
            if self.low_quality_heartbeats >= self.config.low_quality_threshold()
                && self.step.is_none()
            {
                self.low_quality_heartbeats = 0;
                warn!("Playback quality '{}' below '{}'", hb.playback_quality, self.config.recovery.min_quality);
                self.event_log.push(format!("Low playback quality: {}", hb.playback_quality));
                self.start_recovery("sustained low quality");
            }
        } else {
            self.low_quality_heartbeats = 0;
        }

        // Persist position. `current_time` is withheld on buffering-type
        // heartbeats so a reload never clobbers a valid resume offset, and
        // nothing is written at all while the position looks stuck.
        if self.stalled_heartbeats < STALL_THRESHOLD {
            let mut patch = StatePatch {
                video_index: Some(hb.video_index),
                video_id: Some(hb.video_id),
                video_title: Some(hb.video_title),
                next_video_id: Some(hb.next_video_id),
                video_duration: Some(hb.video_duration),
                ..Default::default()
            };
            if playing || paused || hb.current_time > 0.0 {
                patch.current_time = Some(hb.current_time);
            }
            self.store.update(patch);
        }

        // Paused auto-resume: unattended players have no business pausing.
        if paused {
            self.consecutive_paused += 1;
            if self.consecutive_paused == PAUSED_RESUME_THRESHOLD {
                info!("Player paused for {} heartbeats, resuming", self.consecutive_paused);
                self.event_log.push("Auto-resumed paused player");
                self.player.send(&ServerMessage::Resume);
            }
        } else {
            self.consecutive_paused = 0;
        }

        // Non-playing detection: buffering/cued/unstarted forever means the
        // widget is wedged even though heartbeats still flow.
        if !playing && !paused {
            self.non_playing_heartbeats += 1;
            if self.non_playing_heartbeats >= NON_PLAYING_THRESHOLD && self.step.is_none() {
                warn!(
                    "Player not playing for {} heartbeats (state {})",
                    self.non_playing_heartbeats, hb.player_state.0
                );
                self.event_log.push("Player stuck in non-playing state");
                self.start_recovery("non-playing state");
            }
        } else if playing {
            self.non_playing_heartbeats = 0;
        }
    }

    pub(super) async fn on_state_change(
        &mut self,
        player_state: PlayerState,
        video_index: usize,
        video_id: String,
        video_title: String,
    ) {
        debug!("State change: {} on video {}", player_state.0, video_index);
        self.store.update(StatePatch {
            video_index: Some(video_index),
            video_id: Some(video_id),
            video_title: Some(video_title),
            ..Default::default()
        });

        if player_state.is_playing() {
            self.consecutive_errors = 0;
            self.non_playing_heartbeats = 0;
        }

        if player_state == PlayerState::ENDED {
            if let Some(total) = self.total_videos {
                if total > 0 && video_index == total - 1 && self.config.playlists.len() > 1 {
                    info!("Last video of playlist ended, advancing");
                    self.advance_playlist("playlist ended").await;
                }
                // With a single playlist the widget loops on its own.
            }
        }
    }

    pub(super) fn on_playlist_loaded(&mut self, total_videos: usize) {
        info!("Playlist loaded: {} videos", total_videos);
        self.total_videos = Some(total_videos);
        let state = self.store.get();
        if total_videos > 0 && state.video_index >= total_videos {
            warn!(
                "Saved video index {} beyond playlist of {}, resetting",
                state.video_index, total_videos
            );
            self.event_log.push("Saved video index out of range, reset to 0");
            self.store.update(StatePatch {
                video_index: Some(0),
                current_time: Some(0.0),
                ..Default::default()
            });
            self.player.send(&ServerMessage::Skip { index: 0 });
        }
    }

    pub(super) async fn on_player_error(
        &mut self,
        error_code: i32,
        video_index: usize,
        video_id: String,
    ) {
        warn!("Player error {} on video {} ({})", error_code, video_index, video_id);
        self.event_log.push(format!("Player error {error_code} on video {video_index}"));

        if self.config.recovery.permanent_skip_codes.contains(&error_code) {
            // Unplayable for good: no amount of retrying helps.
            let reason = format!("Error {error_code} (unavailable/not embeddable)");
            self.skip_video(video_index, &video_id, &reason).await;
            return;
        }

        self.consecutive_errors += 1;
        self.notifier.notify_error(error_code, video_index, &video_id);

        if self.consecutive_errors >= self.config.recovery.max_consecutive_errors {
            let reason = format!("{} consecutive errors", self.consecutive_errors);
            self.consecutive_errors = 0;
            self.skip_video(video_index, &video_id, &reason).await;
        } else {
            self.schedule_retry(self.config.recovery_delay());
        }
    }

    /// Post-error retry, delayed so transient faults can clear
    pub(super) fn schedule_retry(&mut self, delay: Duration) {
        self.retry_generation += 1;
        let generation = self.retry_generation;
        let tx = self.self_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(crate::engine::EngineCommand::RetryTick { generation }).await;
                }
            }
        });
    }

    pub(super) fn on_retry_tick(&mut self, generation: u64) {
        if generation != self.retry_generation {
            return;
        }
        debug!("Retrying current video after error");
        self.player.send(&ServerMessage::RetryCurrent);
    }
}
