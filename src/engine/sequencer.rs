//! Video skip and playlist advance
//!
//! Skipping wraps within the current playlist until its last video, then
//! hands over to the playlist advance, which rotates through the configured
//! list (a single playlist wraps onto itself). Advancing is a critical
//! transition: the state file is flushed immediately so a crash right after
//! cannot resurrect the abandoned video.

use crate::engine::core::RecoveryEngine;
use crate::player::ServerMessage;
use crate::store::StatePatch;
use tracing::info;

impl RecoveryEngine {
    /// Leave `from_index` behind for `reason`
    pub(super) async fn skip_video(&mut self, from_index: usize, video_id: &str, reason: &str) {
        info!("Skipping video {} ({}): {}", from_index, video_id, reason);
        self.event_log.push(format!("Skipped video {from_index}: {reason}"));
        self.notifier.notify_skip(from_index, video_id, reason);

        match self.total_videos {
            Some(total) if total > 0 && from_index + 1 >= total => {
                self.advance_playlist(reason).await;
            }
            Some(total) if total > 0 => {
                let next = (from_index + 1) % total;
                self.player.send(&ServerMessage::Skip { index: next });
                self.store.update(StatePatch {
                    video_index: Some(next),
                    current_time: Some(0.0),
                    ..Default::default()
                });
            }
            _ => {
                // Playlist size not reported yet; step forward blind.
                let next = from_index + 1;
                self.player.send(&ServerMessage::Skip { index: next });
                self.store.update(StatePatch {
                    video_index: Some(next),
                    current_time: Some(0.0),
                    ..Default::default()
                });
            }
        }
    }

    /// Rotate to the next configured playlist (wrap-around)
    pub(super) async fn advance_playlist(&mut self, reason: &str) {
        let playlist_count = self.config.playlists.len();
        let state = self.store.get();
        let next = (state.playlist_index + 1) % playlist_count;
        let entry = &self.config.playlists[next];

        info!("Advancing to playlist {} ({}): {}", next, entry.id, reason);
        self.event_log.push(format!("Advanced to playlist {next}: {reason}"));

        self.store.update(StatePatch {
            playlist_index: Some(next),
            video_index: Some(0),
            video_id: Some(String::new()),
            current_time: Some(0.0),
            ..Default::default()
        });
        self.store.flush().await;

        self.total_videos = None;
        self.player.send(&ServerMessage::LoadPlaylist {
            playlist_id: entry.id.clone(),
            index: 0,
            looped: playlist_count == 1,
            start_time: None,
        });
        self.consecutive_errors = 0;
    }
}
