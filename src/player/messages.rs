//! Player socket message types
//!
//! The player page and the supervisor exchange JSON objects with a `type`
//! discriminator. Unknown fields on known types are ignored for forward
//! compatibility; unknown types fail to parse and are dropped by the
//! transport with a log line.

use serde::{Deserialize, Serialize};

/// Player widget state, an opaque integer following the embedded widget's
/// enumeration. Only the named constants carry meaning here; other values
/// pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PlayerState(pub i32);

impl PlayerState {
    pub const UNSTARTED: PlayerState = PlayerState(-1);
    pub const ENDED: PlayerState = PlayerState(0);
    pub const PLAYING: PlayerState = PlayerState(1);
    pub const PAUSED: PlayerState = PlayerState(2);
    pub const BUFFERING: PlayerState = PlayerState(3);
    pub const CUED: PlayerState = PlayerState(5);

    pub fn is_playing(self) -> bool {
        self == Self::PLAYING
    }

    pub fn is_paused(self) -> bool {
        self == Self::PAUSED
    }
}

/// Periodic status report from the player page
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Heartbeat {
    pub video_index: usize,
    pub video_id: String,
    pub video_title: String,
    pub player_state: PlayerState,
    /// Seconds into the current video
    pub current_time: f64,
    pub video_duration: f64,
    pub next_video_id: String,
    pub volume: f64,
    pub muted: bool,
    /// Widget quality label, e.g. "hd720"; empty when unreported
    pub playback_quality: String,
}

/// Messages arriving from the player page
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlayerMessage {
    /// Page booted and the widget is constructed
    Ready,
    Heartbeat(Heartbeat),
    StateChange {
        player_state: PlayerState,
        #[serde(default)]
        video_index: usize,
        #[serde(default)]
        video_id: String,
        #[serde(default)]
        video_title: String,
    },
    PlaylistLoaded {
        total_videos: usize,
    },
    Error {
        error_code: i32,
        #[serde(default)]
        video_index: usize,
        #[serde(default)]
        video_id: String,
    },
}

/// Commands sent to the player page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    LoadPlaylist {
        playlist_id: String,
        index: usize,
        #[serde(rename = "loop")]
        looped: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<f64>,
    },
    RetryCurrent,
    Resume,
    Skip {
        index: usize,
    },
}

/// Quality labels in ascending order of fidelity
const QUALITY_ORDER: [&str; 8] =
    ["small", "medium", "large", "hd720", "hd1080", "hd1440", "hd2160", "highres"];

/// Rank of a widget quality label; `None` for labels outside the known set
/// (notably "unknown" and "auto", which never count as low quality)
pub fn quality_rank(label: &str) -> Option<usize> {
    QUALITY_ORDER.iter().position(|&q| q == label)
}

/// True when `actual` is a known label ranked strictly below `minimum`
pub fn is_below_quality(actual: &str, minimum: &str) -> bool {
    match (quality_rank(actual), quality_rank(minimum)) {
        (Some(a), Some(m)) => a < m,
        _ => false,
    }
}
