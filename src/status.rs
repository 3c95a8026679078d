//! Shared supervisor status
//!
//! A small snapshot the recovery engine keeps current and other parties
//! read: the stream monitor gates restarts on player health, and the status
//! endpoint reports the snapshot to the dashboard.

use serde::Serialize;
use std::sync::RwLock;

/// Point-in-time view of the engine's observation state
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub player_connected: bool,
    /// Connected, heartbeats current, and not stalled
    pub player_healthy: bool,
    /// Active recovery step, `None` while playback is fine
    pub recovery_step: Option<String>,
    pub consecutive_errors: u32,
    pub stalled_heartbeats: u32,
    pub non_playing_heartbeats: u32,
    pub total_videos: Option<usize>,
    pub playback_quality: String,
}

/// Snapshot cell written by the engine, read by everyone else
#[derive(Default)]
pub struct SharedStatus {
    inner: RwLock<StatusSnapshot>,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().expect("status lock poisoned").clone()
    }

    pub fn set(&self, snapshot: StatusSnapshot) {
        *self.inner.write().expect("status lock poisoned") = snapshot;
    }

    /// Restart gate used by the stream monitor
    pub fn player_healthy(&self) -> bool {
        self.inner.read().expect("status lock poisoned").player_healthy
    }
}
