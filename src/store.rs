//! Persisted playback-position store
//!
//! Keeps the current playlist/video position on disk so playback resumes
//! mid-video after a process restart. The in-memory copy is authoritative;
//! disk writes are debounced (2 s), atomic (temp file + rename), and their
//! failures are logged without propagating.
//!
//! Ownership: the store is the only component that touches the state file.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Debounce window between an update and its disk write
const WRITE_DEBOUNCE: Duration = Duration::from_secs(2);

/// Playback position snapshot as persisted on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub playlist_index: usize,
    pub video_index: usize,
    pub video_id: String,
    pub video_title: String,
    pub next_video_id: String,
    /// Seconds into the current video
    pub current_time: f64,
    /// Seconds; 0 while unknown
    pub video_duration: f64,
    pub updated_at: DateTime<Utc>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            playlist_index: 0,
            video_index: 0,
            video_id: String::new(),
            video_title: String::new(),
            next_video_id: String::new(),
            current_time: 0.0,
            video_duration: 0.0,
            updated_at: Utc::now(),
        }
    }
}

/// Partial update applied by [`StateStore::update`]; `None` fields are untouched
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub playlist_index: Option<usize>,
    pub video_index: Option<usize>,
    pub video_id: Option<String>,
    pub video_title: Option<String>,
    pub next_video_id: Option<String>,
    pub current_time: Option<f64>,
    pub video_duration: Option<f64>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        self.playlist_index.is_none()
            && self.video_index.is_none()
            && self.video_id.is_none()
            && self.video_title.is_none()
            && self.next_video_id.is_none()
            && self.current_time.is_none()
            && self.video_duration.is_none()
    }
}

struct Inner {
    state: PersistedState,
    /// True while a debounced write is scheduled
    write_pending: bool,
}

/// Crash-safe, debounced persistence of the playback position
pub struct StateStore {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl StateStore {
    /// Load the store from disk; missing or unparsable files start clean
    pub fn load(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => {
                    info!(
                        "Loaded state: playlist {} video {} at {:.1}s",
                        state.playlist_index, state.video_index, state.current_time
                    );
                    state
                }
                Err(e) => {
                    warn!("State file {} unparsable ({}), starting clean", path.display(), e);
                    PersistedState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting clean", path.display());
                PersistedState::default()
            }
            Err(e) => {
                warn!("Cannot read state file {} ({}), starting clean", path.display(), e);
                PersistedState::default()
            }
        };
        Arc::new(Self {
            path,
            inner: Arc::new(Mutex::new(Inner { state, write_pending: false })),
        })
    }

    /// Defensive copy of the current state
    pub fn get(&self) -> PersistedState {
        self.inner.lock().expect("state lock poisoned").state.clone()
    }

    /// Merge a partial update and arm the debounced write
    ///
    /// `updated_at` is refreshed on every call and stays strictly monotonic
    /// within the process even if the wall clock steps backwards.
    pub fn update(&self, patch: StatePatch) {
        if patch.is_empty() {
            return;
        }
        let schedule = {
            let mut inner = self.inner.lock().expect("state lock poisoned");
            apply_patch(&mut inner.state, patch);
            inner.state.updated_at = next_timestamp(inner.state.updated_at);
            if inner.write_pending {
                false
            } else {
                inner.write_pending = true;
                true
            }
        };
        if schedule {
            let inner = Arc::clone(&self.inner);
            let path = self.path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(WRITE_DEBOUNCE).await;
                let snapshot = {
                    let mut inner = inner.lock().expect("state lock poisoned");
                    if !inner.write_pending {
                        // A flush already covered this update.
                        return;
                    }
                    inner.write_pending = false;
                    inner.state.clone()
                };
                write_to_disk(&path, &snapshot).await;
            });
        }
    }

    /// Cancel any pending debounce and write the current state immediately
    ///
    /// Called on shutdown and on critical transitions (playlist advance).
    pub async fn flush(&self) {
        let snapshot = {
            let mut inner = self.inner.lock().expect("state lock poisoned");
            inner.write_pending = false;
            inner.state.clone()
        };
        write_to_disk(&self.path, &snapshot).await;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Atomic write: temp file then rename, never truncate in place
async fn write_to_disk(path: &Path, state: &PersistedState) {
    if let Err(e) = try_write(path, state).await {
        error!("State write to {} failed: {}", path.display(), e);
    } else {
        debug!("State written: playlist {} video {}", state.playlist_index, state.video_index);
    }
}

async fn try_write(path: &Path, state: &PersistedState) -> crate::Result<()> {
    let body = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, body.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn apply_patch(state: &mut PersistedState, patch: StatePatch) {
    if let Some(v) = patch.playlist_index {
        state.playlist_index = v;
    }
    if let Some(v) = patch.video_index {
        state.video_index = v;
    }
    if let Some(v) = patch.video_id {
        state.video_id = v;
    }
    if let Some(v) = patch.video_title {
        state.video_title = v;
    }
    if let Some(v) = patch.next_video_id {
        state.next_video_id = v;
    }
    if let Some(v) = patch.current_time {
        state.current_time = v.max(0.0);
    }
    if let Some(v) = patch.video_duration {
        state.video_duration = v.max(0.0);
    }
}

fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + ChronoDuration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_merges_only_present_fields() {
        let mut state = PersistedState {
            video_index: 3,
            video_id: "abc".to_string(),
            ..Default::default()
        };
        apply_patch(&mut state, StatePatch { current_time: Some(42.5), ..Default::default() });
        assert_eq!(state.video_index, 3);
        assert_eq!(state.video_id, "abc");
        assert_eq!(state.current_time, 42.5);
    }

    #[test]
    fn negative_times_are_clamped() {
        let mut state = PersistedState::default();
        apply_patch(
            &mut state,
            StatePatch {
                current_time: Some(-5.0),
                video_duration: Some(-1.0),
                ..Default::default()
            },
        );
        assert_eq!(state.current_time, 0.0);
        assert_eq!(state.video_duration, 0.0);
    }

    #[test]
    fn timestamps_are_monotonic() {
        let t0 = Utc::now();
        let far_future = t0 + ChronoDuration::days(365);
        let next = next_timestamp(far_future);
        assert!(next > far_future);
    }

    #[test]
    fn legacy_file_without_playlist_index_defaults_to_zero() {
        let raw = r#"{"videoIndex": 7, "videoId": "xyz", "currentTime": 12.0}"#;
        let state: PersistedState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.playlist_index, 0);
        assert_eq!(state.video_index, 7);
    }
}
