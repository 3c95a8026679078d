//! Service configuration
//!
//! The configuration file is owned by an external loader (schema migration,
//! admin UI edits); castwatch only reads it. Loading happens twice: once at
//! boot (fatal on failure) and again on every reload request (non-fatal, the
//! previous configuration stays live when the new one fails validation).
//!
//! All durations are carried as milliseconds in the file and exposed as
//! `Duration` through accessor methods.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One entry in the configured playlist rotation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistEntry {
    /// Opaque playlist id understood by the embedded widget
    pub id: String,
    /// Operator-facing label, optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Streaming-host (OBS) connection and launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// obs-websocket endpoint, e.g. "ws://127.0.0.1:4455"
    pub url: String,
    /// obs-websocket password; empty string means no auth
    pub password: String,
    /// Name of the browser-source input that loads the player page
    pub source_name: String,
    /// Restart the stream automatically when the host reports a drop
    pub auto_stream: bool,
    /// Launch the host process after repeated reconnect failures
    pub auto_restart: bool,
    /// Host executable path; empty disables launching
    pub executable: String,
    /// Process image name used for the already-running check
    pub process_name: String,
    /// Crash sentinel file removed before a launch so the host does not
    /// start in safe mode; empty disables the cleanup
    pub crash_sentinel: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4455".to_string(),
            password: String::new(),
            source_name: "Player".to_string(),
            auto_stream: false,
            auto_restart: false,
            executable: String::new(),
            process_name: "obs".to_string(),
            crash_sentinel: String::new(),
        }
    }
}

/// Webhook alerting settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifierConfig {
    /// Webhook endpoint; empty disables all outbound alerts
    pub webhook_url: String,
    /// Bot display name; empty keeps the webhook default
    pub username: String,
    /// Bot avatar URL; empty keeps the webhook default
    pub avatar_url: String,
    /// Mention string prepended to error-level flushes, e.g. "<@&role>"
    pub role_mention: String,
    /// Per-event-kind enable toggles; kinds absent from the map are enabled
    pub events: std::collections::HashMap<String, bool>,
    /// Per-event-kind template overrides
    pub templates: std::collections::HashMap<String, String>,
}

/// Recovery-engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryConfig {
    /// Expected heartbeat cadence from the player page
    pub heartbeat_interval_ms: u64,
    /// Heartbeat silence beyond this triggers the watchdog
    pub heartbeat_timeout_ms: u64,
    /// Delay before retry-current and before the first escalation step
    pub recovery_delay_ms: u64,
    /// Non-skip errors tolerated before the video is skipped
    pub max_consecutive_errors: u32,
    /// Widget error codes treated as permanently unplayable
    pub permanent_skip_codes: Vec<i32>,
    /// Recover when playback quality sits below `min_quality`
    pub quality_recovery: bool,
    /// Lowest acceptable quality label (widget vocabulary, e.g. "hd720")
    pub min_quality: String,
    /// Sustained low quality for this long fires recovery
    pub quality_recovery_delay_ms: u64,
    /// Periodic browser-source refresh; 0 disables
    pub source_refresh_interval_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            recovery_delay_ms: 5_000,
            max_consecutive_errors: 3,
            permanent_skip_codes: vec![100, 101, 150],
            quality_recovery: false,
            min_quality: "hd720".to_string(),
            quality_recovery_delay_ms: 30_000,
            source_refresh_interval_ms: 0,
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// HTTP listener port; the bind address is always loopback
    pub port: u16,
    /// Ordered playlist rotation; must not be empty
    pub playlists: Vec<PlaylistEntry>,
    /// Path of the persisted playback-position file
    pub state_file: PathBuf,
    pub host: HostConfig,
    pub notifier: NotifierConfig,
    pub recovery: RecoveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4350,
            playlists: Vec::new(),
            state_file: PathBuf::from("state.json"),
            host: HostConfig::default(),
            notifier: NotifierConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the supervisor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.playlists.is_empty() {
            return Err(Error::Config("at least one playlist is required".to_string()));
        }
        if let Some(entry) = self.playlists.iter().find(|p| p.id.trim().is_empty()) {
            return Err(Error::Config(format!(
                "playlist '{}' has an empty id",
                entry.name.as_deref().unwrap_or("<unnamed>")
            )));
        }
        if self.recovery.heartbeat_interval_ms == 0 {
            return Err(Error::Config("heartbeatIntervalMs must be positive".to_string()));
        }
        if self.recovery.heartbeat_timeout_ms < self.recovery.heartbeat_interval_ms {
            return Err(Error::Config(
                "heartbeatTimeoutMs must not be shorter than heartbeatIntervalMs".to_string(),
            ));
        }
        if self.host.url.trim().is_empty() {
            return Err(Error::Config("host url must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery.heartbeat_timeout_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery.recovery_delay_ms)
    }

    /// Heartbeats of sustained low quality before recovery fires
    pub fn low_quality_threshold(&self) -> u32 {
        let interval = self.recovery.heartbeat_interval_ms.max(1);
        self.recovery.quality_recovery_delay_ms.div_ceil(interval) as u32
    }
}
