//! Core recovery engine - state ownership, mailbox loop, watchdog

use crate::config::Config;
use crate::engine::recovery::{NextAction, RecoveryStep};
use crate::events::EventLog;
use crate::host::HostClient;
use crate::notifier::NotifierHandle;
use crate::player::{PlayerEvent, PlayerMessage, PlayerTransport, ServerMessage};
use crate::status::{SharedStatus, StatusSnapshot};
use crate::store::{StatePatch, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watchdog cadence; the timeout itself comes from config
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);
/// PLAYING heartbeats with a frozen position before recovery fires
pub(super) const STALL_THRESHOLD: u32 = 3;
/// PAUSED heartbeats before an automatic resume is sent
pub(super) const PAUSED_RESUME_THRESHOLD: u32 = 2;
/// Heartbeats in a non-playing, non-paused state before recovery fires
pub(super) const NON_PLAYING_THRESHOLD: u32 = 6;

/// Outbound side of the player transport, as the engine sees it.
///
/// The engine never owns the socket; tests substitute a channel-backed fake.
pub trait PlayerLink: Send + Sync + 'static {
    fn send(&self, msg: &ServerMessage);
    fn is_connected(&self) -> bool;
}

impl PlayerLink for PlayerTransport {
    fn send(&self, msg: &ServerMessage) {
        PlayerTransport::send(self, msg)
    }

    fn is_connected(&self) -> bool {
        PlayerTransport::is_connected(self)
    }
}

/// Everything the engine task reacts to
#[derive(Debug)]
pub enum EngineCommand {
    Player(PlayerEvent),
    /// Escalation timer fired; stale generations are ignored
    RecoveryTick { generation: u64 },
    /// Post-error retry timer fired
    RetryTick { generation: u64 },
    /// Operator-requested recovery kick
    StartRecovery,
}

/// Heartbeat watchdog, stall detection and the escalation ladder.
///
/// One instance per config version; a reload tears the task down (via its
/// cancellation token) and builds a fresh one.
pub struct RecoveryEngine {
    pub(super) config: Arc<Config>,
    pub(super) store: Arc<StateStore>,
    pub(super) player: Arc<dyn PlayerLink>,
    pub(super) host: Arc<HostClient>,
    pub(super) notifier: NotifierHandle,
    pub(super) event_log: Arc<EventLog>,
    pub(super) status: Arc<SharedStatus>,
    pub(super) self_tx: mpsc::Sender<EngineCommand>,
    pub(super) cancel: CancellationToken,

    // -- observation shadow, owned exclusively by the engine task --
    pub(super) step: Option<RecoveryStep>,
    pub(super) pending_transition: Option<NextAction>,
    pub(super) recovery_generation: u64,
    pub(super) retry_generation: u64,
    pub(super) consecutive_errors: u32,
    pub(super) stalled_heartbeats: u32,
    pub(super) consecutive_paused: u32,
    pub(super) non_playing_heartbeats: u32,
    pub(super) low_quality_heartbeats: u32,
    pub(super) last_heartbeat_at: Instant,
    pub(super) last_progress_time: f64,
    pub(super) playback_quality: String,
    pub(super) total_videos: Option<usize>,
    pub(super) player_connected: bool,
}

impl RecoveryEngine {
    /// Spawn the engine task; the returned sender is its only doorway
    pub fn spawn(
        config: Arc<Config>,
        store: Arc<StateStore>,
        player: Arc<dyn PlayerLink>,
        host: Arc<HostClient>,
        notifier: NotifierHandle,
        event_log: Arc<EventLog>,
        status: Arc<SharedStatus>,
        cancel: CancellationToken,
    ) -> mpsc::Sender<EngineCommand> {
        let (tx, rx) = mpsc::channel(64);
        let engine = Self {
            config,
            store,
            player,
            host,
            notifier,
            event_log,
            status,
            self_tx: tx.clone(),
            cancel,
            step: None,
            pending_transition: None,
            recovery_generation: 0,
            retry_generation: 0,
            consecutive_errors: 0,
            stalled_heartbeats: 0,
            consecutive_paused: 0,
            non_playing_heartbeats: 0,
            low_quality_heartbeats: 0,
            last_heartbeat_at: Instant::now(),
            last_progress_time: 0.0,
            playback_quality: String::new(),
            total_videos: None,
            player_connected: false,
        };
        tokio::spawn(engine.run(rx));
        tx
    }

    async fn run(mut self, mut rx: mpsc::Receiver<EngineCommand>) {
        let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        watchdog.tick().await; // the first tick completes immediately

        let maintenance_ms = self.config.recovery.source_refresh_interval_ms;
        let mut maintenance = (maintenance_ms > 0).then(|| {
            let mut i = tokio::time::interval(Duration::from_millis(maintenance_ms));
            i.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            i
        });

        info!("Recovery engine started ({} playlists)", self.config.playlists.len());
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_command(cmd).await;
                }
                _ = watchdog.tick() => self.watchdog_check(),
                _ = async {
                    match maintenance.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending().await,
                    }
                } => self.maintenance_refresh(),
            }
            self.publish_status();
        }
        debug!("Recovery engine stopped");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Player(PlayerEvent::Connected) => self.on_player_connected(),
            EngineCommand::Player(PlayerEvent::Disconnected) => self.on_player_disconnected(),
            EngineCommand::Player(PlayerEvent::Message(msg)) => match msg {
                PlayerMessage::Ready => {
                    debug!("Player page ready");
                }
                PlayerMessage::Heartbeat(hb) => self.on_heartbeat(hb),
                PlayerMessage::StateChange { player_state, video_index, video_id, video_title } => {
                    self.on_state_change(player_state, video_index, video_id, video_title).await
                }
                PlayerMessage::PlaylistLoaded { total_videos } => {
                    self.on_playlist_loaded(total_videos)
                }
                PlayerMessage::Error { error_code, video_index, video_id } => {
                    self.on_player_error(error_code, video_index, video_id).await
                }
            },
            EngineCommand::RecoveryTick { generation } => self.on_recovery_tick(generation),
            EngineCommand::RetryTick { generation } => self.on_retry_tick(generation),
            EngineCommand::StartRecovery => {
                if self.step.is_none() {
                    self.event_log.push("Recovery requested by operator");
                    self.start_recovery("operator request");
                }
            }
        }
    }

    /// New player connection: reset observation state and resume playback
    /// from the persisted position
    fn on_player_connected(&mut self) {
        self.player_connected = true;
        self.reset_recovery();
        self.last_heartbeat_at = Instant::now();
        self.non_playing_heartbeats = 0;
        self.stalled_heartbeats = 0;

        let playlist_count = self.config.playlists.len();
        let state = self.store.get();
        let playlist_index = state.playlist_index.min(playlist_count - 1);
        if playlist_index != state.playlist_index {
            warn!(
                "Saved playlist index {} out of range, clamped to {}",
                state.playlist_index, playlist_index
            );
            self.store
                .update(StatePatch { playlist_index: Some(playlist_index), ..Default::default() });
        }

        let entry = &self.config.playlists[playlist_index];
        info!(
            "Player connected, resuming playlist {} video {} at {:.1}s",
            playlist_index, state.video_index, state.current_time
        );
        self.event_log.push("Player connected");
        self.player.send(&ServerMessage::LoadPlaylist {
            playlist_id: entry.id.clone(),
            index: state.video_index,
            looped: playlist_count == 1,
            start_time: Some(state.current_time),
        });
    }

    fn on_player_disconnected(&mut self) {
        self.player_connected = false;
        warn!("Player disconnected");
        self.event_log.push("Player disconnected");
    }

    /// Every 5 s: overdue heartbeat while connected and idle enters recovery
    fn watchdog_check(&mut self) {
        if self.player_connected
            && self.last_heartbeat_at.elapsed() > self.config.heartbeat_timeout()
            && self.step.is_none()
        {
            warn!(
                "No heartbeat for {:.0?}, starting recovery",
                self.last_heartbeat_at.elapsed()
            );
            self.event_log.push("Heartbeat timeout");
            self.notifier.notify_recovery("heartbeat timeout");
            self.start_recovery("heartbeat timeout");
        }
    }

    /// Preemptive browser-source refresh against widget memory leaks
    fn maintenance_refresh(&self) {
        if self.step.is_some() || !self.player_connected {
            return;
        }
        debug!("Maintenance browser-source refresh");
        let host = Arc::clone(&self.host);
        tokio::spawn(async move {
            host.refresh_browser_source().await;
        });
    }

    pub(super) fn publish_status(&self) {
        self.status.set(StatusSnapshot {
            player_connected: self.player_connected,
            player_healthy: self.player_connected
                && self.last_heartbeat_at.elapsed() <= self.config.heartbeat_timeout()
                && self.stalled_heartbeats < STALL_THRESHOLD,
            recovery_step: self.step.map(|s| s.label().to_string()),
            consecutive_errors: self.consecutive_errors,
            stalled_heartbeats: self.stalled_heartbeats,
            non_playing_heartbeats: self.non_playing_heartbeats,
            total_videos: self.total_videos,
            playback_quality: self.playback_quality.clone(),
        });
    }
}
