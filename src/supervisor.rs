//! Supervisor - component ownership and lifecycle
//!
//! Owns every component handle and the channels between them. The state
//! store and the player transport live for the whole process; the host
//! client, notifier, stream monitor and recovery engine are one disposable
//! set per config version, torn down together through a shared cancellation
//! token and rebuilt on reload.

use crate::config::Config;
use crate::engine::{EngineCommand, PlayerLink, RecoveryEngine};
use crate::error::Result;
use crate::events::EventLog;
use crate::host::{HostClient, StreamMonitor};
use crate::notifier::{self, NotifierHandle};
use crate::player::{PlayerEvent, PlayerTransport};
use crate::status::{SharedStatus, StatusSnapshot};
use crate::store::StateStore;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code a launcher wrapper reads as "restart me"
pub const EXIT_RESTART: i32 = 75;

/// One rebuildable set of components, torn down as a unit
struct ActiveComponents {
    cancel: CancellationToken,
    host: Arc<HostClient>,
    #[allow(dead_code)] // kept so the handle (and its config Arc) lives with the set
    notifier: NotifierHandle,
    status: Arc<SharedStatus>,
}

pub struct Supervisor {
    config_path: PathBuf,
    config: RwLock<Arc<Config>>,
    store: Arc<StateStore>,
    player: Arc<PlayerTransport>,
    event_log: Arc<EventLog>,
    api_token: String,
    started_at: Instant,
    root_cancel: CancellationToken,
    exit_code: AtomicI32,
    /// Current engine mailbox; the player router reads through this so the
    /// open socket survives an engine rebuild
    engine_tx: RwLock<mpsc::Sender<EngineCommand>>,
    active: Mutex<ActiveComponents>,
}

impl Supervisor {
    /// Construct all components and wire the channels
    pub fn new(config_path: PathBuf, config: Config) -> Arc<Self> {
        let config = Arc::new(config);
        let store = StateStore::load(&config.state_file);
        let event_log = Arc::new(EventLog::new());
        let root_cancel = CancellationToken::new();

        // Per-process secret for mutating API calls, generated once at boot.
        let api_token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        let (player_event_tx, player_event_rx) = mpsc::channel::<PlayerEvent>(64);
        let player = PlayerTransport::new(player_event_tx);

        let (active, engine_tx) = build_components(
            &config,
            &store,
            &player,
            &event_log,
            &root_cancel,
        );

        let supervisor = Arc::new(Self {
            config_path,
            config: RwLock::new(config),
            store,
            player,
            event_log,
            api_token,
            started_at: Instant::now(),
            root_cancel,
            exit_code: AtomicI32::new(0),
            engine_tx: RwLock::new(engine_tx),
            active: Mutex::new(active),
        });

        // Player router: the one receiver of transport events, forwarding
        // into whichever engine is current. This is what lets a reload swap
        // the engine underneath an open player socket.
        let router = Arc::clone(&supervisor);
        tokio::spawn(async move {
            router.route_player_events(player_event_rx).await;
        });

        supervisor
    }

    async fn route_player_events(&self, mut rx: mpsc::Receiver<PlayerEvent>) {
        loop {
            tokio::select! {
                _ = self.root_cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let tx = self.engine_tx.read().await.clone();
                    if tx.send(EngineCommand::Player(event)).await.is_err() {
                        warn!("Player event dropped: engine unavailable");
                    }
                }
            }
        }
    }

    /// Re-read the config file and rebuild the disposable component set.
    /// A config that fails to load or validate leaves the old set running.
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = match Config::load(&self.config_path) {
            Ok(config) => Arc::new(config),
            Err(e) => {
                error!("Config reload rejected: {}", e);
                self.event_log.push(format!("Config reload rejected: {e}"));
                return Err(e);
            }
        };

        let mut active = self.active.lock().await;
        active.cancel.cancel();

        let (new_active, engine_tx) = build_components(
            &new_config,
            &self.store,
            &self.player,
            &self.event_log,
            &self.root_cancel,
        );
        *self.engine_tx.write().await = engine_tx;
        *self.config.write().await = new_config;
        *active = new_active;

        info!("Configuration reloaded");
        self.event_log.push("Configuration reloaded");
        Ok(())
    }

    /// Flush state and exit with the restart code for the launcher wrapper
    pub async fn trigger_restart(&self) {
        info!("Restart requested");
        self.event_log.push("Restart requested");
        self.store.flush().await;
        self.exit_code.store(EXIT_RESTART, Ordering::Release);
        self.root_cancel.cancel();
    }

    /// Clean shutdown: flush state, cancel every task
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.store.flush().await;
        self.root_cancel.cancel();
    }

    /// Ask the engine to start recovery now
    pub async fn kick_recovery(&self) {
        let tx = self.engine_tx.read().await.clone();
        let _ = tx.send(EngineCommand::StartRecovery).await;
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    /// The configuration currently live (reloads swap this atomically)
    pub async fn config(&self) -> Arc<Config> {
        Arc::clone(&*self.config.read().await)
    }

    pub fn player(&self) -> Arc<PlayerTransport> {
        Arc::clone(&self.player)
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub async fn host_connected(&self) -> bool {
        self.active.lock().await.host.is_connected()
    }

    pub async fn status_snapshot(&self) -> StatusSnapshot {
        self.active.lock().await.status.snapshot()
    }

    /// Resolves when shutdown or restart has been requested
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFutureOwned {
        self.root_cancel.clone().cancelled_owned()
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }
}

/// Build one disposable component set under a fresh child token
fn build_components(
    config: &Arc<Config>,
    store: &Arc<StateStore>,
    player: &Arc<PlayerTransport>,
    event_log: &Arc<EventLog>,
    root_cancel: &CancellationToken,
) -> (ActiveComponents, mpsc::Sender<EngineCommand>) {
    let cancel = root_cancel.child_token();
    let status = Arc::new(SharedStatus::new());
    let notifier = notifier::spawn(config.notifier.clone(), cancel.clone());

    let (host_event_tx, host_event_rx) = mpsc::channel(32);
    let host = HostClient::new(config.host.clone(), host_event_tx, cancel.clone());

    StreamMonitor::spawn(
        Arc::clone(&host),
        notifier.clone(),
        Arc::clone(event_log),
        Arc::clone(&status),
        config.host.auto_stream,
        host_event_rx,
        cancel.clone(),
    );

    // First connect attempt; failures roll into the back-off schedule.
    let connector = Arc::clone(&host);
    tokio::spawn(async move {
        connector.connect().await;
    });

    let engine_tx = RecoveryEngine::spawn(
        Arc::clone(config),
        Arc::clone(store),
        Arc::clone(player) as Arc<dyn PlayerLink>,
        Arc::clone(&host),
        notifier.clone(),
        Arc::clone(event_log),
        Arc::clone(&status),
        cancel.clone(),
    );

    (ActiveComponents { cancel, host, notifier, status }, engine_tx)
}
