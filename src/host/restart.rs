//! Stream-drop restart and stream health monitoring
//!
//! A self-contained actor, independent of the recovery ladder: it consumes
//! host events, schedules restart attempts with a fixed delay table, and
//! runs a slow health poll as a backstop for drops the event feed missed.
//! Every scheduled attempt re-checks its gates at fire time: state may
//! have moved while the delay ran.

use crate::events::EventLog;
use crate::host::client::{HostClient, HostEvent};
use crate::notifier::NotifierHandle;
use crate::status::SharedStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before restart attempt N (1-based), in seconds
const RESTART_DELAYS_SECS: [u64; 5] = [10, 30, 60, 60, 60];
/// Attempts before the monitor gives up and pages the operator
const MAX_RESTART_ATTEMPTS: u32 = RESTART_DELAYS_SECS.len() as u32;
/// Cadence of the backstop health poll
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct StreamMonitor {
    host: Arc<HostClient>,
    notifier: NotifierHandle,
    event_log: Arc<EventLog>,
    status: Arc<SharedStatus>,
    auto_stream: bool,
    restart_attempts: u32,
    restart_pending: bool,
    /// Invalidates in-flight restart timers
    tick_generation: u64,
    tick_tx: mpsc::Sender<u64>,
}

impl StreamMonitor {
    /// Spawn the monitor task over the host event channel
    pub fn spawn(
        host: Arc<HostClient>,
        notifier: NotifierHandle,
        event_log: Arc<EventLog>,
        status: Arc<SharedStatus>,
        auto_stream: bool,
        host_rx: mpsc::Receiver<HostEvent>,
        cancel: CancellationToken,
    ) {
        let (tick_tx, tick_rx) = mpsc::channel(8);
        let monitor = Self {
            host,
            notifier,
            event_log,
            status,
            auto_stream,
            restart_attempts: 0,
            restart_pending: false,
            tick_generation: 0,
            tick_tx,
        };
        tokio::spawn(monitor.run(host_rx, tick_rx, cancel));
    }

    async fn run(
        mut self,
        mut host_rx: mpsc::Receiver<HostEvent>,
        mut tick_rx: mpsc::Receiver<u64>,
        cancel: CancellationToken,
    ) {
        let mut health_poll = tokio::time::interval(HEALTH_POLL_INTERVAL);
        health_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        health_poll.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = host_rx.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                }
                Some(generation) = tick_rx.recv() => {
                    self.handle_restart_tick(generation).await;
                }
                _ = health_poll.tick() => {
                    self.health_poll().await;
                }
            }
        }
        debug!("Stream monitor stopped");
    }

    async fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Connected => {
                self.event_log.push("Host connected");
                self.notifier.notify_host_reconnect();
            }
            HostEvent::Disconnected => {
                self.event_log.push("Host disconnected");
                self.notifier.notify_host_disconnect();
            }
            HostEvent::StreamStateChanged { active: true } => {
                if self.restart_attempts > 0 {
                    info!("Stream restarted after {} attempt(s)", self.restart_attempts);
                    self.event_log.push(format!(
                        "Stream restarted after {} attempt(s)",
                        self.restart_attempts
                    ));
                    self.notifier.notify_stream_restart(self.restart_attempts);
                }
                self.restart_attempts = 0;
                self.restart_pending = false;
                self.tick_generation += 1;
            }
            HostEvent::StreamStateChanged { active: false } => {
                self.event_log.push("Stream stopped");
                if !self.auto_stream {
                    return;
                }
                if self.restart_pending {
                    debug!("Restart already scheduled, drop event ignored");
                    return;
                }
                if self.restart_attempts >= MAX_RESTART_ATTEMPTS {
                    warn!("Stream restart attempts exhausted");
                    self.event_log.push("Stream restart attempts exhausted");
                    self.notifier.notify_critical(
                        "Stream restart attempts exhausted, manual intervention required",
                    );
                    self.restart_attempts = 0;
                    return;
                }
                self.restart_attempts += 1;
                let attempt = self.restart_attempts;
                let delay =
                    Duration::from_secs(RESTART_DELAYS_SECS[(attempt - 1) as usize]);
                info!(
                    "Stream drop: restart attempt {}/{} in {:?}",
                    attempt, MAX_RESTART_ATTEMPTS, delay
                );
                self.notifier.notify_stream_drop(attempt, MAX_RESTART_ATTEMPTS);
                self.restart_pending = true;
                self.tick_generation += 1;
                let generation = self.tick_generation;
                let tick_tx = self.tick_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tick_tx.send(generation).await;
                });
            }
        }
    }

    /// A scheduled restart attempt came due; gates are checked now, not at
    /// schedule time
    async fn handle_restart_tick(&mut self, generation: u64) {
        if generation != self.tick_generation {
            return; // superseded while the delay ran
        }
        self.restart_pending = false;
        if !self.host.is_connected() {
            debug!("Restart attempt skipped: host not connected");
            return;
        }
        if !self.status.player_healthy() {
            debug!("Restart attempt skipped: player not healthy");
            return;
        }
        if self.host.is_streaming().await {
            debug!("Restart attempt skipped: stream already active");
            return;
        }
        self.event_log.push(format!("Stream restart attempt {}", self.restart_attempts));
        self.host.start_streaming().await;
    }

    /// Backstop poll: catch a stopped stream the event feed never reported
    async fn health_poll(&mut self) {
        if !self.auto_stream
            || !self.host.is_connected()
            || !self.status.player_healthy()
            || self.restart_pending
        {
            return;
        }
        if !self.host.is_streaming().await {
            info!("Health poll found stream stopped, starting");
            self.event_log.push("Health poll: stream stopped, starting");
            self.host.start_streaming().await;
        }
    }
}
