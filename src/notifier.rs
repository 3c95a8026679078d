//! Outbound webhook alerting
//!
//! Alerts are advisory: they are batched, debounced and fire-and-forget.
//! Non-error messages sit in a queue behind a 5 s debounce window that each
//! new message extends; an error-level message flushes the whole queue at
//! once, dragging any queued lower-priority messages along. A failed HTTP
//! post is logged and the batch is considered delivered; there is no retry
//! buffer.

use crate::config::NotifierConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Debounce window for non-error alerts
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);
/// Timeout on the webhook POST itself
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Alert severity; order matters (a batch takes its highest level's color)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn color(self) -> u32 {
        match self {
            Level::Info => 3_447_003,
            Level::Warn => 16_776_960,
            Level::Error => 15_158_332,
        }
    }

    fn emoji(self) -> &'static str {
        match self {
            Level::Info => "\u{2139}\u{fe0f}",
            Level::Warn => "\u{26a0}\u{fe0f}",
            Level::Error => "\u{1f6a8}",
        }
    }
}

/// Event kinds with per-kind toggles and templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Error,
    Skip,
    Recovery,
    Critical,
    Resume,
    HostDisconnect,
    HostReconnect,
    StreamDrop,
    StreamRestart,
}

impl Kind {
    /// Config key for toggles and template overrides
    fn key(self) -> &'static str {
        match self {
            Kind::Error => "error",
            Kind::Skip => "skip",
            Kind::Recovery => "recovery",
            Kind::Critical => "critical",
            Kind::Resume => "resume",
            Kind::HostDisconnect => "hostDisconnect",
            Kind::HostReconnect => "hostReconnect",
            Kind::StreamDrop => "streamDrop",
            Kind::StreamRestart => "streamRestart",
        }
    }

    fn level(self) -> Level {
        match self {
            Kind::Critical => Level::Error,
            Kind::Error
            | Kind::Skip
            | Kind::Recovery
            | Kind::HostDisconnect
            | Kind::StreamDrop => Level::Warn,
            Kind::Resume | Kind::HostReconnect | Kind::StreamRestart => Level::Info,
        }
    }

    fn default_template(self) -> &'static str {
        match self {
            Kind::Error => "Playback error {errorCode} on video {videoIndex} ({videoId})",
            Kind::Skip => "Skipped video {videoIndex} ({videoId}): {reason}",
            Kind::Recovery => "Recovery started: {reason}",
            Kind::Critical => "CRITICAL: {message}",
            Kind::Resume => "Playback recovered on video {videoIndex} ({videoId})",
            Kind::HostDisconnect => "Lost connection to the streaming host",
            Kind::HostReconnect => "Reconnected to the streaming host",
            Kind::StreamDrop => "Stream dropped, restart attempt {attempt}/{max} scheduled",
            Kind::StreamRestart => "Stream restarted after {attempts} attempt(s)",
        }
    }
}

/// Render a template, substituting `{placeholder}` tokens from `fields`.
/// Unknown placeholders stay literal.
fn render(template: &str, fields: &HashMap<&'static str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in fields {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// A rendered alert waiting in the dispatch queue
#[derive(Debug)]
pub struct Alert {
    pub content: String,
    pub level: Level,
}

/// Cheap handle; all methods enqueue onto the notifier task
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::UnboundedSender<Alert>,
    config: std::sync::Arc<NotifierConfig>,
}

impl NotifierHandle {
    /// Handle whose alerts land on the returned receiver instead of the
    /// webhook dispatcher. Tests observe rendered alerts through this.
    pub fn detached(config: NotifierConfig) -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, config: std::sync::Arc::new(config) }, rx)
    }

    fn enqueue(&self, kind: Kind, fields: HashMap<&'static str, String>) {
        if !self.config.events.get(kind.key()).copied().unwrap_or(true) {
            debug!("Alert kind '{}' disabled, dropped", kind.key());
            return;
        }
        let template = self
            .config
            .templates
            .get(kind.key())
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_template());
        let alert = Alert { content: render(template, &fields), level: kind.level() };
        if self.tx.send(alert).is_err() {
            debug!("Alert dropped: notifier task gone");
        }
    }

    pub fn notify_error(&self, error_code: i32, video_index: usize, video_id: &str) {
        self.enqueue(
            Kind::Error,
            HashMap::from([
                ("errorCode", error_code.to_string()),
                ("videoIndex", video_index.to_string()),
                ("videoId", video_id.to_string()),
            ]),
        );
    }

    pub fn notify_skip(&self, video_index: usize, video_id: &str, reason: &str) {
        self.enqueue(
            Kind::Skip,
            HashMap::from([
                ("videoIndex", video_index.to_string()),
                ("videoId", video_id.to_string()),
                ("reason", reason.to_string()),
            ]),
        );
    }

    pub fn notify_recovery(&self, reason: &str) {
        self.enqueue(Kind::Recovery, HashMap::from([("reason", reason.to_string())]));
    }

    pub fn notify_critical(&self, message: &str) {
        self.enqueue(Kind::Critical, HashMap::from([("message", message.to_string())]));
    }

    pub fn notify_resume(&self, video_index: usize, video_id: &str) {
        self.enqueue(
            Kind::Resume,
            HashMap::from([
                ("videoIndex", video_index.to_string()),
                ("videoId", video_id.to_string()),
            ]),
        );
    }

    pub fn notify_host_disconnect(&self) {
        self.enqueue(Kind::HostDisconnect, HashMap::new());
    }

    pub fn notify_host_reconnect(&self) {
        self.enqueue(Kind::HostReconnect, HashMap::new());
    }

    pub fn notify_stream_drop(&self, attempt: u32, max: u32) {
        self.enqueue(
            Kind::StreamDrop,
            HashMap::from([("attempt", attempt.to_string()), ("max", max.to_string())]),
        );
    }

    pub fn notify_stream_restart(&self, attempts: u32) {
        self.enqueue(Kind::StreamRestart, HashMap::from([("attempts", attempts.to_string())]));
    }
}

#[derive(Serialize)]
struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<String>,
    embeds: Vec<Embed>,
}

#[derive(Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
    footer: Footer,
}

#[derive(Serialize)]
struct Footer {
    text: String,
}

/// Spawn the notifier task; returns the enqueue handle
pub fn spawn(config: NotifierConfig, cancel: CancellationToken) -> NotifierHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = std::sync::Arc::new(config);
    let handle = NotifierHandle { tx, config: std::sync::Arc::clone(&config) };
    tokio::spawn(run(config, rx, cancel));
    handle
}

async fn run(
    config: std::sync::Arc<NotifierConfig>,
    mut rx: mpsc::UnboundedReceiver<Alert>,
    cancel: CancellationToken,
) {
    let client = reqwest::Client::builder()
        .timeout(DISPATCH_TIMEOUT)
        .build()
        .unwrap_or_default();
    let mut queue: Vec<Alert> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        // Copy the deadline out so the sleep future does not borrow it
        // across the arm that reassigns it.
        let wake = deadline;
        tokio::select! {
            _ = cancel.cancelled() => break,
            alert = rx.recv() => {
                let Some(alert) = alert else { break };
                let level = alert.level;
                queue.push(alert);
                if level == Level::Error {
                    deadline = None;
                    flush(&client, &config, &mut queue).await;
                } else {
                    // Start or extend the single debounce window.
                    deadline = Some(Instant::now() + DEBOUNCE_WINDOW);
                }
            }
            _ = async move {
                match wake {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                deadline = None;
                flush(&client, &config, &mut queue).await;
            }
        }
    }

    // Best-effort final flush so shutdown alerts are not silently lost.
    if !queue.is_empty() {
        flush(&client, &config, &mut queue).await;
    }
}

/// Drain the queue into a single outbound payload
async fn flush(client: &reqwest::Client, config: &NotifierConfig, queue: &mut Vec<Alert>) {
    if queue.is_empty() {
        return;
    }
    if config.webhook_url.is_empty() {
        queue.clear();
        return;
    }

    let alerts = std::mem::take(queue);
    let highest = alerts.iter().map(|a| a.level).max().unwrap_or(Level::Info);
    let description =
        alerts.iter().map(|a| a.content.as_str()).collect::<Vec<_>>().join("\n");
    let footer_text = if alerts.len() > 1 {
        format!("{} events", alerts.len())
    } else {
        "castwatch".to_string()
    };

    let content = (highest == Level::Error && !config.role_mention.is_empty())
        .then(|| config.role_mention.clone());
    let payload = WebhookPayload {
        content,
        username: (!config.username.is_empty()).then(|| config.username.clone()),
        avatar_url: (!config.avatar_url.is_empty()).then(|| config.avatar_url.clone()),
        embeds: vec![Embed {
            title: format!("{} castwatch", highest.emoji()),
            description,
            color: highest.color(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            footer: Footer { text: footer_text },
        }],
    };

    match client.post(&config.webhook_url).json(&payload).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!("Webhook delivered ({} alerts)", alerts.len())
        }
        Ok(resp) => warn!("Webhook rejected: HTTP {}", resp.status()),
        Err(e) => warn!("Webhook dispatch failed: {}", e),
    }
}
