//! Streaming-host control client
//!
//! Wraps the obs-websocket control socket behind a resilient handle. The
//! connection is driven by a writer task (requests in, via mpsc) and a
//! reader task (responses matched to oneshot responders by request id,
//! unsolicited events forwarded on the host event channel).
//!
//! Every public operation returns a plain `bool`/`Option`; host faults are
//! logged and absorbed here, because callers (the recovery ladder, the
//! stream monitor) proceed on their own schedule regardless.

use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::host::launch;
use crate::host::protocol::{
    self, opcode, AuthChallenge, Envelope, EventPayload, Hello, RequestResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-request timeout on the host socket
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout covering TCP connect plus the identify handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Reconnect back-off bounds
const RECONNECT_INITIAL_MS: u64 = 5_000;
const RECONNECT_CAP_MS: u64 = 30_000;
/// Consecutive reconnect failures before a host launch is considered
const LAUNCH_AFTER_FAILURES: u32 = 2;

/// Host-originated events, consumed by the stream monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Connected,
    Disconnected,
    /// Stream output started (`active = true`) or stopped
    StreamStateChanged { active: bool },
}

struct OutboundRequest {
    id: String,
    payload: String,
    reply: oneshot::Sender<Result<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

struct ConnHandle {
    req_tx: mpsc::Sender<OutboundRequest>,
    pending: PendingMap,
}

/// Resilient RPC wrapper around the streaming host's control socket
pub struct HostClient {
    config: HostConfig,
    event_tx: mpsc::Sender<HostEvent>,
    cancel: CancellationToken,
    /// Self-handle for the io and reconnect tasks this client spawns
    weak: Weak<HostClient>,
    conn: Mutex<Option<ConnHandle>>,
    connected: AtomicBool,
    failed_reconnects: AtomicU32,
    reconnect_delay_ms: AtomicU64,
    reconnect_pending: AtomicBool,
    /// At most one host launch per disconnect cycle
    host_launched: AtomicBool,
    next_request_id: AtomicU64,
}

impl HostClient {
    pub fn new(
        config: HostConfig,
        event_tx: mpsc::Sender<HostEvent>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            event_tx,
            cancel,
            weak: weak.clone(),
            conn: Mutex::new(None),
            connected: AtomicBool::new(false),
            failed_reconnects: AtomicU32::new(0),
            reconnect_delay_ms: AtomicU64::new(RECONNECT_INITIAL_MS),
            reconnect_pending: AtomicBool::new(false),
            host_launched: AtomicBool::new(false),
            next_request_id: AtomicU64::new(1),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn failed_reconnects(&self) -> u32 {
        self.failed_reconnects.load(Ordering::Relaxed)
    }

    /// Establish the control socket; idempotent. A failure schedules a
    /// back-off reconnect and optionally launches the host process.
    pub async fn connect(&self) -> bool {
        if self.cancel.is_cancelled() || self.is_connected() {
            return self.is_connected();
        }
        match tokio::time::timeout(CONNECT_TIMEOUT, self.establish()).await {
            Ok(Ok(())) => {
                self.connected.store(true, Ordering::Release);
                self.failed_reconnects.store(0, Ordering::Relaxed);
                self.reconnect_delay_ms.store(RECONNECT_INITIAL_MS, Ordering::Relaxed);
                self.host_launched.store(false, Ordering::Relaxed);
                info!("Host control socket connected: {}", self.config.url);
                self.emit(HostEvent::Connected).await;
                true
            }
            outcome => {
                let reason = match outcome {
                    Ok(Err(e)) => e.to_string(),
                    _ => "handshake timed out".to_string(),
                };
                let failures = self.failed_reconnects.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Host connect failed ({} consecutive): {}", failures, reason);
                self.maybe_launch_host(failures);
                self.schedule_reconnect();
                false
            }
        }
    }

    /// TCP connect + identify handshake + io task installation
    async fn establish(&self) -> Result<()> {
        let (stream, _) = tokio_tungstenite::connect_async(self.config.url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        // Hello → Identify → Identified
        let hello = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    let env: Envelope = serde_json::from_str(&text)?;
                    if env.op == opcode::HELLO {
                        break serde_json::from_value::<Hello>(env.d)?;
                    }
                    debug!("Ignoring pre-identify frame op={}", env.op);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(Error::HostSocket("closed during handshake".to_string())),
            }
        };

        let auth = match hello.authentication {
            Some(AuthChallenge { challenge, salt }) => {
                if self.config.password.is_empty() {
                    return Err(Error::HostSocket(
                        "host requires authentication but no password is configured".to_string(),
                    ));
                }
                Some(protocol::auth_response(&self.config.password, &salt, &challenge))
            }
            None => None,
        };
        let identify = serde_json::to_string(&Envelope::identify(auth))?;
        sink.send(Message::Text(identify)).await?;

        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    let env: Envelope = serde_json::from_str(&text)?;
                    if env.op == opcode::IDENTIFIED {
                        break;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(Error::HostSocket("closed before identify completed".to_string()))
                }
            }
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (req_tx, mut req_rx) = mpsc::channel::<OutboundRequest>(32);

        *self.conn.lock().expect("conn lock poisoned") =
            Some(ConnHandle { req_tx, pending: Arc::clone(&pending) });

        // Writer: register the responder, then put the frame on the wire.
        let writer_pending = Arc::clone(&pending);
        let writer_cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    req = req_rx.recv() => {
                        let Some(req) = req else { break };
                        writer_pending
                            .lock()
                            .expect("pending lock poisoned")
                            .insert(req.id.clone(), req.reply);
                        if let Err(e) = sink.send(Message::Text(req.payload)).await {
                            debug!("Host socket write failed: {}", e);
                            if let Some(reply) = writer_pending
                                .lock()
                                .expect("pending lock poisoned")
                                .remove(&req.id)
                            {
                                let _ = reply.send(Err(Error::HostSocket(e.to_string())));
                            }
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        // Reader: resolve responses, forward events, detect socket death.
        let Some(client) = self.weak.upgrade() else {
            return Err(Error::Shutdown);
        };
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = client.cancel.cancelled() => break,
                    frame = source.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => client.handle_frame(&text, &pending).await,
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                debug!("Host socket read error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            client.on_socket_lost().await;
        });

        Ok(())
    }

    async fn handle_frame(&self, text: &str, pending: &PendingMap) {
        let env: Envelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                debug!("Unparsable host frame dropped: {}", e);
                return;
            }
        };
        match env.op {
            opcode::REQUEST_RESPONSE => {
                let resp: RequestResponse = match serde_json::from_value(env.d) {
                    Ok(resp) => resp,
                    Err(e) => {
                        debug!("Malformed host response dropped: {}", e);
                        return;
                    }
                };
                let reply =
                    pending.lock().expect("pending lock poisoned").remove(&resp.request_id);
                if let Some(reply) = reply {
                    let outcome = if resp.request_status.result {
                        Ok(resp.response_data)
                    } else {
                        Err(Error::HostRequest {
                            request: resp.request_type,
                            message: resp
                                .request_status
                                .comment
                                .unwrap_or_else(|| format!("code {}", resp.request_status.code)),
                        })
                    };
                    let _ = reply.send(outcome);
                }
            }
            opcode::EVENT => {
                let event: EventPayload = match serde_json::from_value(env.d) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!("Malformed host event dropped: {}", e);
                        return;
                    }
                };
                if event.event_type == "StreamStateChanged" {
                    match event.event_data["outputState"].as_str() {
                        Some(protocol::OUTPUT_STARTED) => {
                            self.emit(HostEvent::StreamStateChanged { active: true }).await
                        }
                        Some(protocol::OUTPUT_STOPPED) => {
                            self.emit(HostEvent::StreamStateChanged { active: false }).await
                        }
                        _ => {} // STARTING / STOPPING are transitional
                    }
                }
            }
            other => debug!("Unhandled host opcode {}", other),
        }
    }

    async fn on_socket_lost(&self) {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        if let Some(conn) = self.conn.lock().expect("conn lock poisoned").take() {
            // Fail every in-flight request.
            conn.pending.lock().expect("pending lock poisoned").clear();
        }
        if self.cancel.is_cancelled() {
            return;
        }
        if was_connected {
            warn!("Host control socket lost");
            self.emit(HostEvent::Disconnected).await;
        }
        self.schedule_reconnect();
    }

    /// Single-shot reconnect timer; repeated calls coalesce
    fn schedule_reconnect(&self) {
        if self.cancel.is_cancelled() || self.reconnect_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let delay = self.reconnect_delay_ms.load(Ordering::Relaxed);
        self.reconnect_delay_ms.store(next_backoff(delay), Ordering::Relaxed);
        debug!("Host reconnect in {}ms", delay);
        let Some(client) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = client.cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {
                    client.reconnect_pending.store(false, Ordering::Release);
                    client.connect().await;
                }
            }
        });
    }

    fn maybe_launch_host(&self, failures: u32) {
        if failures < LAUNCH_AFTER_FAILURES
            || !self.config.auto_restart
            || self.config.executable.is_empty()
            || self.host_launched.swap(true, Ordering::AcqRel)
        {
            return;
        }
        let config = self.config.clone();
        tokio::spawn(async move {
            match launch::launch_host(&config).await {
                Ok(true) => info!("Host process launched"),
                Ok(false) => debug!("Host process already running, launch skipped"),
                Err(e) => warn!("Host launch failed: {}", e),
            }
        });
    }

    /// Issue one request and await its response
    async fn request(&self, request_type: &str, data: Option<Value>) -> Result<Value> {
        let (req_tx, pending) = {
            let guard = self.conn.lock().expect("conn lock poisoned");
            match guard.as_ref() {
                Some(conn) => (conn.req_tx.clone(), Arc::clone(&conn.pending)),
                None => return Err(Error::HostSocket("not connected".to_string())),
            }
        };
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed).to_string();
        let payload = serde_json::to_string(&Envelope::request(request_type, id.clone(), data))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        req_tx
            .send(OutboundRequest { id: id.clone(), payload, reply: reply_tx })
            .await
            .map_err(|_| Error::HostSocket("writer task gone".to_string()))?;

        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::HostSocket("connection dropped mid-request".to_string())),
            Err(_) => {
                pending.lock().expect("pending lock poisoned").remove(&id);
                Err(Error::HostRequest {
                    request: request_type.to_string(),
                    message: "timed out".to_string(),
                })
            }
        }
    }

    /// Force the browser source to reload by cache-busting its URL
    pub async fn refresh_browser_source(&self) -> bool {
        let name = &self.config.source_name;
        let settings = match self
            .request("GetInputSettings", Some(json!({ "inputName": name })))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!("Browser source refresh failed: {}", e);
                return false;
            }
        };
        let Some(url) = settings["inputSettings"]["url"].as_str() else {
            warn!("Browser source '{}' has no url setting", name);
            return false;
        };
        let busted = cache_bust(url, chrono::Utc::now().timestamp_millis());
        match self
            .request(
                "SetInputSettings",
                Some(json!({
                    "inputName": name,
                    "inputSettings": { "url": busted },
                    "overlay": true,
                })),
            )
            .await
        {
            Ok(_) => {
                info!("Browser source '{}' refreshed", name);
                true
            }
            Err(e) => {
                warn!("Browser source refresh failed: {}", e);
                false
            }
        }
    }

    /// Blink the browser source: disable, wait a second, enable
    pub async fn toggle_browser_source(&self) -> bool {
        let Some((scene, item_id)) = self.find_source_in_program_scene().await else {
            return false;
        };
        if !self.set_scene_item_enabled(&scene, item_id, false).await {
            return false;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        let ok = self.set_scene_item_enabled(&scene, item_id, true).await;
        if ok {
            info!("Browser source toggled in scene '{}'", scene);
        }
        ok
    }

    async fn set_scene_item_enabled(&self, scene: &str, item_id: i64, enabled: bool) -> bool {
        match self
            .request(
                "SetSceneItemEnabled",
                Some(json!({
                    "sceneName": scene,
                    "sceneItemId": item_id,
                    "sceneItemEnabled": enabled,
                })),
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("SetSceneItemEnabled({}) failed: {}", enabled, e);
                false
            }
        }
    }

    /// Locate the configured browser source in the current program scene
    async fn find_source_in_program_scene(&self) -> Option<(String, i64)> {
        let scene = match self.request("GetCurrentProgramScene", None).await {
            Ok(v) => v["currentProgramSceneName"].as_str()?.to_string(),
            Err(e) => {
                warn!("GetCurrentProgramScene failed: {}", e);
                return None;
            }
        };
        let items = match self
            .request("GetSceneItemList", Some(json!({ "sceneName": scene })))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!("GetSceneItemList failed: {}", e);
                return None;
            }
        };
        let item_id = items["sceneItems"].as_array().and_then(|items| {
            items.iter().find_map(|item| {
                (item["sourceName"].as_str() == Some(self.config.source_name.as_str()))
                    .then(|| item["sceneItemId"].as_i64())
                    .flatten()
            })
        });
        match item_id {
            Some(id) => Some((scene, id)),
            None => {
                warn!("Source '{}' not present in scene '{}'", self.config.source_name, scene);
                None
            }
        }
    }

    /// Query the stream output state; any failure reads as not streaming
    pub async fn is_streaming(&self) -> bool {
        match self.request("GetStreamStatus", None).await {
            Ok(v) => v["outputActive"].as_bool().unwrap_or(false),
            Err(e) => {
                debug!("GetStreamStatus failed: {}", e);
                false
            }
        }
    }

    /// Start the stream after verifying it is safe to do so
    pub async fn start_streaming(&self) -> bool {
        if self.is_streaming().await {
            debug!("Stream already active, start skipped");
            return false;
        }
        let Some((scene, item_id)) = self.find_source_in_program_scene().await else {
            return false;
        };
        let enabled = match self
            .request(
                "GetSceneItemEnabled",
                Some(json!({ "sceneName": scene, "sceneItemId": item_id })),
            )
            .await
        {
            Ok(v) => v["sceneItemEnabled"].as_bool().unwrap_or(false),
            Err(e) => {
                warn!("GetSceneItemEnabled failed: {}", e);
                return false;
            }
        };
        if !enabled {
            warn!("Source '{}' is disabled in scene '{}', not starting stream", self.config.source_name, scene);
            return false;
        }
        match self.request("StartStream", None).await {
            Ok(_) => {
                info!("Stream start issued");
                true
            }
            Err(e) => {
                warn!("StartStream failed: {}", e);
                false
            }
        }
    }

    pub async fn stop_streaming(&self) -> bool {
        match self.request("StopStream", None).await {
            Ok(_) => {
                info!("Stream stop issued");
                true
            }
            Err(e) => {
                warn!("StopStream failed: {}", e);
                false
            }
        }
    }

    async fn emit(&self, event: HostEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Host event dropped: monitor gone");
        }
    }
}

/// Exponential back-off step: ×1.5 up to the cap
fn next_backoff(delay_ms: u64) -> u64 {
    ((delay_ms as f64 * 1.5) as u64).min(RECONNECT_CAP_MS)
}

/// Replace any `_cb=<digits>` query parameter with a fresh epoch stamp
fn cache_bust(url: &str, epoch_ms: i64) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, query),
        None => (url, ""),
    };
    let mut params: Vec<&str> = query
        .split('&')
        .filter(|p| {
            !p.is_empty()
                && !p
                    .strip_prefix("_cb=")
                    .is_some_and(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
        })
        .collect();
    let stamp = format!("_cb={epoch_ms}");
    params.push(&stamp);
    format!("{}?{}", base, params.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_progression_multiplies_to_the_cap() {
        let mut delay = RECONNECT_INITIAL_MS;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(delay);
            delay = next_backoff(delay);
        }
        assert_eq!(&seen[..4], &[5_000, 7_500, 11_250, 16_875]);
        assert_eq!(*seen.last().unwrap(), 30_000);
        assert_eq!(next_backoff(30_000), 30_000, "capped");
    }

    #[test]
    fn cache_bust_appends_to_bare_url() {
        assert_eq!(cache_bust("http://h/page", 1234), "http://h/page?_cb=1234");
    }

    #[test]
    fn cache_bust_preserves_other_params() {
        assert_eq!(
            cache_bust("http://h/page?a=1&b=2", 99),
            "http://h/page?a=1&b=2&_cb=99"
        );
    }

    #[test]
    fn cache_bust_replaces_existing_stamp() {
        assert_eq!(
            cache_bust("http://h/page?_cb=1111&a=1", 2222),
            "http://h/page?a=1&_cb=2222"
        );
        assert_eq!(cache_bust("http://h/page?_cb=1111", 2222), "http://h/page?_cb=2222");
    }

    #[test]
    fn cache_bust_leaves_non_numeric_cb_alone() {
        // A `_cb` that is not all digits is someone else's parameter.
        assert_eq!(
            cache_bust("http://h/page?_cb=abc", 7),
            "http://h/page?_cb=abc&_cb=7"
        );
    }

    #[tokio::test]
    async fn request_without_connection_fails_fast() {
        let (event_tx, _event_rx) = mpsc::channel(8);
        let client = HostClient::new(HostConfig::default(), event_tx, CancellationToken::new());
        assert!(!client.is_connected());
        assert!(client.request("GetStreamStatus", None).await.is_err());
        assert!(!client.is_streaming().await);
    }
}
