//! Shared test infrastructure: a recording player link, an engine harness,
//! a webhook capture server and a scripted host socket.
#![allow(dead_code)] // each test binary uses its own subset of the helpers

use castwatch::config::{Config, PlaylistEntry};
use castwatch::engine::{EngineCommand, PlayerLink, RecoveryEngine};
use castwatch::events::EventLog;
use castwatch::host::HostClient;
use castwatch::notifier::{Alert, NotifierHandle};
use castwatch::player::ServerMessage;
use castwatch::status::SharedStatus;
use castwatch::store::StateStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Player link that records outbound commands instead of owning a socket
pub struct FakePlayer {
    sent: Mutex<Vec<ServerMessage>>,
    connected: AtomicBool,
}

impl FakePlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()), connected: AtomicBool::new(true) })
    }

    pub fn sent(&self) -> Vec<ServerMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    #[allow(dead_code)]
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

impl PlayerLink for FakePlayer {
    fn send(&self, msg: &ServerMessage) {
        self.sent.lock().unwrap().push(msg.clone());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Minimal valid config over the given playlist ids
pub fn test_config(playlist_ids: &[&str]) -> Config {
    let mut config = Config::default();
    config.playlists = playlist_ids
        .iter()
        .map(|id| PlaylistEntry { id: id.to_string(), name: None })
        .collect();
    config
}

/// A spawned engine plus every observation point the tests need
pub struct EngineHarness {
    pub tx: mpsc::Sender<EngineCommand>,
    pub player: Arc<FakePlayer>,
    pub alerts: mpsc::UnboundedReceiver<Alert>,
    pub event_log: Arc<EventLog>,
    pub store: Arc<StateStore>,
    pub status: Arc<SharedStatus>,
    pub cancel: CancellationToken,
    pub state_path: std::path::PathBuf,
    _tmp: tempfile::TempDir,
}

impl EngineHarness {
    /// Let the engine task chew through everything queued so far
    pub async fn settle(&self) {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    pub async fn send(&self, cmd: EngineCommand) {
        self.tx.send(cmd).await.expect("engine mailbox closed");
        self.settle().await;
    }

    pub fn log_messages(&self) -> Vec<String> {
        self.event_log.snapshot().into_iter().map(|e| e.message).collect()
    }

    pub fn drain_alerts(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(alert) = self.alerts.try_recv() {
            out.push(alert.content);
        }
        out
    }
}

/// Spawn an engine over a fake player, a disconnected host and a detached
/// notifier. `initial_state` seeds the state file before the store loads.
pub fn spawn_engine(config: Config, initial_state: Option<Value>) -> EngineHarness {
    let tmp = tempfile::TempDir::new().expect("tempdir");
    let state_path = tmp.path().join("state.json");
    if let Some(state) = initial_state {
        std::fs::write(&state_path, serde_json::to_string_pretty(&state).unwrap()).unwrap();
    }

    let config = Arc::new(config);
    let store = StateStore::load(&state_path);
    let player = FakePlayer::new();
    let event_log = Arc::new(EventLog::new());
    let status = Arc::new(SharedStatus::new());
    let cancel = CancellationToken::new();
    let (notifier, alerts) = NotifierHandle::detached(config.notifier.clone());

    // Never connected: host calls fail fast and the ladder carries on,
    // which is exactly the behavior under test.
    let (host_event_tx, _host_event_rx) = mpsc::channel(8);
    let host = HostClient::new(config.host.clone(), host_event_tx, cancel.clone());

    let tx = RecoveryEngine::spawn(
        Arc::clone(&config),
        Arc::clone(&store),
        player.clone(),
        host,
        notifier,
        Arc::clone(&event_log),
        Arc::clone(&status),
        cancel.clone(),
    );

    EngineHarness {
        tx,
        player,
        alerts,
        event_log,
        store,
        status,
        cancel,
        state_path,
        _tmp: tmp,
    }
}

/// Local webhook endpoint capturing every POSTed JSON body
pub async fn spawn_webhook_capture() -> (String, Arc<Mutex<Vec<Value>>>) {
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

    let captured: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route(
            "/hook",
            post(|State(captured): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                captured.lock().unwrap().push(body);
                StatusCode::NO_CONTENT
            }),
        )
        .with_state(Arc::clone(&captured));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), captured)
}

/// Scripted obs-websocket peer: performs the identify handshake, records
/// requests, answers them through the supplied responder, and can push
/// events to the connected client.
pub struct FakeObsHost {
    pub url: String,
    pub requests: Arc<Mutex<Vec<Value>>>,
    event_tx: mpsc::UnboundedSender<String>,
}

pub type Responder = Arc<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

impl FakeObsHost {
    pub async fn spawn(responder: Responder) -> Self {
        Self::spawn_with_auth(responder, None).await
    }

    /// `auth` is the (challenge, salt) pair advertised in Hello
    pub async fn spawn_with_auth(responder: Responder, auth: Option<(String, String)>) -> Self {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let hello = match &auth {
                Some((challenge, salt)) => json!({
                    "op": 0,
                    "d": {
                        "obsWebSocketVersion": "5.4.2",
                        "rpcVersion": 1,
                        "authentication": { "challenge": challenge, "salt": salt },
                    }
                }),
                None => json!({
                    "op": 0,
                    "d": { "obsWebSocketVersion": "5.4.2", "rpcVersion": 1 }
                }),
            };
            ws.send(Message::Text(hello.to_string())).await.unwrap();

            loop {
                tokio::select! {
                    frame = ws.next() => {
                        let Some(Ok(Message::Text(text))) = frame else { break };
                        let frame: Value = serde_json::from_str(&text).unwrap();
                        match frame["op"].as_u64() {
                            Some(1) => {
                                recorded.lock().unwrap().push(frame["d"].clone());
                                let identified = json!({ "op": 2, "d": { "negotiatedRpcVersion": 1 } });
                                ws.send(Message::Text(identified.to_string())).await.unwrap();
                            }
                            Some(6) => {
                                let d = &frame["d"];
                                recorded.lock().unwrap().push(d.clone());
                                let request_type = d["requestType"].as_str().unwrap_or("");
                                let data = d.get("requestData").cloned().unwrap_or(Value::Null);
                                let response = match responder(request_type, &data) {
                                    Some(response_data) => json!({
                                        "op": 7,
                                        "d": {
                                            "requestType": request_type,
                                            "requestId": d["requestId"],
                                            "requestStatus": { "result": true, "code": 100 },
                                            "responseData": response_data,
                                        }
                                    }),
                                    None => json!({
                                        "op": 7,
                                        "d": {
                                            "requestType": request_type,
                                            "requestId": d["requestId"],
                                            "requestStatus": { "result": false, "code": 600, "comment": "scripted failure" },
                                        }
                                    }),
                                };
                                ws.send(Message::Text(response.to_string())).await.unwrap();
                            }
                            _ => {}
                        }
                    }
                    event = event_rx.recv() => {
                        let Some(event) = event else { break };
                        if ws.send(Message::Text(event)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { url: format!("ws://{addr}"), requests, event_tx }
    }

    /// Push an op-5 event frame to the connected client
    pub fn push_event(&self, event_type: &str, event_data: Value) {
        let frame = json!({
            "op": 5,
            "d": { "eventType": event_type, "eventIntent": 1, "eventData": event_data }
        });
        self.event_tx.send(frame.to_string()).unwrap();
    }

    pub fn recorded(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}
