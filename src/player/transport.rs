//! Player socket transport
//!
//! Accepts the player page's WebSocket at `/ws` and bridges it onto the
//! supervisor's event plumbing. Exactly one peer is live at a time: a newer
//! connection replaces the prior one, which is closed. Outbound sends while
//! disconnected are dropped with a warning; recovery re-issues commands on
//! reconnect, so queueing would only replay stale state.

use crate::player::messages::{PlayerMessage, ServerMessage};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Connection lifecycle and inbound traffic, in arrival order
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Connected,
    Disconnected,
    Message(PlayerMessage),
}

struct ClientSlot {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

/// Single-client WebSocket endpoint for the player page
pub struct PlayerTransport {
    event_tx: mpsc::Sender<PlayerEvent>,
    client: Mutex<Option<ClientSlot>>,
    next_client_id: AtomicU64,
}

impl PlayerTransport {
    pub fn new(event_tx: mpsc::Sender<PlayerEvent>) -> Arc<Self> {
        Arc::new(Self { event_tx, client: Mutex::new(None), next_client_id: AtomicU64::new(1) })
    }

    pub fn is_connected(&self) -> bool {
        self.client.lock().expect("client lock poisoned").is_some()
    }

    /// Send a command to the connected player; dropped with a warning when
    /// no player is connected
    pub fn send(&self, msg: &ServerMessage) {
        let payload = match serde_json::to_string(msg) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to encode player command: {}", e);
                return;
            }
        };
        let guard = self.client.lock().expect("client lock poisoned");
        match guard.as_ref() {
            Some(slot) => {
                if slot.tx.send(Message::Text(payload)).is_err() {
                    warn!("Player command dropped: socket closing");
                }
            }
            None => warn!("Player command dropped: no player connected"),
        }
    }

    /// Drive one accepted WebSocket until it closes or is replaced
    ///
    /// Called from the axum upgrade handler.
    pub async fn run_client(self: Arc<Self>, socket: WebSocket) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        let replaced = {
            let mut guard = self.client.lock().expect("client lock poisoned");
            guard.replace(ClientSlot { id, tx: out_tx })
        };
        if let Some(old) = replaced {
            // Dropping the old sender ends its writer loop, which closes the
            // stale socket.
            info!("Player client {} replaced by client {}", old.id, id);
        } else {
            info!("Player client {} connected", id);
        }
        self.emit(PlayerEvent::Connected).await;

        let (mut sink, mut stream) = socket.split();

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<PlayerMessage>(&text) {
                    Ok(msg) => self.emit(PlayerEvent::Message(msg)).await,
                    Err(e) => debug!("Dropping unrecognised player message: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // binary / ping / pong carry nothing here
                Err(e) => {
                    debug!("Player socket read error: {}", e);
                    break;
                }
            }
        }

        writer.abort();

        // Only report a disconnect if this client is still the live one; a
        // replaced client ending must not mask its successor.
        let was_current = {
            let mut guard = self.client.lock().expect("client lock poisoned");
            match guard.as_ref() {
                Some(slot) if slot.id == id => {
                    guard.take();
                    true
                }
                _ => false,
            }
        };
        if was_current {
            info!("Player client {} disconnected", id);
            self.emit(PlayerEvent::Disconnected).await;
        } else {
            debug!("Replaced player client {} finished", id);
        }
    }

    async fn emit(&self, event: PlayerEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!("Player event dropped: supervisor router gone");
        }
    }
}
