//! Player-side transport: message schema and the single-client WebSocket

pub mod messages;
pub mod transport;

pub use messages::{Heartbeat, PlayerMessage, PlayerState, ServerMessage};
pub use transport::{PlayerEvent, PlayerTransport};
