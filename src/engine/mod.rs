//! Recovery engine
//!
//! **Module structure:**
//! - `core.rs`: engine struct, mailbox loop, connect/disconnect, watchdog
//! - `handlers.rs`: heartbeat, state-change, playlist-loaded, error handlers
//! - `recovery.rs`: the escalation ladder and its timers
//! - `sequencer.rs`: video skip and playlist advance
//!
//! All engine state lives on one task; everything reaches it through the
//! mailbox, including the engine's own timers (generation-tagged so a
//! cancelled timer firing late is a no-op).

mod core;
mod handlers;
mod recovery;
mod sequencer;

pub use core::{EngineCommand, PlayerLink, RecoveryEngine};
pub use recovery::RecoveryStep;
