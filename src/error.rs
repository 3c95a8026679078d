//! Error types for castwatch
//!
//! Defines the crate-wide error type using thiserror. Component boundaries
//! deliberately do not propagate most of these: host RPC faults, notifier
//! faults and persistence faults are logged where they occur and surface as
//! event-log entries, not as Results crossing component lines.

use thiserror::Error;

/// Main error type for castwatch
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors (bind failure is the only fatal one)
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Host control socket errors
    #[error("Host socket error: {0}")]
    HostSocket(String),

    /// Host RPC request failed or timed out
    #[error("Host request '{request}' failed: {message}")]
    HostRequest { request: String, message: String },

    /// Player socket errors
    #[error("Player socket error: {0}")]
    PlayerSocket(String),

    /// State file persistence errors
    #[error("State persistence error: {0}")]
    Persistence(String),

    /// Webhook dispatch errors
    #[error("Webhook error: {0}")]
    Webhook(String),

    /// Component is shutting down; the operation was abandoned
    #[error("Shutting down")]
    Shutdown,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convenience Result type using the castwatch Error
pub type Result<T> = std::result::Result<T, Error>;
