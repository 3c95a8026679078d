//! obs-websocket v5 protocol envelope
//!
//! Every frame on the host socket is `{"op": <u8>, "d": {...}}`. The
//! supervisor speaks the small subset it needs: the identify handshake,
//! requests/responses, and the event feed.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Protocol opcodes
pub mod opcode {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

/// RPC version this client implements
pub const RPC_VERSION: u32 = 1;

/// Outer frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    pub d: Value,
}

/// `Hello` payload (op 0)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// `Identify` payload (op 1)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
}

/// `Event` payload (op 5)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Value,
}

/// `Request` payload (op 6)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

/// `RequestResponse` payload (op 7)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub result: bool,
    pub code: i32,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Stream output states carried by `StreamStateChanged`
pub const OUTPUT_STARTED: &str = "OBS_WEBSOCKET_OUTPUT_STARTED";
pub const OUTPUT_STOPPED: &str = "OBS_WEBSOCKET_OUTPUT_STOPPED";

impl Envelope {
    pub fn request(request_type: &str, request_id: String, request_data: Option<Value>) -> Self {
        let d = serde_json::to_value(Request {
            request_type: request_type.to_string(),
            request_id,
            request_data,
        })
        .expect("request payload is always serialisable");
        Self { op: opcode::REQUEST, d }
    }

    pub fn identify(authentication: Option<String>) -> Self {
        let d = serde_json::to_value(Identify { rpc_version: RPC_VERSION, authentication })
            .expect("identify payload is always serialisable");
        Self { op: opcode::IDENTIFY, d }
    }
}

/// Challenge-response auth string:
/// base64(sha256(base64(sha256(password + salt)) + challenge))
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let b64 = base64::engine::general_purpose::STANDARD;
    let secret = b64.encode(Sha256::digest(format!("{password}{salt}")));
    b64.encode(Sha256::digest(format!("{secret}{challenge}")))
}
