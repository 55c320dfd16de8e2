use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// Browsers answer pings automatically, so a silent client for this long
/// is treated as gone.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings to the client.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Maximum message size in bytes (64 MiB).
///
/// Uploads arrive base64-encoded inside a single text message, which
/// inflates the payload by a third.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default WebSocket port of the bridge.
pub const DEFAULT_WS_PORT: u16 = 8765;

/// Default serial baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Control-channel message type identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from the client
    #[serde(rename = "check_connection")]
    CheckConnection,
    #[serde(rename = "file_upload")]
    FileUpload,
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "abort_upload")]
    AbortUpload,
    #[serde(rename = "estimate_transfer")]
    EstimateTransfer,

    // Responses and events from the bridge
    #[serde(rename = "connection_status")]
    ConnectionStatus,
    #[serde(rename = "upload_success")]
    UploadSuccess,
    #[serde(rename = "upload_progress")]
    UploadProgress,
    #[serde(rename = "upload_aborted")]
    UploadAborted,
    #[serde(rename = "ack")]
    Ack,
    #[serde(rename = "transfer_estimate")]
    TransferEstimate,
    #[serde(rename = "error")]
    Error,

    /// Missing or unrecognized `type` values land here.
    #[default]
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Maps a wire `type` string to its message type.
    pub fn from_wire(name: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(name.to_owned()))
            .unwrap_or(MessageType::Unknown)
    }
}
