use serde::{Deserialize, Serialize};

use crate::constants::MessageType;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of a `file_upload` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileUploadRequest {
    pub filename: String,
    /// Size reported by the client; informational only.
    #[serde(default)]
    pub size: Option<u64>,
    /// Base64 file contents, optionally as a `data:` URL.
    pub data: String,
}

/// Body of a `raw` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRequest {
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RawRequest {
    /// Bytes to put on the wire.
    ///
    /// Strings are sent as their UTF-8 bytes; any other JSON value is
    /// sent as its compact JSON text.
    pub fn payload(&self) -> Vec<u8> {
        match &self.data {
            serde_json::Value::String(s) => s.as_bytes().to_vec(),
            serde_json::Value::Null => Vec::new(),
            other => other.to_string().into_bytes(),
        }
    }
}

/// Body of an `estimate_transfer` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EstimateTransferRequest {
    pub size: u64,
    #[serde(default)]
    pub baud: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Reachability of the serial device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud: Option<u32>,
}

impl ConnectionState {
    pub fn connected(port: impl Into<String>, baud: u32) -> Self {
        Self {
            connected: true,
            reason: None,
            port: Some(port.into()),
            baud: Some(baud),
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self {
            connected: false,
            reason: Some(reason.into()),
            port: None,
            baud: None,
        }
    }
}

/// Per-chunk progress of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub filename: String,
    pub sequence: u16,
    pub total_chunks: u32,
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

/// Estimated time to push a file over the serial link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEstimate {
    pub file_size: u64,
    pub baud: u32,
    pub chunks: u64,
    pub overhead_bytes: u64,
    pub wire_bytes: u64,
    pub raw_transfer_secs: f64,
    pub processing_secs: f64,
    pub total_secs: f64,
    /// Payload share of the wire bytes, in percent.
    pub efficiency: f64,
}

/// Outbound control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    ConnectionStatus(ConnectionState),
    UploadSuccess {
        filename: String,
        size: u64,
        chunks: u32,
    },
    UploadProgress(UploadProgress),
    UploadAborted {
        filename: String,
        last_sequence: Option<u16>,
    },
    Ack {
        len: usize,
    },
    TransferEstimate(TransferEstimate),
    Error {
        message: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// The wire `type` of this response.
    pub fn msg_type(&self) -> MessageType {
        match self {
            Response::ConnectionStatus(_) => MessageType::ConnectionStatus,
            Response::UploadSuccess { .. } => MessageType::UploadSuccess,
            Response::UploadProgress(_) => MessageType::UploadProgress,
            Response::UploadAborted { .. } => MessageType::UploadAborted,
            Response::Ack { .. } => MessageType::Ack,
            Response::TransferEstimate(_) => MessageType::TransferEstimate,
            Response::Error { .. } => MessageType::Error,
        }
    }
}
