//! WebSocket control channel for the XCOM serial bridge.
//!
//! Accepts any number of browser clients, dispatches their JSON messages
//! to a [`Handler`], and streams uploaded files to the device through a
//! paced [`SessionController`]. All clients share one
//! [`DeviceLink`](xcom_serial::DeviceLink), so transfers from different
//! clients reach the device one after another.

mod bridge;
mod connection;
mod controller;
mod handler;
mod server;

pub use bridge::{BridgeHandler, DEVICE_NOT_CONNECTED, decode_upload_data};
pub use connection::{Client, SendError, Sender};
pub use controller::{
    ChunkAck, ControllerError, DEFAULT_INTER_CHUNK_INTERVAL, DEFAULT_SETTLE_INTERVAL,
    PacingConfig, SessionController, TransferEvent, TransferReport, TransferState,
};
pub use handler::{Handler, HandlerFuture};
pub use server::{BridgeServer, ServerConfig};

/// Per-client send buffer capacity.
///
/// Uploads queue one progress message per chunk on top of regular
/// replies; replies beyond this are dropped rather than blocking.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the bridge server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("server already running")]
    AlreadyRunning,
}
