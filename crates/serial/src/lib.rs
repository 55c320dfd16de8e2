//! Byte-oriented link to the embedded device.
//!
//! [`Transport`] abstracts the link itself (a real serial port, or a
//! recording sink in tests). [`DeviceLink`] pairs one transport with the
//! single [`TransferSession`](xcom_transfer::TransferSession) allowed on it
//! and serializes every write path behind one lock.

mod link;
mod memory;
mod serial;
mod transport;

pub use link::{DeviceLink, LinkGuard};
pub use memory::MemoryTransport;
pub use serial::{SerialConfig, SerialTransport};
pub use transport::{Transport, TransportFuture};
pub use xcom_protocol::ConnectionState;

/// Default bound on opening the serial device.
pub const DEFAULT_OPEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Errors produced by transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("timed out opening device")]
    Timeout,

    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),
}
