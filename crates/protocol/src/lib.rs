//! Control-channel wire types shared by the bridge crates.
//!
//! The browser client and the bridge exchange one JSON object per
//! WebSocket text message. Every object carries a `type` field that
//! selects how the rest of the object is interpreted.

pub mod constants;
pub mod envelope;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{Envelope, EnvelopeError};
pub use messages::{
    ConnectionState, EstimateTransferRequest, FileUploadRequest, RawRequest, Response,
    TransferEstimate, UploadProgress,
};
