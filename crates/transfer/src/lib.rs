//! Chunked file transfer to the device: framing, sessions and timing.
//!
//! A file is sent as one header frame followed by fixed-size chunk
//! frames, each carrying a sequence number and a CRC trailer.

mod codec;
mod session;
mod timing;

pub use codec::{
    CHUNK_OVERHEAD, CHUNK_PREFIX_LEN, DecodedChunk, DecodedHeader, HEADER_FIXED_LEN, HEADER_MAGIC,
    MAX_NAME_LEN, TRAILER_LEN, chunk_checksum, decode_chunk, decode_header, encode_chunk,
    encode_header, validate_chunk, verify_chunk,
};
pub use session::{MAX_FILE_SIZE, TransferSession, total_chunks};
pub use timing::{MCU_PROCESSING_TIME, STANDARD_BAUD_RATES, estimate_transfer};

/// Payload bytes per chunk: 16 KiB, matching the device-side buffer.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no file prepared for transfer")]
    NotReady,

    #[error("a transfer session is already active")]
    SessionBusy,

    #[error("chunk {sequence} failed validation")]
    ValidationFailure { sequence: u16 },

    #[error("malformed frame: {0}")]
    Malformed(String),
}
