//! Device-facing frame layout.
//!
//! ```text
//! Header frame:  [0xAA 0x55][u32 total_size][u8 name_len][name bytes]
//! Chunk frame:   [u16 sequence][u16 payload_len][payload bytes][u16 crc]
//! ```
//!
//! All integers are big-endian. The chunk trailer is CRC-16/CCITT-FALSE
//! over the sequence bytes followed by the payload.

use crate::{CHUNK_SIZE, TransferError};

/// Magic bytes opening every header frame.
pub const HEADER_MAGIC: [u8; 2] = [0xAA, 0x55];

/// Header bytes before the name: magic, size, name length.
pub const HEADER_FIXED_LEN: usize = 7;

/// Longest file name a header can carry, in bytes.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Sequence and length prefix of a chunk frame.
pub const CHUNK_PREFIX_LEN: usize = 4;

/// CRC trailer of a chunk frame.
pub const TRAILER_LEN: usize = 2;

/// Framing bytes added to every chunk payload.
pub const CHUNK_OVERHEAD: usize = CHUNK_PREFIX_LEN + TRAILER_LEN;

/// A parsed header frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    pub total_size: u32,
    pub name: String,
}

/// A parsed chunk frame borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedChunk<'a> {
    pub sequence: u16,
    pub payload: &'a [u8],
    pub trailer: u16,
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

fn crc16_update(mut crc: u16, bytes: &[u8]) -> u16 {
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Computes the chunk trailer for `sequence ∥ payload`.
pub fn chunk_checksum(sequence: u16, payload: &[u8]) -> u16 {
    let crc = crc16_update(0xFFFF, &sequence.to_be_bytes());
    crc16_update(crc, payload)
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Serializes a file header frame.
pub fn encode_header(total_size: u32, name: &str) -> Result<Vec<u8>, TransferError> {
    let name_bytes = name.as_bytes();
    if name_bytes.len() > MAX_NAME_LEN {
        return Err(TransferError::InvalidInput(format!(
            "file name too long: {} bytes (max {MAX_NAME_LEN})",
            name_bytes.len()
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_FIXED_LEN + name_bytes.len());
    frame.extend_from_slice(&HEADER_MAGIC);
    frame.extend_from_slice(&total_size.to_be_bytes());
    frame.push(name_bytes.len() as u8);
    frame.extend_from_slice(name_bytes);
    Ok(frame)
}

/// Parses a header frame.
pub fn decode_header(frame: &[u8]) -> Result<DecodedHeader, TransferError> {
    if frame.len() < HEADER_FIXED_LEN {
        return Err(TransferError::Malformed(format!(
            "header too short: {} bytes",
            frame.len()
        )));
    }
    if frame[..2] != HEADER_MAGIC {
        return Err(TransferError::Malformed(format!(
            "bad header magic: {:02x} {:02x}",
            frame[0], frame[1]
        )));
    }

    let total_size = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]);
    let name_len = frame[6] as usize;
    let name_bytes = &frame[HEADER_FIXED_LEN..];
    if name_bytes.len() != name_len {
        return Err(TransferError::Malformed(format!(
            "name length {name_len} does not match {} trailing bytes",
            name_bytes.len()
        )));
    }
    let name = String::from_utf8(name_bytes.to_vec())
        .map_err(|e| TransferError::Malformed(format!("invalid UTF-8 name: {e}")))?;

    Ok(DecodedHeader { total_size, name })
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Serializes a chunk frame.
pub fn encode_chunk(sequence: u16, payload: &[u8]) -> Result<Vec<u8>, TransferError> {
    if payload.len() > CHUNK_SIZE {
        return Err(TransferError::InvalidInput(format!(
            "chunk payload too large: {} bytes (max {CHUNK_SIZE})",
            payload.len()
        )));
    }
    Ok(chunk_frame(sequence, payload))
}

/// Builds a chunk frame; `payload` must already be within [`CHUNK_SIZE`].
pub(crate) fn chunk_frame(sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(CHUNK_OVERHEAD + payload.len());
    frame.extend_from_slice(&sequence.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&chunk_checksum(sequence, payload).to_be_bytes());
    frame
}

/// Splits a chunk frame into its fields without checking the trailer.
pub fn decode_chunk(frame: &[u8]) -> Result<DecodedChunk<'_>, TransferError> {
    if frame.len() < CHUNK_OVERHEAD {
        return Err(TransferError::Malformed(format!(
            "chunk too short: {} bytes",
            frame.len()
        )));
    }

    let sequence = u16::from_be_bytes([frame[0], frame[1]]);
    let payload_len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    if payload_len > CHUNK_SIZE {
        return Err(TransferError::Malformed(format!(
            "chunk {sequence} declares {payload_len} bytes (max {CHUNK_SIZE})"
        )));
    }
    if frame.len() != CHUNK_OVERHEAD + payload_len {
        return Err(TransferError::Malformed(format!(
            "chunk {sequence} is {} bytes, expected {}",
            frame.len(),
            CHUNK_OVERHEAD + payload_len
        )));
    }

    let end = CHUNK_PREFIX_LEN + payload_len;
    Ok(DecodedChunk {
        sequence,
        payload: &frame[CHUNK_PREFIX_LEN..end],
        trailer: u16::from_be_bytes([frame[end], frame[end + 1]]),
    })
}

/// Returns `true` if the frame is well formed and its trailer matches.
pub fn validate_chunk(frame: &[u8]) -> bool {
    match decode_chunk(frame) {
        Ok(chunk) => chunk_checksum(chunk.sequence, chunk.payload) == chunk.trailer,
        Err(_) => false,
    }
}

/// Checks that `frame` is intact and carries `sequence`.
pub fn verify_chunk(frame: &[u8], sequence: u16) -> Result<(), TransferError> {
    match decode_chunk(frame) {
        Ok(chunk)
            if chunk.sequence == sequence
                && chunk_checksum(chunk.sequence, chunk.payload) == chunk.trailer =>
        {
            Ok(())
        }
        _ => Err(TransferError::ValidationFailure { sequence }),
    }
}
