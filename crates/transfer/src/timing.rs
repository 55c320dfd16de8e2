use std::time::Duration;

use xcom_protocol::TransferEstimate;

use crate::codec::{CHUNK_OVERHEAD, HEADER_FIXED_LEN};
use crate::{CHUNK_SIZE, TransferError};

/// Baud rates offered by common USB-UART adapters.
pub const STANDARD_BAUD_RATES: [u32; 8] =
    [9600, 19200, 38400, 57600, 115_200, 230_400, 460_800, 921_600];

/// Estimated device-side time to process one chunk.
pub const MCU_PROCESSING_TIME: Duration = Duration::from_millis(5);

/// UART framing: 1 start bit, 8 data bits, 1 stop bit.
const BITS_PER_BYTE: f64 = 10.0;

/// Estimates how long sending a file of `file_size` bytes takes.
///
/// Accounts for the header and per-chunk framing, raw line time at
/// `baud`, device processing per chunk, and the bridge's own pacing
/// (`settle` once after the header, `per_chunk_delay` between chunks).
pub fn estimate_transfer(
    file_size: u64,
    name_len: usize,
    baud: u32,
    settle: Duration,
    per_chunk_delay: Duration,
) -> Result<TransferEstimate, TransferError> {
    if baud == 0 {
        return Err(TransferError::InvalidInput("baud rate must be positive".into()));
    }

    let chunks = file_size.div_ceil(CHUNK_SIZE as u64);
    let overhead_bytes = (HEADER_FIXED_LEN + name_len) as u64 + chunks * CHUNK_OVERHEAD as u64;
    let wire_bytes = file_size + overhead_bytes;

    let raw_transfer_secs = wire_bytes as f64 * BITS_PER_BYTE / baud as f64;
    let gaps = chunks.saturating_sub(1) as f64;
    let processing_secs = chunks as f64 * MCU_PROCESSING_TIME.as_secs_f64()
        + settle.as_secs_f64()
        + gaps * per_chunk_delay.as_secs_f64();

    let efficiency = if wire_bytes == 0 {
        0.0
    } else {
        file_size as f64 / wire_bytes as f64 * 100.0
    };

    Ok(TransferEstimate {
        file_size,
        baud,
        chunks,
        overhead_bytes,
        wire_bytes,
        raw_transfer_secs,
        processing_secs,
        total_secs: raw_transfer_secs + processing_secs,
        efficiency,
    })
}
