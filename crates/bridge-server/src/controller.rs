//! Paced transfer of one prepared session over a transport.
//!
//! Per upload the controller walks `Idle → HeaderSent → Streaming →
//! Complete`, or lands in `Failed` from any step. The header is followed
//! by a settle interval so the device can set up its chunk buffer, and
//! chunks are spaced by a fixed interval to stay within what the device
//! can absorb.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use xcom_serial::{Transport, TransportError, TransportFuture};
use xcom_transfer::{CHUNK_OVERHEAD, TransferError, TransferSession, verify_chunk};

/// Pause after the header frame.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(100);

/// Pause between consecutive chunk frames.
pub const DEFAULT_INTER_CHUNK_INTERVAL: Duration = Duration::from_millis(50);

/// Pacing applied to every transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    pub settle_interval: Duration,
    pub inter_chunk_interval: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            settle_interval: DEFAULT_SETTLE_INTERVAL,
            inter_chunk_interval: DEFAULT_INTER_CHUNK_INTERVAL,
        }
    }
}

/// Transfer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    HeaderSent,
    Streaming,
    Complete,
    Failed,
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub filename: String,
    /// Payload bytes written (excluding framing).
    pub bytes_sent: u64,
    pub chunks_sent: u32,
    pub elapsed: Duration,
}

/// Progress notifications emitted while a transfer runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    StateChanged(TransferState),
    ChunkSent {
        sequence: u16,
        payload_len: usize,
        bytes_sent: u64,
        total_chunks: u32,
    },
    Completed(TransferReport),
    Failed {
        reason: String,
        last_sequence: Option<u16>,
    },
}

/// Errors produced by a transfer run.
///
/// `last_sequence` is the last chunk written successfully, `None` when no
/// chunk made it out.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("device not connected")]
    NotConnected,

    #[error(transparent)]
    Session(#[from] TransferError),

    #[error("write failed {}: {source}", after(.last_sequence))]
    WriteFailure {
        last_sequence: Option<u16>,
        source: TransportError,
    },

    #[error("transfer aborted {}", after(.last_sequence))]
    Aborted { last_sequence: Option<u16> },

    #[error("chunk {sequence} not acknowledged: {reason}")]
    AckFailure { sequence: u16, reason: String },
}

fn after(last_sequence: &Option<u16>) -> String {
    match last_sequence {
        Some(seq) => format!("after chunk {seq}"),
        None => "before any chunk".into(),
    }
}

impl ControllerError {
    pub fn last_sequence(&self) -> Option<u16> {
        match self {
            ControllerError::WriteFailure { last_sequence, .. }
            | ControllerError::Aborted { last_sequence } => *last_sequence,
            ControllerError::AckFailure { sequence, .. }
            | ControllerError::Session(TransferError::ValidationFailure { sequence }) => {
                sequence.checked_sub(1)
            }
            _ => None,
        }
    }
}

/// Waits for the device to confirm a chunk.
///
/// No acknowledgment frame exists on the device side yet; a controller
/// without one installed streams open-loop.
pub trait ChunkAck: Send + Sync + 'static {
    fn wait_ack(&self, sequence: u16) -> TransportFuture<'_, Result<(), String>>;
}

struct Events<'a>(Option<&'a mpsc::UnboundedSender<TransferEvent>>);

impl Events<'_> {
    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = self.0 {
            let _ = tx.send(event);
        }
    }
}

/// Drives a [`TransferSession`] against a [`Transport`].
pub struct SessionController {
    pacing: PacingConfig,
    ack: Option<Arc<dyn ChunkAck>>,
}

impl SessionController {
    pub fn new(pacing: PacingConfig) -> Self {
        Self { pacing, ack: None }
    }

    /// Installs a per-chunk acknowledgment wait.
    pub fn with_ack(mut self, ack: Arc<dyn ChunkAck>) -> Self {
        self.ack = Some(ack);
        self
    }

    pub fn pacing(&self) -> PacingConfig {
        self.pacing
    }

    /// Streams the prepared `session` through `transport`.
    ///
    /// Cancellation is honored only between frames. The session is
    /// released when the run ends, whatever the outcome.
    pub async fn run_transfer(
        &self,
        session: &mut TransferSession,
        transport: &dyn Transport,
        events: Option<&mpsc::UnboundedSender<TransferEvent>>,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, ControllerError> {
        let events = Events(events);
        let result = self.stream(session, transport, &events, cancel).await;
        session.release();

        match &result {
            Ok(report) => {
                tracing::info!(
                    file = %report.filename,
                    bytes = report.bytes_sent,
                    chunks = report.chunks_sent,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "file transfer complete"
                );
                events.emit(TransferEvent::StateChanged(TransferState::Complete));
                events.emit(TransferEvent::Completed(report.clone()));
            }
            Err(e) => {
                tracing::warn!("file transfer failed: {e}");
                events.emit(TransferEvent::StateChanged(TransferState::Failed));
                events.emit(TransferEvent::Failed {
                    reason: e.to_string(),
                    last_sequence: e.last_sequence(),
                });
            }
        }
        result
    }

    async fn stream(
        &self,
        session: &mut TransferSession,
        transport: &dyn Transport,
        events: &Events<'_>,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, ControllerError> {
        let started = Instant::now();

        if !transport.is_connected() {
            return Err(ControllerError::NotConnected);
        }
        let header = session.header()?;
        if cancel.is_cancelled() {
            return Err(ControllerError::Aborted {
                last_sequence: None,
            });
        }

        let filename = session.name().unwrap_or_default().to_owned();
        let total_chunks = session.total_chunks() as u32;

        transport
            .write(&header)
            .await
            .map_err(|source| ControllerError::WriteFailure {
                last_sequence: None,
                source,
            })?;
        events.emit(TransferEvent::StateChanged(TransferState::HeaderSent));

        if !self.pause(self.pacing.settle_interval, cancel).await {
            return Err(ControllerError::Aborted {
                last_sequence: None,
            });
        }
        events.emit(TransferEvent::StateChanged(TransferState::Streaming));

        let mut last_sequence = None;
        let mut bytes_sent = 0u64;
        let mut chunks_sent = 0u32;

        while let Some((frame, sequence)) = session.next_chunk() {
            verify_chunk(&frame, sequence)?;
            transport
                .write(&frame)
                .await
                .map_err(|source| ControllerError::WriteFailure {
                    last_sequence,
                    source,
                })?;

            if let Some(ack) = &self.ack {
                ack.wait_ack(sequence)
                    .await
                    .map_err(|reason| ControllerError::AckFailure { sequence, reason })?;
            }

            let payload_len = frame.len() - CHUNK_OVERHEAD;
            last_sequence = Some(sequence);
            bytes_sent += payload_len as u64;
            chunks_sent += 1;
            tracing::debug!(sequence, payload_len, "sent chunk");
            events.emit(TransferEvent::ChunkSent {
                sequence,
                payload_len,
                bytes_sent,
                total_chunks,
            });

            if !session.is_exhausted()
                && !self.pause(self.pacing.inter_chunk_interval, cancel).await
            {
                return Err(ControllerError::Aborted { last_sequence });
            }
        }

        Ok(TransferReport {
            filename,
            bytes_sent,
            chunks_sent,
            elapsed: started.elapsed(),
        })
    }

    /// Sleeps for `interval`; returns `false` if cancelled first.
    async fn pause(&self, interval: Duration, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if interval.is_zero() {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(interval) => true,
        }
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}
