//! In-memory transport that records every frame written to it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use xcom_protocol::constants::DEFAULT_BAUD;

use crate::transport::{Transport, TransportFuture};
use crate::{ConnectionState, TransportError};

/// Port name reported by [`MemoryTransport`].
pub const MEMORY_PORT: &str = "memory";

/// A simulated sink: keeps an ordered trace of written frames and can be
/// told to go unreachable or to fail after a number of writes.
pub struct MemoryTransport {
    connected: AtomicBool,
    reachable: AtomicBool,
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    frames: Vec<Vec<u8>>,
    fail_after: Option<usize>,
}

impl MemoryTransport {
    /// Creates a reachable but not yet connected sink.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// Creates a sink that is already connected.
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    /// Creates a sink that refuses every open.
    pub fn unreachable() -> Self {
        let transport = Self::new();
        transport.reachable.store(false, Ordering::SeqCst);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes every write fail once `count` frames have been recorded.
    pub fn fail_writes_after(&self, count: usize) {
        self.lock().fail_after = Some(count);
    }

    /// Frames written so far, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn clear(&self) {
        self.lock().frames.clear();
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> TransportFuture<'_, ConnectionState> {
        Box::pin(async move {
            if !self.reachable.load(Ordering::SeqCst) {
                self.connected.store(false, Ordering::SeqCst);
                return ConnectionState::disconnected("memory transport unreachable");
            }
            self.connected.store(true, Ordering::SeqCst);
            ConnectionState::connected(MEMORY_PORT, DEFAULT_BAUD)
        })
    }

    fn probe(&self) -> TransportFuture<'_, ConnectionState> {
        Box::pin(async move {
            if self.is_connected() || self.reachable.load(Ordering::SeqCst) {
                ConnectionState::connected(MEMORY_PORT, DEFAULT_BAUD)
            } else {
                ConnectionState::disconnected("memory transport unreachable")
            }
        })
    }

    fn write<'a>(&'a self, frame: &'a [u8]) -> TransportFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if !self.is_connected() {
                tracing::debug!(len = frame.len(), "simulated write");
                return Ok(());
            }

            {
                let mut inner = self.lock();
                if inner.fail_after.is_some_and(|n| inner.frames.len() >= n) {
                    return Err(TransportError::Write(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "simulated write failure",
                    )));
                }
                inner.frames.push(frame.to_vec());
            }

            // Give other tasks a chance to run between frames.
            tokio::task::yield_now().await;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
