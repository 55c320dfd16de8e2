//! Transport trait for the device link.

use std::future::Future;
use std::pin::Pin;

use crate::{ConnectionState, TransportError};

/// A boxed future returned by transport methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A byte-oriented, write-only link to the device.
///
/// Methods take `&self`; implementations keep the device handle behind
/// their own interior mutability so a transport can be shared as
/// `Arc<dyn Transport>`.
pub trait Transport: Send + Sync + 'static {
    /// Opens the device handle and keeps it for later writes.
    ///
    /// Failures are reported in the returned state, never raised; the
    /// bridge keeps running disconnected.
    fn connect(&self) -> TransportFuture<'_, ConnectionState>;

    /// Checks whether the device is reachable without committing to use
    /// it. Must not disturb an already open handle.
    fn probe(&self) -> TransportFuture<'_, ConnectionState>;

    /// Writes one frame.
    ///
    /// When disconnected this is a no-op that succeeds (simulated mode).
    fn write<'a>(&'a self, frame: &'a [u8]) -> TransportFuture<'a, Result<(), TransportError>>;

    /// Cheap local read of the connected flag, no I/O.
    fn is_connected(&self) -> bool;
}
