use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use xcom_transfer::TransferSession;

use crate::transport::Transport;
use crate::{ConnectionState, TransportError};

/// One device link shared by every client connection.
///
/// Holds the transport together with the single transfer session allowed
/// on it. Every write path (a whole file transfer or a single raw write)
/// runs under [`acquire`](Self::acquire), so concurrent requests are
/// serialized rather than interleaved on the wire. Connectivity queries
/// do not take the lock.
pub struct DeviceLink {
    transport: Arc<dyn Transport>,
    session: Mutex<TransferSession>,
}

/// Exclusive access to the link's write path and session.
pub struct LinkGuard<'a> {
    transport: &'a dyn Transport,
    session: MutexGuard<'a, TransferSession>,
}

impl DeviceLink {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            session: Mutex::new(TransferSession::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn connect(&self) -> ConnectionState {
        self.transport.connect().await
    }

    pub async fn probe(&self) -> ConnectionState {
        self.transport.probe().await
    }

    /// Waits for exclusive use of the link.
    pub async fn acquire(&self) -> LinkGuard<'_> {
        LinkGuard {
            transport: self.transport.as_ref(),
            session: self.session.lock().await,
        }
    }

    /// `true` while a transfer or raw write holds the link.
    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }
}

impl LinkGuard<'_> {
    pub fn session(&mut self) -> &mut TransferSession {
        &mut self.session
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport
    }

    /// Splits the guard for a transfer run.
    pub fn parts(&mut self) -> (&mut TransferSession, &dyn Transport) {
        (&mut *self.session, self.transport)
    }

    pub async fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.transport.write(frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::MemoryTransport;

    #[tokio::test]
    async fn guard_is_exclusive() {
        let link = DeviceLink::new(Arc::new(MemoryTransport::connected()));
        assert!(!link.is_busy());

        let guard = link.acquire().await;
        assert!(link.is_busy());
        let waiting = tokio::time::timeout(Duration::from_millis(20), link.acquire()).await;
        assert!(waiting.is_err(), "second acquire must wait");

        drop(guard);
        assert!(!link.is_busy());
        let _again = link.acquire().await;
        assert!(link.is_busy());
    }

    #[tokio::test]
    async fn guard_writes_through_transport() {
        let transport = Arc::new(MemoryTransport::connected());
        let link = DeviceLink::new(transport.clone());

        let guard = link.acquire().await;
        guard.write(b"frame").await.unwrap();
        assert_eq!(transport.frames(), vec![b"frame".to_vec()]);
    }

    #[tokio::test]
    async fn session_survives_between_guards() {
        let link = DeviceLink::new(Arc::new(MemoryTransport::connected()));
        {
            let mut guard = link.acquire().await;
            guard.session().prepare(vec![1, 2, 3], "a.bin").unwrap();
        }
        let mut guard = link.acquire().await;
        assert!(guard.session().is_active());
        assert_eq!(guard.session().name(), Some("a.bin"));
    }

    #[tokio::test]
    async fn connectivity_does_not_need_the_lock() {
        let link = DeviceLink::new(Arc::new(MemoryTransport::new()));
        let _guard = link.acquire().await;
        assert!(!link.is_connected());
        assert!(link.probe().await.connected);
    }
}
