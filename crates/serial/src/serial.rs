//! Serial port transport.
//!
//! Opening and writing go through the blocking `serialport` API on the
//! blocking thread pool, so a stalled device never parks the event loop.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialport::SerialPort;
use xcom_protocol::constants::DEFAULT_BAUD;

use crate::transport::{Transport, TransportFuture};
use crate::{ConnectionState, DEFAULT_OPEN_TIMEOUT, TransportError};

/// Reason reported when the bridge was started without a device path.
pub const NO_DEVICE_REASON: &str = "no serial device configured";

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path (e.g. `/dev/ttyUSB0`); `None` runs in simulated mode.
    pub path: Option<String>,
    pub baud: u32,
    /// Bound on opening the device; also used as the write timeout.
    pub open_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: None,
            baud: DEFAULT_BAUD,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

type PortSlot = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Transport backed by a serial device.
///
/// `connect` and `probe` run one at a time under `open_lock`. The device
/// handle is exclusive, so two overlapping opens would have one of them
/// fail against the bridge's own handle.
pub struct SerialTransport {
    config: SerialConfig,
    port: PortSlot,
    connected: AtomicBool,
    open_lock: tokio::sync::Mutex<()>,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: Arc::new(Mutex::new(None)),
            connected: AtomicBool::new(false),
            open_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn slot(&self) -> MutexGuard<'_, Option<Box<dyn SerialPort>>> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.slot().take();
    }

    /// Opens a fresh handle to `path`, bounded by the open timeout.
    async fn open(&self, path: &str) -> Result<Box<dyn SerialPort>, TransportError> {
        let builder = serialport::new(path, self.config.baud).timeout(self.config.open_timeout);
        let task = tokio::task::spawn_blocking(move || builder.open());

        match tokio::time::timeout(self.config.open_timeout, task).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Err(join_err)) => Err(TransportError::Open {
                path: path.to_owned(),
                reason: join_err.to_string(),
            }),
            Ok(Ok(Err(e))) => Err(TransportError::Open {
                path: path.to_owned(),
                reason: describe_open_error(&e),
            }),
            Ok(Ok(Ok(port))) => Ok(port),
        }
    }
}

fn describe_open_error(err: &serialport::Error) -> String {
    match err.kind() {
        serialport::ErrorKind::NoDevice => format!("device unavailable ({})", err.description),
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => "device not found".into(),
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => "permission denied".into(),
        _ => err.to_string(),
    }
}

impl Transport for SerialTransport {
    fn connect(&self) -> TransportFuture<'_, ConnectionState> {
        Box::pin(async move {
            let Some(path) = self.config.path.as_deref() else {
                tracing::info!("running in simulated mode (no serial port)");
                return ConnectionState::disconnected(NO_DEVICE_REASON);
            };
            let _open = self.open_lock.lock().await;
            if self.is_connected() {
                return ConnectionState::connected(path, self.config.baud);
            }

            match self.open(path).await {
                Ok(port) => {
                    *self.slot() = Some(port);
                    self.connected.store(true, Ordering::SeqCst);
                    tracing::info!(port = %path, baud = self.config.baud, "connected to device");
                    ConnectionState::connected(path, self.config.baud)
                }
                Err(e) => {
                    // A live handle in the slot stays authoritative.
                    if self.slot().is_none() {
                        self.connected.store(false, Ordering::SeqCst);
                    }
                    tracing::error!(port = %path, "failed to connect to device: {e}");
                    ConnectionState::disconnected(e.to_string())
                }
            }
        })
    }

    fn probe(&self) -> TransportFuture<'_, ConnectionState> {
        Box::pin(async move {
            let Some(path) = self.config.path.as_deref() else {
                return ConnectionState::disconnected(NO_DEVICE_REASON);
            };
            let _open = self.open_lock.lock().await;
            // The open handle is exclusive; reopening it would fail.
            if self.is_connected() {
                return ConnectionState::connected(path, self.config.baud);
            }

            match self.open(path).await {
                Ok(port) => {
                    drop(port);
                    ConnectionState::connected(path, self.config.baud)
                }
                Err(e) => {
                    tracing::warn!(port = %path, "device probe failed: {e}");
                    ConnectionState::disconnected(e.to_string())
                }
            }
        })
    }

    fn write<'a>(&'a self, frame: &'a [u8]) -> TransportFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if !self.is_connected() {
                tracing::debug!(len = frame.len(), "simulated write");
                return Ok(());
            }

            let slot = Arc::clone(&self.port);
            let data = frame.to_vec();
            let result = tokio::task::spawn_blocking(move || -> io::Result<()> {
                let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
                let port = guard
                    .as_mut()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))?;
                port.write_all(&data)?;
                port.flush()
            })
            .await
            .map_err(io::Error::other)
            .and_then(|r| r);

            if let Err(e) = result {
                tracing::error!(len = frame.len(), "serial write failed: {e}");
                self.mark_disconnected();
                return Err(TransportError::Write(e));
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_device() -> SerialTransport {
        SerialTransport::new(SerialConfig {
            path: Some("/dev/xcom-test-missing-device".into()),
            open_timeout: Duration::from_millis(500),
            ..SerialConfig::default()
        })
    }

    #[test]
    fn default_config_is_simulated() {
        let config = SerialConfig::default();
        assert!(config.path.is_none());
        assert_eq!(config.baud, 115_200);
    }

    #[tokio::test]
    async fn simulated_mode_reports_disconnected() {
        let transport = SerialTransport::new(SerialConfig::default());

        let state = transport.connect().await;
        assert!(!state.connected);
        assert_eq!(state.reason.as_deref(), Some(NO_DEVICE_REASON));

        let probe = transport.probe().await;
        assert!(!probe.connected);
        assert!(probe.reason.is_some());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn simulated_write_is_noop() {
        let transport = SerialTransport::new(SerialConfig::default());
        transport.write(b"hello").await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn missing_device_probe_reports_reason() {
        let transport = missing_device();
        let state = transport.probe().await;
        assert!(!state.connected);
        let reason = state.reason.unwrap();
        assert!(!reason.is_empty());
    }

    #[tokio::test]
    async fn missing_device_connect_stays_disconnected() {
        let transport = missing_device();
        let state = transport.connect().await;
        assert!(!state.connected);
        assert!(!transport.is_connected());
        // Writes fall back to simulated mode.
        transport.write(&[0xAA, 0x55]).await.unwrap();
    }

    #[cfg(unix)]
    fn pty_transport() -> (serialport::TTYPort, SerialTransport) {
        let (master, slave) = serialport::TTYPort::pair().unwrap();
        let path = slave.name().unwrap();
        drop(slave);
        let transport = SerialTransport::new(SerialConfig {
            path: Some(path),
            open_timeout: Duration::from_millis(500),
            ..SerialConfig::default()
        });
        (master, transport)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concurrent_connects_share_one_handle() {
        let (_master, transport) = pty_transport();

        let (a, b) = tokio::join!(transport.connect(), transport.connect());
        assert!(a.connected, "first connect: {:?}", a.reason);
        assert!(b.connected, "second connect: {:?}", b.reason);
        assert!(transport.is_connected());
        assert!(transport.slot().is_some());

        transport.write(b"ok").await.unwrap();
        assert!(transport.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn status_check_during_connect_keeps_link_up() {
        let (_master, transport) = pty_transport();

        let (state, status) = tokio::join!(transport.connect(), transport.probe());
        assert!(state.connected);
        assert!(status.connected);
        assert!(transport.is_connected());

        // Once connected, status checks report the open handle instead of reopening.
        let again = transport.probe().await;
        assert!(again.connected);
        assert_eq!(again.port, state.port);
    }
}
