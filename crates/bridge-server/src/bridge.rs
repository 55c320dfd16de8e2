//! The bridge's control-channel handler: probes, uploads, raw writes.

use std::sync::Arc;

use base64::Engine;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use xcom_protocol::{
    Envelope, EstimateTransferRequest, FileUploadRequest, RawRequest, Response, UploadProgress,
};
use xcom_serial::DeviceLink;
use xcom_transfer::estimate_transfer;

use crate::connection::Client;
use crate::controller::{ControllerError, SessionController, TransferEvent};
use crate::handler::{Handler, HandlerFuture};

/// Reply sent when an upload finds no usable device.
pub const DEVICE_NOT_CONNECTED: &str = "STM32 device not connected";

/// Decodes upload data, accepting either bare base64 or a data URL
/// (`data:<mime>;base64,<payload>`).
pub fn decode_upload_data(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let encoded = match data.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    base64::engine::general_purpose::STANDARD.decode(encoded.trim())
}

/// Handler wiring the control channel to one shared [`DeviceLink`].
pub struct BridgeHandler {
    link: Arc<DeviceLink>,
    controller: Arc<SessionController>,
    baud: u32,
}

impl BridgeHandler {
    /// `baud` is the configured line rate, used for transfer estimates.
    pub fn new(link: Arc<DeviceLink>, controller: SessionController, baud: u32) -> Self {
        Self {
            link,
            controller: Arc::new(controller),
            baud,
        }
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    /// Makes sure the link is open, reconnecting after an earlier failure.
    async fn ensure_connected(&self) -> Result<(), String> {
        if self.link.is_connected() {
            return Ok(());
        }
        let probe = self.link.probe().await;
        if !probe.connected {
            return Err(probe.reason.unwrap_or_default());
        }
        let state = self.link.connect().await;
        if state.connected {
            Ok(())
        } else {
            Err(state.reason.unwrap_or_default())
        }
    }
}

fn invalid_payload(client: &Client, err: serde_json::Error) {
    client.send(&Response::error(format!("invalid payload: {err}")));
}

impl Handler for BridgeHandler {
    fn on_check_connection(&self, client: Client, _msg: Envelope) -> HandlerFuture<'_> {
        Box::pin(async move {
            let state = self.link.probe().await;
            tracing::debug!(client = client.id(), connected = state.connected, "connection check");
            client.send(&Response::ConnectionStatus(state));
        })
    }

    fn on_file_upload(&self, client: Client, msg: Envelope) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: FileUploadRequest = match msg.parse_body() {
                Ok(r) => r,
                Err(e) => return invalid_payload(&client, e),
            };

            if let Err(reason) = self.ensure_connected().await {
                tracing::warn!(file = %req.filename, %reason, "upload refused, device not connected");
                client.send(&Response::error(DEVICE_NOT_CONNECTED));
                return;
            }

            let data = match decode_upload_data(&req.data) {
                Ok(d) => d,
                Err(e) => {
                    client.send(&Response::error(format!("Failed to send file: invalid base64 data: {e}")));
                    return;
                }
            };
            if let Some(declared) = req.size.filter(|&s| s != data.len() as u64) {
                tracing::warn!(
                    file = %req.filename,
                    declared,
                    decoded = data.len(),
                    "declared size does not match decoded data"
                );
            }

            let Some(cancel) = client.begin_upload() else {
                client.send(&Response::error("upload already in progress"));
                return;
            };

            let link = Arc::clone(&self.link);
            let controller = Arc::clone(&self.controller);
            tokio::spawn(upload_task(link, controller, client, cancel, req.filename, data));
        })
    }

    fn on_raw(&self, client: Client, msg: Envelope) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: RawRequest = match msg.parse_body() {
                Ok(r) => r,
                Err(e) => return invalid_payload(&client, e),
            };
            let payload = req.payload();

            let link = Arc::clone(&self.link);
            tokio::spawn(async move {
                let guard = link.acquire().await;
                let result = guard.write(&payload).await;
                drop(guard);

                match result {
                    Ok(()) => client.reply(&Response::Ack { len: payload.len() }).await,
                    Err(e) => {
                        tracing::warn!(client = client.id(), "raw write failed: {e}");
                        client
                            .reply(&Response::error(format!("Failed to write: {e}")))
                            .await;
                    }
                }
            });
        })
    }

    fn on_abort_upload(&self, client: Client, _msg: Envelope) -> HandlerFuture<'_> {
        Box::pin(async move {
            if client.abort_upload() {
                tracing::info!(client = client.id(), "upload abort requested");
            } else {
                client.send(&Response::error("no upload in progress"));
            }
        })
    }

    fn on_estimate_transfer(&self, client: Client, msg: Envelope) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: EstimateTransferRequest = match msg.parse_body() {
                Ok(r) => r,
                Err(e) => return invalid_payload(&client, e),
            };
            let pacing = self.controller.pacing();
            let name_len = req.filename.as_deref().map_or(0, str::len);

            match estimate_transfer(
                req.size,
                name_len,
                req.baud.unwrap_or(self.baud),
                pacing.settle_interval,
                pacing.inter_chunk_interval,
            ) {
                Ok(estimate) => client.send(&Response::TransferEstimate(estimate)),
                Err(e) => client.send(&Response::error(e.to_string())),
            }
        })
    }

    fn on_client_disconnected(&self, client: Client) -> HandlerFuture<'_> {
        Box::pin(async move {
            if client.has_upload() {
                tracing::info!(client = client.id(), "client left during upload, aborting");
            }
        })
    }
}

/// Runs one upload to completion and delivers its final reply.
///
/// Progress messages may be dropped when the client reads slowly; the
/// final reply waits for buffer space.
async fn upload_task(
    link: Arc<DeviceLink>,
    controller: Arc<SessionController>,
    client: Client,
    cancel: CancellationToken,
    filename: String,
    data: Vec<u8>,
) {
    let response = run_upload(&link, &controller, &client, &cancel, filename, data).await;
    client.finish_upload();
    client.reply(&response).await;
}

/// Waits for the link, streams the file and builds the final reply.
///
/// Progress is forwarded to the client as `upload_progress` messages, all
/// of them queued before the final reply.
async fn run_upload(
    link: &DeviceLink,
    controller: &SessionController,
    client: &Client,
    cancel: &CancellationToken,
    filename: String,
    data: Vec<u8>,
) -> Response {
    let total_bytes = data.len() as u64;

    let mut guard = tokio::select! {
        guard = link.acquire() => guard,
        _ = cancel.cancelled() => {
            return Response::UploadAborted { filename, last_sequence: None };
        }
    };
    let (session, transport) = guard.parts();

    if let Err(e) = session.prepare(data, filename.clone()) {
        tracing::warn!(file = %filename, "upload rejected: {e}");
        return Response::error(format!("Failed to send file: {e}"));
    }
    tracing::info!(
        client = client.id(),
        file = %filename,
        bytes = total_bytes,
        chunks = session.total_chunks(),
        "starting file transfer"
    );

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<TransferEvent>();
    let progress_client = client.clone();
    let progress_name = filename.clone();
    let progress_task = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            if let TransferEvent::ChunkSent {
                sequence,
                bytes_sent,
                total_chunks,
                ..
            } = event
            {
                progress_client.send(&Response::UploadProgress(UploadProgress {
                    filename: progress_name.clone(),
                    sequence,
                    total_chunks,
                    bytes_sent,
                    total_bytes,
                }));
            }
        }
    });

    let result = controller
        .run_transfer(session, transport, Some(&progress_tx), cancel)
        .await;
    drop(progress_tx);
    let _ = progress_task.await;

    match result {
        Ok(report) => Response::UploadSuccess {
            filename,
            size: report.bytes_sent,
            chunks: report.chunks_sent,
        },
        Err(ControllerError::Aborted { last_sequence }) => Response::UploadAborted {
            filename,
            last_sequence,
        },
        Err(ControllerError::NotConnected) => Response::error(DEVICE_NOT_CONNECTED),
        Err(e) => Response::error(format!("Failed to send file: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
    use xcom_serial::MemoryTransport;
    use xcom_transfer::CHUNK_SIZE;

    use crate::SEND_BUFFER_SIZE;
    use crate::controller::PacingConfig;

    fn unpaced() -> Arc<SessionController> {
        Arc::new(SessionController::new(PacingConfig {
            settle_interval: Duration::ZERO,
            inter_chunk_interval: Duration::ZERO,
        }))
    }

    #[tokio::test]
    async fn final_reply_survives_undrained_progress() {
        let transport = Arc::new(MemoryTransport::connected());
        let link = Arc::new(DeviceLink::new(transport.clone()));
        let (tx, mut rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
        let client = Client::new(1, "127.0.0.1:9".parse().unwrap(), tx, CancellationToken::new());
        let cancel = client.begin_upload().unwrap();

        // More chunks than the send buffer holds, and nobody reading yet.
        let chunks = 300;
        let task = tokio::spawn(upload_task(
            Arc::clone(&link),
            unpaced(),
            client.clone(),
            cancel,
            "big.bin".into(),
            vec![0x42; CHUNK_SIZE * chunks],
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.write_count() < chunks + 1 || link.is_busy() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!task.is_finished());

        let mut progress = 0;
        let last = loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let WsMessage::Text(text) = msg else {
                panic!("expected a text frame");
            };
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            if value["type"] == "upload_progress" {
                progress += 1;
            } else {
                break value;
            }
        };
        task.await.unwrap();

        assert_eq!(last["type"], "upload_success");
        assert_eq!(last["chunks"], chunks);
        assert_eq!(last["size"], (CHUNK_SIZE * chunks) as u64);
        assert!(progress <= SEND_BUFFER_SIZE);
        assert!(!client.has_upload());
    }

    #[test]
    fn decodes_plain_base64() {
        assert_eq!(decode_upload_data("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn strips_data_url_prefix() {
        let data = "data:application/octet-stream;base64,aGVsbG8=";
        assert_eq!(decode_upload_data(data).unwrap(), b"hello");
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(decode_upload_data("not base64!").is_err());
        assert!(decode_upload_data("data:text/plain;base64,@@@").is_err());
    }

    #[test]
    fn empty_data_decodes_to_nothing() {
        assert!(decode_upload_data("").unwrap().is_empty());
    }
}
