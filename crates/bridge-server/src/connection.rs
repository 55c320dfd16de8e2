//! Client connection management: read/write pumps, ping/pong, send buffering.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use xcom_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};
use xcom_protocol::{Envelope, MessageType, Response};

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Handle for sending messages to one connected client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a [`Response`] as JSON text.
    ///
    /// Returns `Err` only if the buffer is full or the client is gone.
    pub fn send(&self, response: &Response) -> Result<(), SendError> {
        let json = serde_json::to_string(response).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends a [`Response`], waiting for buffer space instead of dropping it.
    ///
    /// Returns `Err` only if the client is gone.
    pub async fn send_wait(&self, response: &Response) -> Result<(), SendError> {
        let json = serde_json::to_string(response).map_err(|_| SendError)?;
        self.tx
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|_| SendError)
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// One connected control-channel client.
///
/// Carries the reply channel, a token cancelled when the connection
/// closes, and the slot for the client's in-flight upload (at most one).
#[derive(Clone)]
pub struct Client {
    id: u64,
    peer_addr: SocketAddr,
    sender: Sender,
    cancel: CancellationToken,
    upload: Arc<Mutex<Option<CancellationToken>>>,
}

impl Client {
    pub(crate) fn new(
        id: u64,
        peer_addr: SocketAddr,
        tx: mpsc::Sender<WsMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer_addr,
            sender: Sender { tx },
            cancel,
            upload: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Cancelled once the connection closes.
    pub fn closed(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sends a response, logging instead of failing if the client left.
    pub fn send(&self, response: &Response) {
        if self.sender.send(response).is_err() {
            tracing::debug!(client = self.id, msg_type = ?response.msg_type(), "reply dropped");
        }
    }

    /// Sends a response that must not be lost to a full buffer.
    ///
    /// Waits for room in the send buffer; only a closed connection drops it.
    pub async fn reply(&self, response: &Response) {
        if self.sender.send_wait(response).await.is_err() {
            tracing::debug!(client = self.id, msg_type = ?response.msg_type(), "reply dropped");
        }
    }

    fn upload_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.upload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the upload slot.
    ///
    /// Returns a token that is cancelled on [`abort_upload`](Self::abort_upload)
    /// or when the connection closes, or `None` if an upload is already
    /// in flight on this connection.
    pub fn begin_upload(&self) -> Option<CancellationToken> {
        let mut slot = self.upload_slot();
        if slot.is_some() {
            return None;
        }
        let token = self.cancel.child_token();
        *slot = Some(token.clone());
        Some(token)
    }

    /// Frees the upload slot once the upload task has replied.
    pub fn finish_upload(&self) {
        self.upload_slot().take();
    }

    /// Requests cancellation of the in-flight upload.
    ///
    /// The slot stays claimed until the upload task finishes, so a new
    /// upload cannot start before the aborted one has reported.
    pub fn abort_upload(&self) -> bool {
        match self.upload_slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_upload(&self) -> bool {
        self.upload_slot().is_some()
    }
}

/// Serves one upgraded WebSocket until it closes.
///
/// The write pump runs as a background task; the read pump runs on the
/// caller's task. Handler methods that do long work spawn their own tasks
/// so the read pump keeps servicing pings.
pub async fn serve_connection<S, H>(
    ws_stream: S,
    id: u64,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    server_cancel: &CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let client = Client::new(id, peer_addr, tx, cancel.clone());

    let (ws_sink, ws_stream) = ws_stream.split();
    let writer = tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    read_pump(ws_stream, &client, &handler, &cancel).await;

    // Stops the write pump and any upload started by this client.
    cancel.cancel();
    handler.on_client_disconnected(client).await;
    let _ = writer.await;
    tracing::info!(client = id, %peer_addr, "client disconnected");
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches to the handler.
async fn read_pump<S, H>(mut stream: S, client: &Client, handler: &Arc<H>, cancel: &CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut got_pong = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !got_pong {
                    tracing::warn!(client = client.id, "pong timeout, closing connection");
                    break;
                }
                got_pong = false;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if text.len() > WS_MAX_MESSAGE_SIZE {
                            tracing::error!("message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                            continue;
                        }
                        dispatch_text(handler, client, &text).await;
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        tracing::warn!(client = client.id, len = data.len(), "binary frame on control channel");
                        client.send(&Response::error("binary messages are not supported"));
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        got_pong = true;
                        pong_deadline.reset();
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = client.sender.tx.try_send(WsMessage::Pong(data));
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::debug!(client = client.id, "received close frame");
                        break;
                    }
                    Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::warn!(client = client.id, "read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Routes one text message to the matching handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, client: &Client, text: &str) {
    let msg = match Envelope::parse(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(client = client.id, "rejecting message: {e}");
            client.send(&Response::error("invalid json"));
            return;
        }
    };

    let c = client.clone();
    match msg.msg_type {
        MessageType::CheckConnection => handler.on_check_connection(c, msg).await,
        MessageType::FileUpload => handler.on_file_upload(c, msg).await,
        MessageType::Raw => handler.on_raw(c, msg).await,
        MessageType::AbortUpload => handler.on_abort_upload(c, msg).await,
        MessageType::EstimateTransfer => handler.on_estimate_transfer(c, msg).await,
        _ => {
            tracing::warn!(client = client.id, msg_type = %msg.type_name, "unhandled message type");
            client.send(&Response::error("unknown message type"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> (Client, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(4);
        let client = Client::new(1, "127.0.0.1:9".parse().unwrap(), tx, CancellationToken::new());
        (client, rx)
    }

    #[test]
    fn sender_error_display() {
        assert!(SendError.to_string().contains("buffer full"));
    }

    #[test]
    fn send_serializes_response() {
        let (client, mut rx) = test_client();
        client.send(&Response::Ack { len: 3 });

        let Ok(WsMessage::Text(text)) = rx.try_recv() else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "ack");
        assert_eq!(value["len"], 3);
    }

    #[test]
    fn send_after_close_reports_error() {
        let (client, rx) = test_client();
        drop(rx);
        assert!(!client.sender().is_connected());
        assert!(client.sender().send(&Response::error("x")).is_err());
    }

    #[tokio::test]
    async fn reply_waits_for_room_in_full_buffer() {
        let (client, mut rx) = test_client();
        for len in 0..4 {
            client.send(&Response::Ack { len });
        }
        // Buffer is full: plain sends drop, replies wait.
        assert!(client.sender().send(&Response::Ack { len: 99 }).is_err());

        let replier = client.clone();
        let pending = tokio::spawn(async move {
            replier.reply(&Response::error("final")).await;
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        let mut texts = Vec::new();
        while texts.len() < 5 {
            let Some(WsMessage::Text(text)) = rx.recv().await else {
                panic!("expected a text frame");
            };
            texts.push(text.to_string());
        }
        pending.await.unwrap();
        assert!(texts[4].contains("final"));
        assert!(texts.iter().all(|t| !t.contains("99")));
    }

    #[test]
    fn only_one_upload_slot() {
        let (client, _rx) = test_client();
        let token = client.begin_upload().unwrap();
        assert!(client.has_upload());
        assert!(client.begin_upload().is_none());

        assert!(client.abort_upload());
        assert!(token.is_cancelled());
        // Still claimed until the upload task reports back.
        assert!(client.begin_upload().is_none());

        client.finish_upload();
        assert!(!client.has_upload());
        assert!(client.begin_upload().is_some());
    }

    #[test]
    fn abort_without_upload() {
        let (client, _rx) = test_client();
        assert!(!client.abort_upload());
    }

    #[test]
    fn closing_connection_cancels_upload() {
        let (client, _rx) = test_client();
        let token = client.begin_upload().unwrap();
        client.closed().cancel();
        assert!(token.is_cancelled());
    }
}
