//! WebSocket client for one channel.
//!
//! Fire-and-forget JSON frames out, server-pushed events in, with ping/pong
//! keepalive. Every inbound frame is handed to the event callback; the
//! disconnect callback fires exactly once when the read side ends.

use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use gymops_protocol::Message;
use gymops_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_WRITE_BUFFER};

/// Errors from the WebSocket transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection attempt timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("outbound buffer full")]
    Backpressure,
}

/// Callback for inbound frames.
pub type EventCallback = Box<dyn Fn(Message) + Send + Sync>;

/// Callback fired once when the connection ends, for any reason.
pub type DisconnectCallback = Box<dyn FnOnce() + Send>;

/// WebSocket client connected to one channel endpoint.
pub struct WsClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
    ping_handle: JoinHandle<()>,
}

impl WsClient {
    /// Opens the socket and starts the pumps.
    ///
    /// Callbacks are installed before the first frame is read, so nothing
    /// pushed right after the handshake is lost.
    pub async fn connect(
        url: &str,
        timeout: Duration,
        on_event: EventCallback,
        on_disconnect: DisconnectCallback,
    ) -> Result<Self, TransportError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let handshake = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false);
        let (ws_stream, _) = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout)??;
        debug!(%url, "websocket open");
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WS_WRITE_BUFFER);
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            cancel.clone(),
        ));
        let read_handle = tokio::spawn(crate::pumps::read::read_pump(
            read,
            on_event,
            on_disconnect,
            write_tx.clone(),
            cancel.clone(),
        ));
        let ping_handle = tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            WS_PING_PERIOD,
            cancel.clone(),
        ));

        Ok(Self {
            write_tx,
            cancel,
            read_handle,
            write_handle,
            ping_handle,
        })
    }

    /// Queues a frame for the write pump without waiting.
    pub fn send(&self, msg: &Message) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let json = serde_json::to_string(msg)?;
        trace!(name = %msg.name, id = %msg.id, "queueing frame");
        self.write_tx
            .try_send(tungstenite::Message::Text(json.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    /// Wraps `payload` in a fresh envelope named `name` and sends it.
    pub fn send_command<T: Serialize>(&self, name: &str, payload: &T) -> Result<(), TransportError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(id, name, Some(payload))?;
        self.send(&msg)
    }

    /// `true` once the connection was closed from either side.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.write_tx.is_closed()
    }

    /// Closes the connection. The write pump sends a close frame on its way out.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
impl WsClient {
    /// A client with no socket behind it; frames land in the returned receiver.
    pub(crate) fn detached(buffer: usize) -> (Self, mpsc::Receiver<tungstenite::Message>) {
        let (write_tx, write_rx) = mpsc::channel(buffer);
        let client = Self {
            write_tx,
            cancel: CancellationToken::new(),
            read_handle: tokio::spawn(async {}),
            write_handle: tokio::spawn(async {}),
            ping_handle: tokio::spawn(async {}),
        };
        (client, write_rx)
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.write_handle.abort();
        self.ping_handle.abort();
    }
}
