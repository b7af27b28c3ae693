//! WebSocket read pump: hands inbound frames to the channel's callback.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use gymops_protocol::Message;
use gymops_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};

use crate::ws_client::{DisconnectCallback, EventCallback};

/// Reads frames until the stream ends, errors, goes silent or is cancelled.
///
/// Any inbound frame (not just a pong) resets the [`WS_PONG_WAIT`] deadline.
/// `on_disconnect` runs once on the way out, whatever the cause.
pub(crate) async fn read_pump<S>(
    mut read: S,
    on_event: EventCallback,
    on_disconnect: DisconnectCallback,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("no traffic within pong wait, closing");
                break;
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                };
                pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match msg {
                    tungstenite::Message::Text(text) => handle_text_message(&text, &on_event),
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.try_send(tungstenite::Message::Pong(data));
                    }
                    tungstenite::Message::Pong(_) => trace!("received pong"),
                    tungstenite::Message::Close(frame) => {
                        debug!(?frame, "received close frame");
                        break;
                    }
                    _ => {} // binary frames are not part of the protocol
                }
            }
        }
    }

    // Stop the writer and pinger too; a half-open socket is useless.
    cancel.cancel();
    on_disconnect();
}

/// Parses one text frame and passes it on. Malformed frames are dropped.
fn handle_text_message(text: &str, on_event: &EventCallback) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return;
    }

    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return;
        }
    };

    trace!(name = %msg.name, id = %msg.id, "received message");
    on_event(msg);
}
