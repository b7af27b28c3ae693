//! Per-channel supervisor: connect, announce, replay, watch, back off.
//!
//! One task per configured channel. Tasks share nothing but the registry,
//! queue and dispatcher, so one channel's backoff never delays another.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gymops_event_bus::EventDispatcher;
use gymops_outbox::{DeliveryQueue, Replay, ReplayReport, SendError};
use gymops_protocol::constants::IDENTIFY_COMMAND;
use gymops_protocol::{Channel, Identity, Message};

use crate::registry::ChannelRegistry;
use crate::types::{ChannelPhase, ConnectionEvent, ReconnectConfig};
use crate::ws_client::{TransportError, WsClient};

/// Pause before retrying a flush the transport refused.
const FLUSH_RETRY: Duration = Duration::from_millis(100);

/// Everything a supervisor needs, cloned once per channel.
#[derive(Clone)]
pub(crate) struct ChannelContext {
    pub(crate) identity: Identity,
    pub(crate) registry: Arc<ChannelRegistry>,
    pub(crate) queue: Arc<DeliveryQueue>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) reconnect: ReconnectConfig,
}

/// Runs until `cancel` fires or the channel exhausts its attempts.
pub(crate) async fn supervise(
    channel: Channel,
    url: String,
    ctx: ChannelContext,
    cancel: CancellationToken,
) {
    let mut phase = ChannelPhase::Connecting;

    loop {
        if ctx.registry.begin_attempt(channel, &cancel, phase).is_none() {
            return;
        }

        let attempt = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%channel, "connect attempt abandoned");
                return;
            }
            result = open(channel, &url, &ctx, &cancel) => result,
        };

        match attempt {
            Ok((client, closed)) => {
                let client = Arc::new(client);
                let Some(flush) = ctx.registry.flush_signal(channel) else {
                    client.close();
                    return;
                };
                if ctx.registry.attach(channel, &cancel, client.clone()).is_none() {
                    client.close();
                    return;
                }
                info!(%channel, "connected");
                if on_connected(channel, &client, &ctx).failed > 0 {
                    flush.notify_one();
                }

                if !watch(channel, &client, closed, &flush, &ctx, &cancel).await {
                    client.close();
                    return;
                }
                warn!(%channel, "connection lost");
                if ctx.registry.detach(channel, &cancel).is_none() {
                    return;
                }
                phase = ChannelPhase::Reconnecting;
                if !backoff(channel, 1, &ctx, &cancel).await {
                    return;
                }
            }
            Err(e) => {
                warn!(%channel, error = %e, "connect attempt failed");
                let Some(attempts) = ctx.registry.record_failure(channel, &cancel, e.to_string())
                else {
                    return;
                };
                if attempts >= ctx.reconnect.max_attempts {
                    warn!(%channel, attempts, "giving up");
                    ctx.registry.fail(channel, &cancel);
                    return;
                }
                if !backoff(channel, attempts, &ctx, &cancel).await {
                    return;
                }
            }
        }
    }
}

/// Opens the socket with callbacks bound to this channel.
///
/// The returned receiver resolves when the connection ends.
async fn open(
    channel: Channel,
    url: &str,
    ctx: &ChannelContext,
    cancel: &CancellationToken,
) -> Result<(WsClient, oneshot::Receiver<()>), TransportError> {
    let (closed_tx, closed_rx) = oneshot::channel();

    let dispatcher = ctx.dispatcher.clone();
    let live = cancel.clone();
    let on_event = Box::new(move |msg: Message| {
        if live.is_cancelled() {
            return;
        }
        let event_type = msg.event_type();
        dispatcher.dispatch_from(channel, event_type, msg.into_payload());
    });
    let on_disconnect = Box::new(move || {
        let _ = closed_tx.send(());
    });

    let client = WsClient::connect(url, ctx.reconnect.connect_timeout, on_event, on_disconnect).await?;
    Ok((client, closed_rx))
}

/// Announces the identity, then flushes this channel's queued commands.
fn on_connected(channel: Channel, client: &WsClient, ctx: &ChannelContext) -> ReplayReport {
    if let Err(e) = client.send_command(IDENTIFY_COMMAND, &ctx.identity) {
        warn!(%channel, error = %e, "failed to announce identity");
    }
    flush_queue(channel, client, ctx)
}

/// Holds a live connection, flushing commands buffered while it is up.
///
/// Returns `true` when the connection ends and `false` if cancelled.
async fn watch(
    channel: Channel,
    client: &WsClient,
    mut closed: oneshot::Receiver<()>,
    flush: &Notify,
    ctx: &ChannelContext,
    cancel: &CancellationToken,
) -> bool {
    let mut retry = false;
    loop {
        let pause = async {
            if retry {
                tokio::time::sleep(FLUSH_RETRY).await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = &mut closed => return true,
            _ = flush.notified() => {}
            _ = pause => {}
        }
        retry = flush_queue(channel, client, ctx).failed > 0;
    }
}

fn flush_queue(channel: Channel, client: &WsClient, ctx: &ChannelContext) -> ReplayReport {
    let report = ctx.queue.replay_channel(channel, |cmd| {
        client
            .send_command(&cmd.command, &cmd.payload)
            .map(|()| Replay::Sent)
            .map_err(|e| SendError::new(e.to_string()))
    });
    debug!(
        %channel,
        sent = report.sent,
        failed = report.failed,
        "replay pass finished"
    );
    report
}

/// Waits before retry number `attempt`. Returns `false` if cancelled.
async fn backoff(
    channel: Channel,
    attempt: u32,
    ctx: &ChannelContext,
    cancel: &CancellationToken,
) -> bool {
    let delay = ctx.reconnect.delay_for_attempt(attempt);
    let delay_secs = delay.as_secs_f64();
    ctx.registry.notify(ConnectionEvent::Reconnecting {
        channel,
        attempt,
        next_retry_secs: delay_secs,
    });
    info!(
        %channel,
        attempt,
        delay_secs = format_args!("{delay_secs:.1}"),
        "reconnecting"
    );

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!(%channel, "reconnect cancelled");
            false
        }
        _ = tokio::time::sleep(delay) => !cancel.is_cancelled(),
    }
}
