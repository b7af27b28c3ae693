//! WebSocket ping pump: periodic keepalive pings.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Sends a ping every `period` until cancelled or the writer goes away.
///
/// The matching deadline lives in the read pump.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                trace!("sending ping");
                let ping = tungstenite::Message::Ping(vec![].into());
                if write_tx.send(ping).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pings_once_per_period() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ping_pump(tx, Duration::from_secs(20), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(41)).await;
        let mut pings = 0;
        while let Ok(msg) = rx.try_recv() {
            assert!(matches!(msg, tungstenite::Message::Ping(_)));
            pings += 1;
        }
        assert_eq!(pings, 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_writer_is_gone() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let cancel = CancellationToken::new();
        tokio::time::timeout(
            Duration::from_secs(2),
            ping_pump(tx, Duration::from_millis(10), cancel),
        )
        .await
        .expect("should stop");
    }
}
