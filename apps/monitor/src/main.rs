//! GymOps realtime monitor.
//!
//! Loads `~/.config/gymops/realtime.json` (or the path given as the first
//! argument), overlays `GYMOPS_*` environment variables, connects as the
//! user named by `GYMOPS_USER_ID` / `GYMOPS_ROLE`, and logs every connection
//! event and dispatched server event until Ctrl-C.

mod identity;

use std::path::PathBuf;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gymops_realtime::config::default_storage_dir;
use gymops_realtime::{ConnectionEvent, ConnectionManager, RealtimeConfig, default_config_path};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,gymops=debug")),
        )
        .init();

    let config = load_config()?;
    let identity = identity::from_env()?;
    info!(
        user = %identity.user_id,
        role = %identity.role,
        client = %identity.client_id,
        "starting monitor"
    );

    let manager = ConnectionManager::from_config(config);
    let pending = manager.queue().len();
    if pending > 0 {
        info!(pending, "restored queued commands");
    }

    let mut events = manager
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("connection events already taken"))?;
    let mut dispatched = manager.dispatcher().listen();

    manager.connect(identity).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            Some(event) = events.recv() => log_connection_event(&event),
            event = dispatched.recv() => match event {
                Ok(event) => info!(
                    channel = ?event.channel,
                    event = %event.event_type,
                    data = %event.data,
                    "event"
                ),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event log fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.disconnect().await;
    let left = manager.queue().len();
    if left > 0 {
        info!(pending = left, "commands still queued at exit");
    }
    Ok(())
}

fn load_config() -> anyhow::Result<RealtimeConfig> {
    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => default_config_path()?,
    };
    let mut config = RealtimeConfig::load(&path)?;
    config.apply_env();
    if config.queue.storage_dir.is_none() {
        config.queue.storage_dir = default_storage_dir();
    }
    info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn log_connection_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::StateChanged { channel, state } => info!(
            %channel,
            phase = %state.phase,
            attempts = state.reconnect_attempts,
            error = state.last_error.as_deref().unwrap_or(""),
            "channel state"
        ),
        ConnectionEvent::Reconnecting {
            channel,
            attempt,
            next_retry_secs,
        } => info!(
            %channel,
            attempt,
            delay_secs = format_args!("{next_retry_secs:.1}"),
            "retry scheduled"
        ),
        ConnectionEvent::Failed {
            channel,
            attempts,
            last_error,
        } => warn!(
            %channel,
            attempts,
            error = last_error.as_deref().unwrap_or("unknown"),
            "channel failed; reconnect to retry"
        ),
    }
}
