use std::time::Duration;

/// Time to wait for a pong response (or any incoming message).
///
/// Acts as a read deadline: if nothing arrives within this window the
/// connection is considered dead and the channel goes through reconnect.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings (must be well below [`WS_PONG_WAIT`]).
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Maximum inbound message size in bytes (1 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Capacity of the per-connection outbound frame buffer.
pub const WS_WRITE_BUFFER: usize = 256;

/// Command sent on every (re)connect so the server can resume routing.
pub const IDENTIFY_COMMAND: &str = "identify";

/// Reserved durable-storage key for persisted high-priority commands.
pub const OUTBOX_STORAGE_KEY: &str = "gymops.outbox.pending";
