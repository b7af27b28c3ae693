pub mod channel;
pub mod constants;
pub mod envelope;
pub mod events;
pub mod messages;

// Re-export primary types for convenience.
pub use channel::{Channel, Priority, UnknownChannel};
pub use envelope::Message;
pub use events::EventType;
pub use messages::{Identity, Role};
