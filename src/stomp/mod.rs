// STOMP 1.2 framing over WebSocket text messages

mod frame;
#[cfg(test)]
mod tests;

pub use frame::{decode_frames, Command, Frame, FrameError, Heartbeat};

/// Versions offered in CONNECT, newest first.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// WebSocket sub-protocols understood by STOMP brokers.
pub const SUB_PROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";

/// A single heart-beat on the wire.
pub const HEARTBEAT_EOL: &str = "\n";
