// Connection lifecycle: one broker connection per manager

mod driver;
mod error;
mod manager;
pub(crate) mod observers;
mod retry;
pub(crate) mod shared;


pub use error::ConnectionError;
pub use manager::{ConnectionManager, ConnectionScope};
pub use observers::ObserverId;
pub use retry::RetryPolicy;

use std::fmt;

/// Connection state machine.
///
/// `Idle → Connecting → Connected → Disconnecting → Idle`; failures return
/// to `Idle`, or stay in `Connecting` while a retry policy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}
