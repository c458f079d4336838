// Client configuration
pub mod config;

// Connection lifecycle, observers and reconnect policy
pub mod connection;

// STOMP frame codec
pub mod stomp;

// Topic subscriptions and delivery
pub mod subscription;

// WebSocket and in-memory transports
pub mod transport;

pub use config::{load_config, ConnectionConfig, LiveConfig};
pub use connection::{
    ConnectionError, ConnectionManager, ConnectionScope, ConnectionState, ObserverId, RetryPolicy,
};
pub use subscription::{SubscribeError, SubscriptionHandle, SubscriptionId};
