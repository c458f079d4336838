//! Transport seam between the connection driver and the network.
//!
//! A [`Transport`] opens a [`Link`]: a sink of outbound text messages and a
//! stream of inbound WebSocket messages. The production implementation is
//! [`WebSocketTransport`]; [`MemoryTransport`] is an in-process loopback
//! used by tests.

pub mod memory;
mod websocket;

pub use memory::{MemoryBroker, MemoryPeer, MemoryTransport};
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use futures::{Sink, Stream};
use std::fmt;
use std::pin::Pin;

/// One inbound WebSocket data message
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

pub type WireSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type WireStream = Pin<Box<dyn Stream<Item = Result<WireMessage, TransportError>> + Send>>;

/// An open duplex connection to the broker endpoint.
pub struct Link {
    pub sink: WireSink,
    pub stream: WireStream,
}

/// Opens links to a broker endpoint.
///
/// Implementations must not retry on their own; retry policy belongs to the
/// connection manager.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError>;
}

/// Transport-level failures
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Endpoint could not be reached (DNS, TCP, TLS, timeout)
    Unreachable(String),
    /// The WebSocket upgrade was refused
    Rejected { status: u16, reason: String },
    /// The link closed
    Closed { code: Option<u16>, reason: String },
    /// WebSocket protocol violation
    Protocol(String),
}

impl TransportError {
    pub fn closed(reason: impl Into<String>) -> Self {
        TransportError::Closed {
            code: None,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unreachable(reason) => write!(f, "endpoint unreachable: {}", reason),
            TransportError::Rejected { status, reason } => {
                write!(f, "upgrade rejected with HTTP {}: {}", status, reason)
            }
            TransportError::Closed { code: Some(code), reason } => {
                write!(f, "connection closed ({}): {}", code, reason)
            }
            TransportError::Closed { code: None, reason } => {
                write!(f, "connection closed: {}", reason)
            }
            TransportError::Protocol(reason) => write!(f, "websocket protocol error: {}", reason),
        }
    }
}

impl std::error::Error for TransportError {}
