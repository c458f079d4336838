use crate::transport::TransportError;
use std::fmt;
use std::time::Duration;

/// Reason reported to `on_error` observers when a connection attempt or an
/// established connection fails.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Network unreachable (DNS, TCP, TLS, upgrade timeout)
    Unreachable(String),
    /// Upgrade refused or broker answered CONNECT with ERROR
    HandshakeRejected(String),
    /// No CONNECTED frame within the connect timeout
    HandshakeTimeout(Duration),
    /// Malformed frames or unexpected protocol flow
    Protocol(String),
    /// Broker sent an ERROR frame on an established connection
    Broker { message: String, details: String },
    /// Established connection closed or failed
    ConnectionLost(String),
    /// No traffic within twice the negotiated heart-beat interval
    HeartbeatTimeout(Duration),
    /// `connect()` called outside a tokio runtime
    NoRuntime,
}

impl ConnectionError {
    /// Whether a retry policy may try again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::Unreachable(_)
                | ConnectionError::HandshakeTimeout(_)
                | ConnectionError::Broker { .. }
                | ConnectionError::ConnectionLost(_)
                | ConnectionError::HeartbeatTimeout(_)
        )
    }

    /// Map a failure to open the link.
    pub(crate) fn from_open(err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(reason) => ConnectionError::Unreachable(reason),
            TransportError::Rejected { status, reason } => {
                ConnectionError::HandshakeRejected(format!("HTTP {}: {}", status, reason))
            }
            TransportError::Protocol(reason) => ConnectionError::Protocol(reason),
            closed @ TransportError::Closed { .. } => {
                ConnectionError::HandshakeRejected(closed.to_string())
            }
        }
    }

    /// Map a failure on an open link.
    pub(crate) fn from_link(err: TransportError) -> Self {
        match err {
            TransportError::Protocol(reason) => ConnectionError::Protocol(reason),
            other => ConnectionError::ConnectionLost(other.to_string()),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Unreachable(reason) => write!(f, "broker unreachable: {}", reason),
            ConnectionError::HandshakeRejected(reason) => {
                write!(f, "handshake rejected: {}", reason)
            }
            ConnectionError::HandshakeTimeout(timeout) => {
                write!(f, "no CONNECTED frame within {:?}", timeout)
            }
            ConnectionError::Protocol(reason) => write!(f, "protocol error: {}", reason),
            ConnectionError::Broker { message, details } if details.is_empty() => {
                write!(f, "broker error: {}", message)
            }
            ConnectionError::Broker { message, details } => {
                write!(f, "broker error: {} ({})", message, details)
            }
            ConnectionError::ConnectionLost(reason) => write!(f, "connection lost: {}", reason),
            ConnectionError::HeartbeatTimeout(interval) => {
                write!(f, "no heart-beat from broker (interval {:?})", interval)
            }
            ConnectionError::NoRuntime => write!(f, "connect() requires a tokio runtime"),
        }
    }
}

impl std::error::Error for ConnectionError {}
