use super::{Link, Transport, TransportError, WireMessage};
use crate::stomp::SUB_PROTOCOLS;
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{
    self, client::IntoClientRequest, http::HeaderValue, protocol::Message,
};
use tracing::debug;

/// WebSocket transport over `tokio-tungstenite`
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError> {
        let mut request = endpoint.into_client_request().map_err(|e| {
            TransportError::Unreachable(format!("invalid endpoint '{}': {}", endpoint, e))
        })?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUB_PROTOCOLS),
        );

        let (ws, response) = match tokio::time::timeout(self.connect_timeout, connect_async(request)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(map_ws_error(e)),
            Err(_) => {
                return Err(TransportError::Unreachable(format!(
                    "no upgrade response within {:?}",
                    self.connect_timeout
                )))
            }
        };

        debug!(
            endpoint = %endpoint,
            protocol = ?response.headers().get("sec-websocket-protocol"),
            "WebSocket upgraded"
        );

        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(map_ws_error)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(WireMessage::Text(text))),
                Ok(Message::Binary(data)) => Some(Ok(WireMessage::Binary(data))),
                Ok(Message::Close(frame)) => Some(Err(match frame {
                    Some(frame) => TransportError::Closed {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.to_string(),
                    },
                    None => TransportError::closed("server sent close"),
                })),
                // Ping/pong are answered by tungstenite
                Ok(_) => None,
                Err(e) => Some(Err(map_ws_error(e))),
            })
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .filter(|b| !b.is_empty());
            TransportError::Rejected {
                status: status.as_u16(),
                reason: body.unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("upgrade refused").to_string()
                }),
            }
        }
        tungstenite::Error::Io(e) => TransportError::Unreachable(e.to_string()),
        tungstenite::Error::Url(e) => TransportError::Unreachable(e.to_string()),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::closed("websocket closed")
        }
        other => TransportError::Protocol(other.to_string()),
    }
}
