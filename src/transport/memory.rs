//! In-process loopback transport.
//!
//! [`MemoryTransport`] plays the client side; every successful `open` hands
//! a [`MemoryPeer`] to the paired [`MemoryBroker`], which scripts the server
//! side of the conversation frame by frame.

use super::{Link, Transport, TransportError, WireMessage};
use crate::stomp::{decode_frames, Command, Frame, Heartbeat};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Client side of the loopback
#[derive(Clone)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Arc<Mutex<VecDeque<TransportError>>>,
    opened: Arc<AtomicUsize>,
}

/// Receives the server side of each opened link
pub struct MemoryBroker {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryBroker) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: peers_tx,
                refusals: Arc::new(Mutex::new(VecDeque::new())),
                opened: Arc::new(AtomicUsize::new(0)),
            },
            MemoryBroker { peers: peers_rx },
        )
    }

    /// Fail the next `open` with `error` instead of creating a link.
    pub fn refuse_next(&self, error: TransportError) {
        let mut refusals = self.refusals.lock().unwrap_or_else(|e| e.into_inner());
        refusals.push_back(error);
    }

    /// Number of `open` calls made so far, refused ones included.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, endpoint: &str) -> Result<Link, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let refusal = {
            let mut refusals = self.refusals.lock().unwrap_or_else(|e| e.into_inner());
            refusals.pop_front()
        };
        if let Some(error) = refusal {
            return Err(error);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            endpoint: endpoint.to_string(),
            outbound: outbound_rx,
            inbound: inbound_tx,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Unreachable("memory broker is gone".to_string()))?;

        let sink = futures::sink::unfold(outbound_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| TransportError::closed("memory peer dropped"))?;
            Ok::<_, TransportError>(tx)
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(UnboundedReceiverStream::new(inbound_rx)),
        })
    }
}

impl MemoryBroker {
    /// Wait for the next opened link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

/// Server side of one loopback link.
///
/// Dropping the peer ends the client's inbound stream, which the client
/// sees as the connection being lost.
pub struct MemoryPeer {
    pub endpoint: String,
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Result<WireMessage, TransportError>>,
}

impl MemoryPeer {
    /// Next raw text message written by the client.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next STOMP frame written by the client, skipping heart-beats.
    ///
    /// Returns `None` once the client closed the link or sent data that does
    /// not decode.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let text = self.outbound.recv().await?;
            let mut frames = decode_frames(&text).ok()?;
            if !frames.is_empty() {
                return Some(frames.remove(0));
            }
        }
    }

    /// Read the client's CONNECT and answer with CONNECTED.
    pub async fn complete_handshake(&mut self, heartbeat: Heartbeat) -> Option<Frame> {
        let connect = self.next_frame().await?;
        if !matches!(connect.command, Command::Connect | Command::Stomp) {
            return None;
        }
        let connected = Frame::new(Command::Connected)
            .with_header("version", "1.2")
            .with_header("heart-beat", heartbeat.to_string());
        self.send_frame(&connected);
        Some(connect)
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_text(frame.encode())
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Ok(WireMessage::Text(text.into()))).is_ok()
    }

    pub fn send_binary(&self, data: Vec<u8>) -> bool {
        self.inbound.send(Ok(WireMessage::Binary(data))).is_ok()
    }

    /// Deliver a MESSAGE frame for `destination` routed to `subscription`.
    pub fn publish(&self, subscription: &str, destination: &str, message_id: &str, body: &str) -> bool {
        let frame = Frame::new(Command::Message)
            .with_header("destination", destination)
            .with_header("subscription", subscription)
            .with_header("message-id", message_id)
            .with_header("content-type", "application/json")
            .with_body(body);
        self.send_frame(&frame)
    }

    /// Surface a transport error on the client's inbound stream.
    pub fn fail(&self, error: TransportError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }
}
