use super::shared::Shared;
use super::{ConnectionError, RetryPolicy};
use crate::config::ConnectionConfig;
use crate::stomp::{decode_frames, Command, Frame, Heartbeat, HEARTBEAT_EOL};
use crate::subscription::{deliver, RouteOutcome};
use crate::transport::{Link, Transport, WireMessage};
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Requests from the manager to its driver task
#[derive(Debug)]
pub(crate) enum DriverCommand {
    Subscribe { wire_id: String, topic: String },
    Unsubscribe { wire_id: String },
    /// Tear down gracefully; `epoch` is the manager's epoch after the
    /// disconnect was requested.
    Shutdown { epoch: u64 },
}

enum SessionEnd {
    /// `None` when every manager handle was dropped
    Shutdown(Option<u64>),
    Failed {
        error: ConnectionError,
        connected: bool,
    },
    Stale,
}

/// Owns one logical connection: connects, runs sessions and reconnects
/// according to the retry policy.
pub(crate) struct Driver {
    shared: Weak<Shared>,
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    retry: RetryPolicy,
    epoch: u64,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
}

impl Driver {
    pub(crate) fn new(
        shared: &Arc<Shared>,
        epoch: u64,
        commands: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            transport: Arc::clone(&shared.transport),
            config: shared.config.clone(),
            retry: shared.retry.clone(),
            epoch,
            commands,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            let end = self.session().await;

            // A disconnect racing with the end of the session wins
            if !matches!(end, SessionEnd::Shutdown(_)) {
                if let Some(epoch) = self.pending_shutdown() {
                    self.finish_shutdown(Some(epoch));
                    return;
                }
            }

            let (error, connected) = match end {
                SessionEnd::Shutdown(epoch) => {
                    self.finish_shutdown(epoch);
                    return;
                }
                SessionEnd::Stale => {
                    debug!(epoch = self.epoch, "Driver superseded, exiting");
                    return;
                }
                SessionEnd::Failed { error, connected } => (error, connected),
            };

            if connected {
                attempt = 0;
            }
            let retrying = error.is_retryable() && self.retry.should_retry(attempt);

            {
                let Some(shared) = self.shared.upgrade() else {
                    return;
                };
                if !shared.connection_failed(self.epoch, retrying) {
                    return;
                }
                warn!(error = %error, retrying = retrying, "Connection failed");
                shared.emit_error(&error);
                if !retrying {
                    shared.emit_disconnected();
                    return;
                }
            }

            let delay = self.retry.delay_for(attempt);
            attempt += 1;
            info!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting after backoff"
            );
            if let Some(end) = self.backoff(delay).await {
                if let SessionEnd::Shutdown(epoch) = end {
                    self.finish_shutdown(epoch);
                }
                return;
            }
        }
    }

    /// Drain queued commands, returning the epoch of a queued shutdown.
    ///
    /// Subscribe/Unsubscribe left in the queue refer to a dead link and
    /// are discarded; replay covers them on the next session.
    fn pending_shutdown(&mut self) -> Option<u64> {
        while let Ok(command) = self.commands.try_recv() {
            if let DriverCommand::Shutdown { epoch } = command {
                return Some(epoch);
            }
        }
        None
    }

    /// Wait out a retry delay. Returns `Some` if the driver must stop.
    async fn backoff(&mut self, delay: Duration) -> Option<SessionEnd> {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return None,
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Shutdown { epoch }) => {
                        return Some(SessionEnd::Shutdown(Some(epoch)));
                    }
                    Some(_) => continue,
                    None => return Some(SessionEnd::Shutdown(None)),
                },
            }
        }
    }

    fn finish_shutdown(&self, epoch: Option<u64>) {
        let (Some(epoch), Some(shared)) = (epoch, self.shared.upgrade()) else {
            return;
        };
        if shared.finish_shutdown(epoch) {
            info!("Disconnected");
            shared.emit_disconnected();
        }
    }

    async fn session(&mut self) -> SessionEnd {
        info!(endpoint = %self.config.url, "Connecting to broker");

        // Abandoning the handshake drops the half-open link
        let outcome = {
            let handshake = handshake(self.transport.as_ref(), &self.config);
            tokio::pin!(handshake);
            loop {
                tokio::select! {
                    biased;
                    command = self.commands.recv() => match command {
                        Some(DriverCommand::Shutdown { epoch }) => return SessionEnd::Shutdown(Some(epoch)),
                        None => return SessionEnd::Shutdown(None),
                        Some(command) => debug!(command = ?command, "Ignoring command during handshake"),
                    },
                    result = &mut handshake => break result,
                }
            }
        };

        let (mut link, heartbeat, early) = match outcome {
            Ok(established) => established,
            Err(error) => {
                return SessionEnd::Failed {
                    error,
                    connected: false,
                }
            }
        };

        let pending = match self.shared.upgrade() {
            Some(shared) => shared.begin_session(self.epoch),
            None => None,
        };
        let Some(pending) = pending else {
            let _ = link.sink.close().await;
            return SessionEnd::Stale;
        };

        for (wire_id, topic) in &pending {
            // A disconnect since CONNECTED: serve() picks up the shutdown
            if !self.is_current() {
                return self.serve(link, heartbeat).await;
            }
            debug!(topic = %topic, wire_id = %wire_id, "Replaying subscription");
            if let Err(error) = send_frame(&mut link, &Frame::subscribe(wire_id, topic)).await {
                return SessionEnd::Failed {
                    error,
                    connected: true,
                };
            }
        }

        if !self.is_current() {
            return self.serve(link, heartbeat).await;
        }
        info!(
            endpoint = %self.config.url,
            heartbeat = %heartbeat,
            replayed = pending.len(),
            "Connected to broker"
        );
        if let Some(shared) = self.shared.upgrade() {
            shared.emit_connected();
        }

        // Frames that arrived in the same message as CONNECTED
        if let Err(end) = self.handle_frames(early) {
            return end;
        }

        self.serve(link, heartbeat).await
    }

    /// Pump an established session until it ends.
    async fn serve(&mut self, mut link: Link, heartbeat: Heartbeat) -> SessionEnd {
        let mut outgoing = heartbeat_interval(heartbeat.outgoing);
        let mut last_inbound = Instant::now();

        loop {
            let read_deadline = if heartbeat.incoming.is_zero() {
                None
            } else {
                Some(last_inbound + heartbeat.incoming * 2)
            };

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(DriverCommand::Subscribe { wire_id, topic }) => {
                        debug!(topic = %topic, wire_id = %wire_id, "Subscribing");
                        if let Err(error) = send_frame(&mut link, &Frame::subscribe(&wire_id, &topic)).await {
                            return SessionEnd::Failed { error, connected: true };
                        }
                    }
                    Some(DriverCommand::Unsubscribe { wire_id }) => {
                        debug!(wire_id = %wire_id, "Unsubscribing");
                        if let Err(error) = send_frame(&mut link, &Frame::unsubscribe(&wire_id)).await {
                            return SessionEnd::Failed { error, connected: true };
                        }
                    }
                    Some(DriverCommand::Shutdown { epoch }) => {
                        self.close_gracefully(&mut link).await;
                        return SessionEnd::Shutdown(Some(epoch));
                    }
                    None => {
                        self.close_gracefully(&mut link).await;
                        return SessionEnd::Shutdown(None);
                    }
                },

                _ = tick(&mut outgoing) => {
                    trace!("Sending heart-beat");
                    if let Err(e) = link.sink.send(HEARTBEAT_EOL.to_string()).await {
                        return SessionEnd::Failed {
                            error: ConnectionError::from_link(e),
                            connected: true,
                        };
                    }
                }

                _ = sleep_until(read_deadline) => {
                    return SessionEnd::Failed {
                        error: ConnectionError::HeartbeatTimeout(heartbeat.incoming),
                        connected: true,
                    };
                }

                next = link.stream.next() => {
                    last_inbound = Instant::now();
                    match next {
                        Some(Ok(message)) => {
                            if let Err(end) = self.handle_inbound(message) {
                                return end;
                            }
                        }
                        Some(Err(e)) => {
                            return SessionEnd::Failed {
                                error: ConnectionError::from_link(e),
                                connected: true,
                            };
                        }
                        None => {
                            return SessionEnd::Failed {
                                error: ConnectionError::ConnectionLost("stream ended".to_string()),
                                connected: true,
                            };
                        }
                    }
                }
            }
        }
    }

    /// The session still belongs to the manager's current connection.
    fn is_current(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(false, |shared| shared.session_current(self.epoch))
    }

    fn handle_inbound(&self, message: WireMessage) -> Result<(), SessionEnd> {
        let Some(text) = message_text(message) else {
            return Ok(());
        };

        let frames = decode_frames(&text).map_err(|e| SessionEnd::Failed {
            error: ConnectionError::Protocol(e.to_string()),
            connected: true,
        })?;
        self.handle_frames(frames)
    }

    fn handle_frames(&self, frames: Vec<Frame>) -> Result<(), SessionEnd> {
        for frame in frames {
            match frame.command {
                Command::Message => self.dispatch(&frame),
                Command::Error => {
                    let message = frame.header("message").unwrap_or("ERROR frame").to_string();
                    return Err(SessionEnd::Failed {
                        error: ConnectionError::Broker {
                            message,
                            details: frame.body,
                        },
                        connected: true,
                    });
                }
                Command::Receipt => {
                    debug!(receipt = ?frame.header("receipt-id"), "Receipt");
                }
                other => {
                    debug!(command = %other, "Ignoring unexpected frame");
                }
            }
        }
        Ok(())
    }

    fn dispatch(&self, frame: &Frame) {
        let outcome = match self.shared.upgrade() {
            Some(shared) => shared.route(self.epoch, frame),
            None => None,
        };

        match outcome {
            None => {
                trace!(destination = ?frame.header("destination"), "Dropping message for torn-down connection");
            }
            Some(RouteOutcome::Deliver { topic, subscribers }) => {
                let delivered = deliver(&topic, &frame.body, &subscribers);
                trace!(topic = %topic, delivered = delivered, "Message delivered");
            }
            Some(RouteOutcome::Duplicate { topic, message_id }) => {
                debug!(topic = %topic, message_id = %message_id, "Dropping duplicate message");
            }
            Some(RouteOutcome::Unrouted) => {
                debug!(
                    destination = ?frame.header("destination"),
                    subscription = ?frame.header("subscription"),
                    "No subscribers for message"
                );
            }
        }
    }

    /// DISCONNECT, wait briefly for the receipt, then close the link.
    async fn close_gracefully(&self, link: &mut Link) {
        let receipt = format!("disconnect-{}", Uuid::new_v4());
        if send_frame(link, &Frame::disconnect(&receipt)).await.is_err() {
            return;
        }

        let wait = async {
            loop {
                let next = link.stream.next().await;
                let Some(Ok(message)) = next else {
                    return;
                };
                let Some(text) = message_text(message) else {
                    continue;
                };
                let receipted = decode_frames(&text).map_or(false, |frames| {
                    frames.iter().any(|f| {
                        f.command == Command::Receipt && f.header("receipt-id") == Some(receipt.as_str())
                    })
                });
                if receipted {
                    return;
                }
            }
        };

        if time::timeout(self.config.disconnect_timeout(), wait).await.is_err() {
            debug!("No receipt for DISCONNECT, closing anyway");
        }
        let _ = link.sink.close().await;
    }
}

/// Link, negotiated heart-beat and any frames that followed CONNECTED in
/// the same message
type Established = (Link, Heartbeat, Vec<Frame>);

/// Open the link and exchange CONNECT/CONNECTED within the connect timeout.
async fn handshake(
    transport: &dyn Transport,
    config: &ConnectionConfig,
) -> Result<Established, ConnectionError> {
    match time::timeout(config.connect_timeout(), exchange(transport, config)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::HandshakeTimeout(config.connect_timeout())),
    }
}

async fn exchange(
    transport: &dyn Transport,
    config: &ConnectionConfig,
) -> Result<Established, ConnectionError> {
    let offer = config.heartbeat();
    let mut link = transport
        .open(&config.url)
        .await
        .map_err(ConnectionError::from_open)?;

    send_frame(&mut link, &Frame::connect(&config.host, offer)).await?;

    loop {
        let next = link.stream.next().await;
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(ConnectionError::from_open(e)),
            None => {
                return Err(ConnectionError::HandshakeRejected(
                    "connection closed before CONNECTED".to_string(),
                ))
            }
        };
        let Some(text) = message_text(message) else {
            continue;
        };
        let frames = decode_frames(&text).map_err(|e| ConnectionError::Protocol(e.to_string()))?;

        // Heart-beat only messages decode to nothing; keep waiting
        let mut frames = frames.into_iter();
        let Some(frame) = frames.next() else {
            continue;
        };
        return match frame.command {
            Command::Connected => {
                let server = frame
                    .header("heart-beat")
                    .and_then(Heartbeat::parse)
                    .unwrap_or_default();
                Ok((link, Heartbeat::negotiate(offer, server), frames.collect()))
            }
            Command::Error => {
                let message = frame.header("message").unwrap_or("ERROR frame");
                Err(ConnectionError::HandshakeRejected(message.to_string()))
            }
            other => Err(ConnectionError::Protocol(format!(
                "expected CONNECTED, got {}",
                other
            ))),
        };
    }
}

async fn send_frame(link: &mut Link, frame: &Frame) -> Result<(), ConnectionError> {
    link.sink
        .send(frame.encode())
        .await
        .map_err(ConnectionError::from_link)
}

/// Text of an inbound message; binary payloads must be UTF-8.
fn message_text(message: WireMessage) -> Option<String> {
    match message {
        WireMessage::Text(text) => Some(text),
        WireMessage::Binary(data) => match String::from_utf8(data) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "Dropping non-UTF-8 binary message");
                None
            }
        },
    }
}

fn heartbeat_interval(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
