use super::driver::{Driver, DriverCommand};
use super::observers::ObserverId;
use super::shared::Shared;
use super::{ConnectionError, ConnectionState, RetryPolicy};
use crate::config::{ConnectionConfig, LiveConfig};
use crate::subscription::{Callback, SubscribeError, SubscriptionHandle, SubscriptionId};
use crate::transport::{Transport, WebSocketTransport};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Client for one STOMP-over-WebSocket broker connection.
///
/// Cheap to clone; all clones share the same connection, subscriptions and
/// observers. The background driver task disconnects and stops once every
/// clone is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Manager using the WebSocket transport.
    pub fn new(config: ConnectionConfig, retry: RetryPolicy) -> Self {
        let transport = WebSocketTransport::new(config.connect_timeout());
        Self::with_transport(config, retry, Arc::new(transport))
    }

    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(config.connection.clone(), config.retry.clone())
    }

    pub fn with_transport(
        config: ConnectionConfig,
        retry: RetryPolicy,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, retry, transport)),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Start connecting in the background.
    ///
    /// No-op while connecting or connected. Outcomes are reported through
    /// `on_connected` and `on_error`. Must be called from within a tokio
    /// runtime; otherwise `ConnectionError::NoRuntime` is reported.
    pub fn connect(&self) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("connect() called outside a tokio runtime");
                self.shared.emit_error(&ConnectionError::NoRuntime);
                return;
            }
        };

        let (epoch, commands) = {
            let mut inner = self.shared.lock();
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!(state = %inner.state, "Already connecting or connected");
                return;
            }
            inner.epoch += 1;
            let (tx, rx) = mpsc::unbounded_channel();
            inner.commands = Some(tx);
            inner.set_state(ConnectionState::Connecting);
            (inner.epoch, rx)
        };

        let driver = Driver::new(&self.shared, epoch, commands);
        runtime.spawn(driver.run());
    }

    /// Connect, disconnecting again when the returned scope is dropped.
    pub fn connect_scoped(&self) -> ConnectionScope {
        self.connect();
        ConnectionScope {
            manager: self.clone(),
        }
    }

    /// Tear down the connection.
    ///
    /// Every subscription is invalidated immediately; no callback starts
    /// after this returns. Safe to call repeatedly and in any state.
    pub fn disconnect(&self) {
        let (released, driver_notified) = {
            let mut inner = self.shared.lock();
            if matches!(
                inner.state,
                ConnectionState::Idle | ConnectionState::Disconnecting
            ) {
                debug!(state = %inner.state, "Nothing to disconnect");
                return;
            }
            inner.epoch += 1;
            let epoch = inner.epoch;
            let released = inner.registry.invalidate_all();
            inner.set_state(ConnectionState::Disconnecting);

            let notified = inner
                .commands
                .take()
                .map_or(false, |tx| tx.send(DriverCommand::Shutdown { epoch }).is_ok());
            if !notified {
                inner.set_state(ConnectionState::Idle);
            }
            (released, notified)
        };

        info!(cancelled = released.len(), "Disconnecting from broker");
        drop(released);
        if !driver_notified {
            self.shared.emit_disconnected();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions. Intermediate states may be coalesced.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_changes()
    }

    /// Resolve once the state equals `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut changes = self.state_changes();
        let _ = changes.wait_for(|state| *state == target).await;
    }

    /// Deliver every decoded JSON message on `topic` to `callback`.
    ///
    /// Multiple subscribers on one topic share a single wire subscription.
    /// While not connected the subscription is queued and sent on the next
    /// successful connect, unless `queue_while_disconnected` is off.
    pub fn subscribe<F>(
        &self,
        topic: impl Into<String>,
        callback: F,
    ) -> Result<SubscriptionHandle, SubscribeError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(topic.into(), Arc::new(callback))
    }

    /// Like [`subscribe`](Self::subscribe), deserializing each payload into
    /// `T`. Payloads that do not fit `T` are dropped with a warning.
    pub fn subscribe_typed<T, F>(
        &self,
        topic: impl Into<String>,
        callback: F,
    ) -> Result<SubscriptionHandle, SubscribeError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let name = topic.clone();
        self.register(
            topic,
            Arc::new(move |payload: &Value| match T::deserialize(payload) {
                Ok(typed) => callback(typed),
                Err(e) => {
                    warn!(topic = %name, error = %e, "Payload does not match subscriber type, dropping");
                }
            }),
        )
    }

    fn register(
        &self,
        topic: String,
        callback: Callback,
    ) -> Result<SubscriptionHandle, SubscribeError> {
        if topic.trim().is_empty() {
            return Err(SubscribeError::EmptyTopic);
        }

        let mut inner = self.shared.lock();
        let connected = inner.state == ConnectionState::Connected;
        if !connected && !self.shared.config.queue_while_disconnected {
            return Err(SubscribeError::NotConnected(inner.state));
        }

        let registration = inner.registry.insert(&topic, callback, connected);
        if let Some(wire_id) = registration.wire_subscribe {
            inner.send(DriverCommand::Subscribe {
                wire_id,
                topic: topic.clone(),
            });
        }
        debug!(
            topic = %topic,
            subscription = %registration.id,
            queued = !connected,
            "Subscribed"
        );

        Ok(SubscriptionHandle::new(
            registration.id,
            topic,
            registration.live,
            Arc::downgrade(&self.shared),
        ))
    }

    /// Cancel a subscription by id. False if it was not active.
    pub fn unsubscribe_by_id(&self, id: SubscriptionId) -> bool {
        self.shared.unsubscribe(id)
    }

    /// Active subscriptions as `(id, topic)`, oldest first.
    pub fn subscriptions(&self) -> Vec<(SubscriptionId, String)> {
        self.shared.lock().registry.subscriptions()
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.lock().registry.len()
    }

    /// Distinct topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.shared.lock().registry.topic_count()
    }

    pub fn on_connected<F>(&self, handler: F) -> ObserverId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.observers().add_connected(Arc::new(handler))
    }

    pub fn on_error<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        self.shared.observers().add_error(Arc::new(handler))
    }

    pub fn on_disconnected<F>(&self, handler: F) -> ObserverId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.observers().add_disconnected(Arc::new(handler))
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.observers().remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.shared.observers().len()
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("ConnectionManager")
            .field("url", &self.shared.config.url)
            .field("state", &inner.state)
            .field("subscriptions", &inner.registry.len())
            .finish()
    }
}

/// Disconnects its manager when dropped.
pub struct ConnectionScope {
    manager: ConnectionManager,
}

impl ConnectionScope {
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

impl Deref for ConnectionScope {
    type Target = ConnectionManager;

    fn deref(&self) -> &ConnectionManager {
        &self.manager
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        self.manager.disconnect();
    }
}
