use super::driver::DriverCommand;
use super::observers::{isolate, Observers};
use super::{ConnectionError, ConnectionState, RetryPolicy};
use crate::config::ConnectionConfig;
use crate::stomp::Frame;
use crate::subscription::{RouteOutcome, SubscriptionId, TopicRegistry};
use crate::transport::Transport;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// State shared by every manager clone, every subscription handle and the
/// driver task.
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    observers: Mutex<Observers>,
    pub(crate) config: ConnectionConfig,
    pub(crate) retry: RetryPolicy,
    pub(crate) transport: Arc<dyn Transport>,
}

/// Connection state and registry, guarded together so a transition and the
/// subscriptions it affects always change atomically.
pub(crate) struct Inner {
    pub(crate) state: ConnectionState,
    /// Bumped by every connect and disconnect; a driver whose epoch no
    /// longer matches must not touch state or deliver messages.
    pub(crate) epoch: u64,
    pub(crate) commands: Option<mpsc::UnboundedSender<DriverCommand>>,
    pub(crate) registry: TopicRegistry,
    state_tx: watch::Sender<ConnectionState>,
}

impl Inner {
    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Connection state changed");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// Queue a command for the driver. False if there is no live driver.
    pub(crate) fn send(&self, command: DriverCommand) -> bool {
        match &self.commands {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.is_current(epoch) && self.state == ConnectionState::Connected
    }
}

impl Shared {
    pub(crate) fn new(
        config: ConnectionConfig,
        retry: RetryPolicy,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                epoch: 0,
                commands: None,
                registry: TopicRegistry::new(config.dedup_window),
                state_tx,
            }),
            observers: Mutex::new(Observers::default()),
            config,
            retry,
            transport,
        }
    }

    /// Never held across an await or while running consumer callbacks.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn observers(&self) -> MutexGuard<'_, Observers> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.lock().state_tx.subscribe()
    }

    // Lifecycle notifications. Handlers are snapshotted first so they may
    // register or remove observers themselves.

    pub(crate) fn emit_connected(&self) {
        let handlers = self.observers().connected();
        for handler in handlers {
            isolate("on_connected", || handler());
        }
    }

    pub(crate) fn emit_error(&self, error: &ConnectionError) {
        let handlers = self.observers().errors();
        for handler in handlers {
            isolate("on_error", || handler(error));
        }
    }

    pub(crate) fn emit_disconnected(&self) {
        let handlers = self.observers().disconnected();
        for handler in handlers {
            isolate("on_disconnected", || handler());
        }
    }

    // Driver-side transitions. Each returns `None`/`false` when the driver's
    // epoch is stale.

    /// CONNECTED received: enter `Connected` and collect the subscriptions
    /// to replay.
    pub(crate) fn begin_session(&self, epoch: u64) -> Option<Vec<(String, String)>> {
        let mut inner = self.lock();
        if !inner.is_current(epoch) || inner.state != ConnectionState::Connecting {
            return None;
        }
        inner.set_state(ConnectionState::Connected);
        Some(inner.registry.activate_pending())
    }

    /// The connection attempt or session failed.
    ///
    /// While retrying, subscriptions survive and are replayed on the next
    /// session. Otherwise every subscription is invalidated.
    pub(crate) fn connection_failed(&self, epoch: u64, retrying: bool) -> bool {
        let released = {
            let mut inner = self.lock();
            if !inner.is_current(epoch) {
                return false;
            }
            if retrying {
                inner.registry.deactivate_wire();
                inner.set_state(ConnectionState::Connecting);
                Vec::new()
            } else {
                let released = inner.registry.invalidate_all();
                inner.commands = None;
                inner.set_state(ConnectionState::Idle);
                released
            }
        };
        drop(released);
        true
    }

    /// Graceful shutdown finished. True if this moved the state to `Idle`.
    pub(crate) fn finish_shutdown(&self, epoch: u64) -> bool {
        let mut inner = self.lock();
        if !inner.is_current(epoch) || inner.state != ConnectionState::Disconnecting {
            return false;
        }
        inner.set_state(ConnectionState::Idle);
        true
    }

    /// True while the session of `epoch` is the live, connected one.
    pub(crate) fn session_current(&self, epoch: u64) -> bool {
        self.lock().is_live(epoch)
    }

    /// Route an inbound MESSAGE, or `None` if the driver is stale.
    pub(crate) fn route(&self, epoch: u64, frame: &Frame) -> Option<RouteOutcome> {
        let mut inner = self.lock();
        if !inner.is_live(epoch) {
            return None;
        }
        Some(inner.registry.route(frame))
    }

    /// Remove one subscriber, sending UNSUBSCRIBE if its topic is now empty.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removal = {
            let mut inner = self.lock();
            let Some(mut removal) = inner.registry.remove(id) else {
                return false;
            };
            if let Some(wire_id) = removal.wire_unsubscribe.take() {
                if inner.state == ConnectionState::Connected {
                    inner.send(DriverCommand::Unsubscribe { wire_id });
                }
            }
            removal
        };
        debug!(subscription = %id, topic = %removal.topic, "Unsubscribed");
        // Dropping the callback may cancel handles it owned
        drop(removal);
        true
    }
}
