use crate::connection::shared::Shared;
use crate::connection::ConnectionState;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Identifies one local subscription (not the wire-level `sub-N` id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why `subscribe` refused a registration
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeError {
    EmptyTopic,
    /// Queueing while disconnected is turned off
    NotConnected(ConnectionState),
}

impl fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeError::EmptyTopic => write!(f, "topic must not be empty"),
            SubscribeError::NotConnected(state) => {
                write!(f, "cannot subscribe while {}", state)
            }
        }
    }
}

impl std::error::Error for SubscribeError {}

/// Owner of one active subscription.
///
/// Dropping the handle cancels the subscription; call [`detach`] to keep it
/// registered for the life of the connection instead.
///
/// [`detach`]: SubscriptionHandle::detach
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
    live: Arc<AtomicBool>,
    shared: Weak<Shared>,
    detached: bool,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        topic: String,
        live: Arc<AtomicBool>,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            topic,
            live,
            shared,
            detached: false,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// False once unsubscribed, or once the connection it belonged to was
    /// torn down.
    pub fn is_active(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Stop delivery to this subscriber. Safe to call more than once and
    /// from inside the subscriber's own callback.
    pub fn unsubscribe(&self) {
        if !self.is_active() {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.unsubscribe(self.id);
        }
    }

    /// Release ownership without cancelling.
    ///
    /// The subscription can still be cancelled with
    /// `ConnectionManager::unsubscribe_by_id`.
    pub fn detach(mut self) -> SubscriptionId {
        self.detached = true;
        self.id
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.unsubscribe();
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}
