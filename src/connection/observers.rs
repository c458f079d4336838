use super::ConnectionError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

pub(crate) type ConnectedHandler = Arc<dyn Fn() + Send + Sync>;
pub(crate) type ErrorHandler = Arc<dyn Fn(&ConnectionError) + Send + Sync>;
pub(crate) type DisconnectedHandler = Arc<dyn Fn() + Send + Sync>;

/// Token returned when registering a lifecycle observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered handler lists, one per lifecycle event.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    connected: Vec<(ObserverId, ConnectedHandler)>,
    errors: Vec<(ObserverId, ErrorHandler)>,
    disconnected: Vec<(ObserverId, DisconnectedHandler)>,
}

impl Observers {
    fn next(&mut self) -> ObserverId {
        self.next_id += 1;
        ObserverId(self.next_id)
    }

    pub(crate) fn add_connected(&mut self, handler: ConnectedHandler) -> ObserverId {
        let id = self.next();
        self.connected.push((id, handler));
        id
    }

    pub(crate) fn add_error(&mut self, handler: ErrorHandler) -> ObserverId {
        let id = self.next();
        self.errors.push((id, handler));
        id
    }

    pub(crate) fn add_disconnected(&mut self, handler: DisconnectedHandler) -> ObserverId {
        let id = self.next();
        self.disconnected.push((id, handler));
        id
    }

    pub(crate) fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.len();
        self.connected.retain(|(i, _)| *i != id);
        self.errors.retain(|(i, _)| *i != id);
        self.disconnected.retain(|(i, _)| *i != id);
        self.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.connected.len() + self.errors.len() + self.disconnected.len()
    }

    pub(crate) fn connected(&self) -> Vec<ConnectedHandler> {
        self.connected.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub(crate) fn errors(&self) -> Vec<ErrorHandler> {
        self.errors.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub(crate) fn disconnected(&self) -> Vec<DisconnectedHandler> {
        self.disconnected.iter().map(|(_, h)| Arc::clone(h)).collect()
    }
}

/// Run a consumer-supplied handler, containing any panic.
///
/// Returns false if the handler panicked.
pub(crate) fn isolate(kind: &'static str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            warn!(
                handler = kind,
                panic = %panic_message(payload.as_ref()),
                "Handler panicked; continuing with remaining handlers"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
