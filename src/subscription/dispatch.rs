use super::registry::Subscriber;
use crate::connection::observers::isolate;
use serde_json::Value;
use std::sync::atomic::Ordering;
use tracing::{trace, warn};

/// Decode a MESSAGE body as JSON.
pub fn decode_payload(body: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(body)
}

/// Decode `body` once and hand it to every live subscriber.
///
/// Undecodable bodies are dropped with a warning. Each callback runs in
/// isolation so a panicking subscriber does not affect the others. Returns
/// the number of callbacks that completed.
pub(crate) fn deliver(topic: &str, body: &str, subscribers: &[Subscriber]) -> usize {
    let payload = match decode_payload(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(topic = %topic, error = %e, "Dropping message with undecodable body");
            return 0;
        }
    };

    let mut delivered = 0;
    for subscriber in subscribers {
        // Re-checked per callback: an earlier callback may have cancelled it
        if !subscriber.live.load(Ordering::Acquire) {
            trace!(topic = %topic, subscription = %subscriber.id, "Skipping cancelled subscriber");
            continue;
        }
        if isolate("subscriber", || (subscriber.callback)(&payload)) {
            delivered += 1;
        }
    }
    delivered
}
