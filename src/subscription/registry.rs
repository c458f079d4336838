use super::SubscriptionId;
use crate::stomp::Frame;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// One local subscriber on a topic
#[derive(Clone)]
pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    pub(crate) callback: Callback,
    pub(crate) live: Arc<AtomicBool>,
}

/// Per-topic state: one wire subscription shared by all local subscribers
struct TopicEntry {
    seq: u64,
    wire_id: String,
    /// SUBSCRIBE has been sent on the current link
    on_wire: bool,
    subscribers: Vec<Subscriber>,
    recent: RecentIds,
}

pub(crate) struct Registration {
    pub(crate) id: SubscriptionId,
    pub(crate) live: Arc<AtomicBool>,
    /// Wire id to SUBSCRIBE now, if this was the first subscriber while connected
    pub(crate) wire_subscribe: Option<String>,
}

pub(crate) struct Removal {
    pub(crate) topic: String,
    /// Wire id to UNSUBSCRIBE, if the topic lost its last subscriber
    pub(crate) wire_unsubscribe: Option<String>,
    /// The removed subscriber. Its callback may own other handles, so it
    /// must be dropped after the registry lock is released.
    pub(crate) released: Option<Subscriber>,
}

pub(crate) enum RouteOutcome {
    Deliver {
        topic: String,
        subscribers: Vec<Subscriber>,
    },
    Duplicate {
        topic: String,
        message_id: String,
    },
    Unrouted,
}

/// Subscriptions keyed by topic, with reverse indexes by wire id and by
/// local handle id.
pub(crate) struct TopicRegistry {
    topics: HashMap<String, TopicEntry>,
    by_wire_id: HashMap<String, String>,
    by_handle: HashMap<SubscriptionId, String>,
    next_handle: u64,
    next_wire: u64,
    dedup_window: usize,
}

impl TopicRegistry {
    pub(crate) fn new(dedup_window: usize) -> Self {
        Self {
            topics: HashMap::new(),
            by_wire_id: HashMap::new(),
            by_handle: HashMap::new(),
            next_handle: 0,
            next_wire: 0,
            dedup_window,
        }
    }

    pub(crate) fn insert(&mut self, topic: &str, callback: Callback, connected: bool) -> Registration {
        self.next_handle += 1;
        let id = SubscriptionId(self.next_handle);
        let live = Arc::new(AtomicBool::new(true));

        let entry = match self.topics.entry(topic.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => {
                let seq = self.next_wire;
                self.next_wire += 1;
                let wire_id = format!("sub-{}", seq);
                self.by_wire_id.insert(wire_id.clone(), topic.to_string());
                v.insert(TopicEntry {
                    seq,
                    wire_id,
                    on_wire: false,
                    subscribers: Vec::new(),
                    recent: RecentIds::new(self.dedup_window),
                })
            }
        };

        let mut wire_subscribe = None;
        if connected && !entry.on_wire {
            entry.on_wire = true;
            wire_subscribe = Some(entry.wire_id.clone());
        }

        entry.subscribers.push(Subscriber {
            id,
            callback,
            live: Arc::clone(&live),
        });
        self.by_handle.insert(id, topic.to_string());

        Registration {
            id,
            live,
            wire_subscribe,
        }
    }

    /// Remove one subscriber. Returns `None` if it was already gone.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> Option<Removal> {
        let topic = self.by_handle.remove(&id)?;

        let mut released = None;
        let emptied = match self.topics.get_mut(&topic) {
            Some(entry) => {
                if let Some(pos) = entry.subscribers.iter().position(|s| s.id == id) {
                    let subscriber = entry.subscribers.remove(pos);
                    subscriber.live.store(false, Ordering::Release);
                    released = Some(subscriber);
                }
                entry.subscribers.is_empty()
            }
            None => false,
        };

        let mut wire_unsubscribe = None;
        if emptied {
            if let Some(entry) = self.topics.remove(&topic) {
                self.by_wire_id.remove(&entry.wire_id);
                if entry.on_wire {
                    wire_unsubscribe = Some(entry.wire_id);
                }
            }
        }

        Some(Removal {
            topic,
            wire_unsubscribe,
            released,
        })
    }

    /// Mark every topic not yet on the wire as subscribed and return
    /// `(wire_id, topic)` pairs in registration order.
    pub(crate) fn activate_pending(&mut self) -> Vec<(String, String)> {
        let mut pending: Vec<(u64, String, String)> = self
            .topics
            .iter_mut()
            .filter(|(_, entry)| !entry.on_wire)
            .map(|(topic, entry)| {
                entry.on_wire = true;
                (entry.seq, entry.wire_id.clone(), topic.clone())
            })
            .collect();
        pending.sort_by_key(|(seq, _, _)| *seq);
        pending
            .into_iter()
            .map(|(_, wire_id, topic)| (wire_id, topic))
            .collect()
    }

    /// Forget wire state after the link dropped; subscribers are kept.
    pub(crate) fn deactivate_wire(&mut self) {
        for entry in self.topics.values_mut() {
            entry.on_wire = false;
        }
    }

    /// Cancel every subscriber at once and hand them back.
    ///
    /// The caller drops the returned subscribers once it has released the
    /// registry lock.
    pub(crate) fn invalidate_all(&mut self) -> Vec<Subscriber> {
        let mut cancelled = Vec::with_capacity(self.by_handle.len());
        for (_, entry) in self.topics.drain() {
            for subscriber in entry.subscribers {
                subscriber.live.store(false, Ordering::Release);
                cancelled.push(subscriber);
            }
        }
        self.by_wire_id.clear();
        self.by_handle.clear();
        cancelled
    }

    /// Resolve a MESSAGE frame to its subscribers.
    ///
    /// Frames carrying a `subscription` header route by wire id only; the
    /// `destination` header is used when it is absent.
    pub(crate) fn route(&mut self, frame: &Frame) -> RouteOutcome {
        let topic = match frame.header("subscription") {
            Some(wire_id) => self.by_wire_id.get(wire_id).cloned(),
            None => frame
                .header("destination")
                .filter(|d| self.topics.contains_key(*d))
                .map(str::to_string),
        };

        let Some(topic) = topic else {
            return RouteOutcome::Unrouted;
        };
        let Some(entry) = self.topics.get_mut(&topic) else {
            return RouteOutcome::Unrouted;
        };

        if let Some(message_id) = frame.header("message-id") {
            if !entry.recent.observe(message_id) {
                return RouteOutcome::Duplicate {
                    topic,
                    message_id: message_id.to_string(),
                };
            }
        }

        RouteOutcome::Deliver {
            subscribers: entry.subscribers.clone(),
            topic,
        }
    }

    pub(crate) fn subscriptions(&self) -> Vec<(SubscriptionId, String)> {
        let mut all: Vec<_> = self
            .by_handle
            .iter()
            .map(|(id, topic)| (*id, topic.clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub(crate) fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub(crate) fn wire_id(&self, topic: &str) -> Option<&str> {
        self.topics.get(topic).map(|entry| entry.wire_id.as_str())
    }
}

/// Bounded memory of recently seen message-ids
struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Record `id`; false if it was already seen.
    fn observe(&mut self, id: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}
