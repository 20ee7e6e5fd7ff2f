//! Named-topic publish/subscribe event bus.
//!
//! Producers publish an [`Event`] under a dotted topic name (see
//! [`crate::topics`]); consumers either subscribe to one topic or to every
//! topic (wildcard).  Callbacks run synchronously on the publishing thread,
//! after the subscriber list has been copied and the lock released, so a
//! callback may publish, subscribe, or unsubscribe without deadlocking.
//!
//! # Async tap
//!
//! Tokio-based consumers (UI bridges, log shippers) can call
//! [`EventBus::stream`] to obtain an [`EventStream`] fed from a
//! [`tokio::sync::broadcast`] channel.  Publishing into the tap never blocks
//! and never requires a running runtime.

use std::sync::Arc;

use ember_types::{Bundle, Event};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity of the async tap.
const DEFAULT_TAP_CAPACITY: usize = 256;

/// Handle returned by [`EventBus::subscribe`] and [`EventBus::subscribe_all`].
pub type SubscriptionId = u32;

type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// `None` = wildcard.
    topic: Option<String>,
    callback: EventCallback,
}

struct BusInner {
    subscriptions: Vec<Subscription>,
    next_id: SubscriptionId,
}

/// Shared event bus.  Clone it cheaply – all clones share the same
/// subscriber table and async tap.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
    tap: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus whose async tap buffers up to `tap_capacity` events per
    /// lagging receiver.
    pub fn new(tap_capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(tap_capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                subscriptions: Vec::new(),
                next_id: 1,
            })),
            tap,
        }
    }

    /// Subscribe `callback` to events published under exactly `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.insert(Some(topic.clone()), Arc::new(callback));
        debug!(%topic, id, "event bus subscription added");
        id
    }

    /// Subscribe `callback` to every event regardless of topic.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.insert(None, Arc::new(callback));
        debug!(id, "event bus wildcard subscription added");
        id
    }

    /// Remove a subscription.  Returns `false` if `id` was not active.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != id);
        let removed = inner.subscriptions.len() != before;
        if !removed {
            warn!(id, "unsubscribe: unknown subscription id");
        }
        removed
    }

    /// Publish `payload` under `topic`.
    ///
    /// Returns the number of callbacks that were invoked.  Having no
    /// listeners is a normal condition, not an error.
    pub fn publish(&self, topic: &str, payload: Bundle) -> usize {
        self.publish_event(Event::new(topic, payload))
    }

    /// Publish an already-built [`Event`].
    pub fn publish_event(&self, event: Event) -> usize {
        let targets: Vec<EventCallback> = {
            let inner = self.inner.lock();
            inner
                .subscriptions
                .iter()
                .filter(|s| s.topic.as_deref().is_none_or(|t| t == event.topic))
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        debug!(topic = %event.topic, listeners = targets.len(), "publishing event");
        for cb in &targets {
            cb(&event);
        }

        // No tap receivers is the common case.
        let _ = self.tap.send(event);
        targets.len()
    }

    /// Number of active callback subscriptions (topic and wildcard).
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// Open an async stream of every event published after this call.
    pub fn stream(&self) -> EventStream {
        EventStream {
            topic: None,
            receiver: self.tap.subscribe(),
        }
    }

    /// Open an async stream filtered to a single topic.
    pub fn stream_topic(&self, topic: impl Into<String>) -> EventStream {
        EventStream {
            topic: Some(topic.into()),
            receiver: self.tap.subscribe(),
        }
    }

    fn insert(&self, topic: Option<String>, callback: EventCallback) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.subscriptions.push(Subscription {
            id,
            topic,
            callback,
        });
        id
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_TAP_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .field("stream_receivers", &self.tap.receiver_count())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Async tap
// ────────────────────────────────────────────────────────────────────────────

/// Async receiver over the bus tap, optionally filtered to one topic.
///
/// Obtained via [`EventBus::stream`] or [`EventBus::stream_topic`].
pub struct EventStream {
    topic: Option<String>,
    receiver: broadcast::Receiver<Event>,
}

impl EventStream {
    /// Wait for the next matching event.
    ///
    /// Returns `None` once every [`EventBus`] clone has been dropped.  A
    /// receiver that falls behind skips the dropped events and keeps going.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "event stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, event: &Event) -> bool {
        self.topic.as_deref().is_none_or(|t| t == event.topic)
    }
}
