//! In-process publish/subscribe channel between instrumented connections and
//! telemetry consumers.
//!
//! Delivery is synchronous: `publish` calls every current subscriber of the topic,
//! in subscription order, on the caller's stack. A panicking subscriber is
//! logged and skipped; later subscribers still receive the event.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::guarded;
use crate::events::{ConnectionEvent, QueryEvent};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// The topics carried by an [`EventChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Queries,
    Connections,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Queries => "query-events",
            TopicKind::Connections => "connection-events",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscriber list for one event type.
pub struct Topic<E> {
    subscribers: RwLock<Vec<(u64, Handler<E>)>>,
}

impl<E> Topic<E> {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }
}

/// An event type that can travel over an [`EventChannel`].
pub trait ChannelEvent: Sized + Send + Sync + 'static {
    const TOPIC: TopicKind;

    fn topic(channel: &EventChannel) -> &Topic<Self>;
}

impl ChannelEvent for QueryEvent {
    const TOPIC: TopicKind = TopicKind::Queries;

    fn topic(channel: &EventChannel) -> &Topic<Self> {
        &channel.queries
    }
}

impl ChannelEvent for ConnectionEvent {
    const TOPIC: TopicKind = TopicKind::Connections;

    fn topic(channel: &EventChannel) -> &Topic<Self> {
        &channel.connections
    }
}

/// Handle returned by [`EventChannel::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: TopicKind,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> TopicKind {
        self.topic
    }
}

/// Fan-out channel carrying [`QueryEvent`]s and [`ConnectionEvent`]s.
///
/// Construct one per application and share it by `Arc` between the
/// instrumented connections and the telemetry consumer, or use
/// [`EventChannel::global`].
pub struct EventChannel {
    queries: Topic<QueryEvent>,
    connections: Topic<ConnectionEvent>,
    next_id: AtomicU64,
}

static GLOBAL_CHANNEL: Lazy<Arc<EventChannel>> = Lazy::new(EventChannel::shared);

impl EventChannel {
    pub fn new() -> Self {
        Self {
            queries: Topic::new(),
            connections: Topic::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// A new channel behind an `Arc`, ready to be shared.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Process-wide channel, created on first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_CHANNEL)
    }

    /// Register `handler` for events of type `E`.
    pub fn subscribe<E, F>(&self, handler: F) -> Subscription
    where
        E: ChannelEvent,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        E::topic(self).subscribers.write().push((id, Arc::new(handler)));
        tracing::debug!(topic = %E::TOPIC, subscription = id, "Subscribed");
        Subscription { topic: E::TOPIC, id }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let removed = match subscription.topic {
            TopicKind::Queries => self.queries.remove(subscription.id),
            TopicKind::Connections => self.connections.remove(subscription.id),
        };
        if removed {
            tracing::debug!(
                topic = %subscription.topic,
                subscription = subscription.id,
                "Unsubscribed"
            );
        }
        removed
    }

    /// Deliver `event` to every current subscriber of its topic.
    ///
    /// Returns the number of handlers that completed without panicking. With no
    /// subscribers this is a no-op.
    pub fn publish<E: ChannelEvent>(&self, event: E) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<Handler<E>> = E::topic(self)
            .subscribers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        handlers
            .iter()
            .filter(|handler| guarded(E::TOPIC.as_str(), || handler(&event)).is_some())
            .count()
    }

    pub fn subscriber_count(&self, topic: TopicKind) -> usize {
        match topic {
            TopicKind::Queries => self.queries.len(),
            TopicKind::Connections => self.connections.len(),
        }
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("query_subscribers", &self.queries.len())
            .field("connection_subscribers", &self.connections.len())
            .finish()
    }
}
