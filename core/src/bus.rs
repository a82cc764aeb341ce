use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use parley_proto::{Event, Message};
use tokio::sync::mpsc::{
    error::TryRecvError, unbounded_channel, UnboundedReceiver, UnboundedSender,
};

type Subscribers = HashMap<String, Vec<(u64, UnboundedSender<Event>)>>;

/// Publish side of the fan-out. Handlers only see this trait so an external
/// broker can stand in for the in-process [`EventBus`].
pub trait Publisher: Send + Sync {
    fn emit(&self, topic: &str, payload: &Message) -> anyhow::Result<()>;
}

/// Topic-keyed broadcaster.
///
/// Cloning yields another handle to the same registry. Publishing holds the
/// registry lock for the duration of the (non-blocking) sends, so every
/// publish sees a consistent subscriber set and events on one topic reach
/// each subscriber in publish order.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic, returning a receiver for its events.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = unbounded_channel();
        let handle = self.attach(topic, tx);
        Subscription { rx, handle }
    }

    /// Register an existing sender for a topic. Lets one consumer funnel
    /// several topics into a single channel.
    pub fn attach(&self, topic: &str, tx: UnboundedSender<Event>) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));
        SubscriptionHandle {
            registry: self.inner.clone(),
            topic: topic.to_string(),
            id,
        }
    }

    /// Publish a message on a topic and return how many subscribers it
    /// reached. Nobody listening is not an error.
    pub fn publish(&self, topic: &str, payload: Message) -> usize {
        let mut guard = self.inner.subscribers.lock();
        let Some(list) = guard.get_mut(topic) else {
            return 0;
        };
        let event = Event {
            topic: topic.to_string(),
            payload,
        };
        list.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        let reached = list.len();
        if reached == 0 {
            guard.remove(topic);
        }
        reached
    }

    /// Number of live registrations on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(topic)
            .map_or(0, |list| list.iter().filter(|(_, tx)| !tx.is_closed()).count())
    }
}

impl Publisher for EventBus {
    fn emit(&self, topic: &str, payload: &Message) -> anyhow::Result<()> {
        let reached = self.publish(topic, payload.clone());
        tracing::trace!(topic, reached, "published");
        Ok(())
    }
}

/// Registration on one topic. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    registry: Arc<Registry>,
    topic: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the registration. Once this returns no further publish will
    /// reach it.
    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let mut guard = self.registry.subscribers.lock();
        if let Some(list) = guard.get_mut(&self.topic) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                guard.remove(&self.topic);
            }
        }
    }
}

/// A registration together with its own receiver.
pub struct Subscription {
    rx: UnboundedReceiver<Event>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn topic(&self) -> &str {
        self.handle.topic()
    }

    pub fn unsubscribe(self) {
        self.handle.unsubscribe();
    }
}
