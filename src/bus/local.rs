//! In-process dispatcher between the external bus transport and the handlers.

use super::protocol::Message;
use crate::lock_or_recover;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub type Handler = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// Where components send outbound messages.
pub trait BusEmitter: Send + Sync {
    fn emit(&self, message: Message);
}

#[derive(Default)]
struct BusInner {
    handlers: Mutex<HashMap<String, Vec<(u64, Handler)>>>,
    taps: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, topic: Option<&str>, id: u64) {
        match topic {
            Some(topic) => {
                let mut handlers = lock_or_recover(&self.handlers, "LocalBus::remove");
                if let Some(list) = handlers.get_mut(topic) {
                    list.retain(|(handler_id, _)| *handler_id != id);
                    if list.is_empty() {
                        handlers.remove(topic);
                    }
                }
            }
            None => {
                lock_or_recover(&self.taps, "LocalBus::remove_tap")
                    .retain(|(tap_id, _)| *tap_id != id);
            }
        }
    }
}

/// Topic-keyed handler registry with failure-isolated dispatch.
///
/// Handler lists are snapshotted before dispatch, so a handler may emit,
/// subscribe or drop subscriptions while it runs.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one topic. The handler stays registered while the returned handle lives.
    #[must_use = "dropping the subscription unregisters the handler"]
    pub fn on<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock_or_recover(&self.inner.handlers, "LocalBus::on")
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic: Some(topic.to_string()),
            id,
        }
    }

    /// Observe every message emitted from inside the process (outbound forwarding).
    #[must_use = "dropping the subscription unregisters the tap"]
    pub fn tap<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock_or_recover(&self.inner.taps, "LocalBus::tap").push((id, Arc::new(handler)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic: None,
            id,
        }
    }

    /// Hand a message that arrived from the external transport to local handlers.
    pub fn deliver(&self, message: &Message) {
        let handlers: Vec<Handler> = lock_or_recover(&self.inner.handlers, "LocalBus::deliver")
            .get(&message.msg_type)
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::trace!(topic = %message.msg_type, "no local handlers");
        }
        for handler in handlers {
            run_isolated(&handler, message);
        }
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        lock_or_recover(&self.inner.handlers, "LocalBus::handler_count")
            .get(topic)
            .map_or(0, Vec::len)
    }

    pub fn tap_count(&self) -> usize {
        lock_or_recover(&self.inner.taps, "LocalBus::tap_count").len()
    }
}

impl BusEmitter for LocalBus {
    /// Dispatch to local handlers, then forward through the taps.
    fn emit(&self, message: Message) {
        self.deliver(&message);
        let taps: Vec<Handler> = lock_or_recover(&self.inner.taps, "LocalBus::emit")
            .iter()
            .map(|(_, tap)| Arc::clone(tap))
            .collect();
        for tap in taps {
            run_isolated(&tap, &message);
        }
    }
}

fn run_isolated(handler: &Handler, message: &Message) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(topic = %message.msg_type, error = %format!("{err:#}"), "handler failed");
            crate::log_debug(&format!("handler for '{}' failed: {err:#}", message.msg_type));
        }
        Err(_) => {
            tracing::error!(topic = %message.msg_type, "handler panicked");
            crate::log_debug(&format!("handler for '{}' panicked", message.msg_type));
        }
    }
}

/// Registration handle; unregisters on drop.
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Option<String>,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.topic.as_deref(), self.id);
        }
    }
}

/// Every subscription a component made at setup, released together at teardown.
#[derive(Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn release(&mut self) {
        self.subscriptions.clear();
    }
}

impl Extend<Subscription> for SubscriptionSet {
    fn extend<I: IntoIterator<Item = Subscription>>(&mut self, iter: I) {
        self.subscriptions.extend(iter);
    }
}

impl IntoIterator for SubscriptionSet {
    type Item = Subscription;
    type IntoIter = std::vec::IntoIter<Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.subscriptions.into_iter()
    }
}
