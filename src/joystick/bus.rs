//! # Event Bus
//!
//! Ordered, synchronous fan-out of [`StateChange`]s to subscribed observers.
//!
//! Observers are called on the pipeline thread in subscription order. Each
//! notification iterates a snapshot of the subscriber list taken before the
//! first call, so an observer may subscribe or unsubscribe from inside its
//! callback; the change applies from the next notification on.
//!
//! Consumers living on another execution context can use
//! [`ChannelObserver`] to receive changes through a tokio channel.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use super::state::StateChange;

/// Receives state change notifications.
pub trait Observer: Send + Sync {
    fn on_change(&self, change: &StateChange);
}

impl<F> Observer for F
where
    F: Fn(&StateChange) + Send + Sync,
{
    fn on_change(&self, change: &StateChange) {
        self(change)
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscribers {
    next_id: u64,
    list: Vec<(SubscriptionId, Arc<dyn Observer>)>,
}

/// Observer registry.
pub struct EventBus {
    subscribers: Mutex<Subscribers>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Subscribers {
                next_id: 0,
                list: Vec::new(),
            }),
        }
    }

    /// Registers an observer at the end of the delivery order.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        let mut subscribers = self.subscribers.lock();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.list.push((id, observer));
        debug!("Observer {:?} subscribed", id);
        id
    }

    /// Removes an observer. Returns `false` if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.list.len();
        subscribers.list.retain(|(sid, _)| *sid != id);
        let removed = subscribers.list.len() != before;
        if removed {
            debug!("Observer {:?} unsubscribed", id);
        }
        removed
    }

    /// Number of subscribed observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.lock().list.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers a change to every observer, in subscription order.
    pub fn notify(&self, change: &StateChange) {
        let observers: Vec<Arc<dyn Observer>> = self
            .subscribers
            .lock()
            .list
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer.on_change(change);
        }
    }
}

/// Forwards changes into an unbounded tokio channel.
///
/// Sends after the receiver is dropped are silently discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: UnboundedSender<StateChange>,
}

impl ChannelObserver {
    /// Creates the observer and the receiving end of its channel.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<StateChange>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Observer for ChannelObserver {
    fn on_change(&self, change: &StateChange) {
        let _ = self.sender.send(*change);
    }
}
