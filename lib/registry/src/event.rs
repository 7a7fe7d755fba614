//! Registry notifications.
//!
//! Subscribers get their own unbounded channel and see events in publish
//! order. Unsubscribing is explicit; a dropped [`Subscription`] is pruned the
//! next time an event is published.

use crate::record::{HealthCheckResult, ServiceRecord, ServiceStatus};
use flotilla_core::ServiceId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Something that happened to the fleet catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A service instance joined.
    Registered { record: ServiceRecord },
    /// A service instance left.
    Unregistered { record: ServiceRecord },
    /// A probe finished for a still-registered instance.
    HealthChecked {
        id: ServiceId,
        result: HealthCheckResult,
    },
    /// A probe flipped the instance's status.
    StatusChanged {
        id: ServiceId,
        from: ServiceStatus,
        to: ServiceStatus,
    },
}

impl RegistryEvent {
    /// The service the event is about.
    #[must_use]
    pub fn service_id(&self) -> &ServiceId {
        match self {
            Self::Registered { record } | Self::Unregistered { record } => &record.id,
            Self::HealthChecked { id, .. } | Self::StatusChanged { id, .. } => id,
        }
    }
}

/// Handle identifying one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<RegistryEvent>,
}

impl Subscription {
    /// The id to pass to `unsubscribe`.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        self.receiver.recv().await
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<RegistryEvent> {
        self.receiver.try_recv().ok()
    }
}

type Subscriber = (SubscriptionId, mpsc::UnboundedSender<RegistryEvent>);

/// Fan-out of registry events to subscribers.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, sender));
        Subscription { id, receiver }
    }

    /// Removes a subscriber, closing its channel. Returns false if unknown.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(subscriber, _)| *subscriber != id);
        subscribers.len() != before
    }

    pub(crate) fn publish(&self, event: &RegistryEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(_, sender)| sender.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
