//! Live push to connected clients.
//!
//! [`DeferredQueue`] holds one-shot callbacks that run when the next client
//! connects. [`PushHub`] pairs it with a broadcast channel and is the
//! in-process [`LiveNotifier`].

use crate::store::{ConnectCallback, LiveNotifier};
use flotilla_core::ExecutionId;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Message pushed to live clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum PushMessage {
    /// A crashed execution was reconstructed.
    #[serde(rename_all = "camelCase")]
    ExecutionRecovered { execution_id: ExecutionId },
}

#[derive(Default)]
struct QueueState {
    pending: Vec<ConnectCallback>,
    closed: bool,
}

/// Callbacks waiting for the next client connection.
#[derive(Default)]
pub struct DeferredQueue {
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

impl DeferredQueue {
    /// Queues `callback` for the next connection. Returns false, dropping the
    /// callback, once the queue has been shut down.
    pub fn defer(&self, callback: ConnectCallback) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return false;
        }
        state.pending.push(callback);
        true
    }

    /// Runs and forgets every queued callback. Returns how many ran.
    pub fn client_connected(&self) -> usize {
        let callbacks = std::mem::take(
            &mut self
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pending,
        );
        let count = callbacks.len();
        for callback in callbacks {
            callback();
        }
        count
    }

    /// Drops pending callbacks and refuses new ones.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.pending.clear();
    }

    /// Number of callbacks waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }
}

/// Connected-client fan-out with deferred on-connect callbacks.
#[derive(Debug)]
pub struct PushHub {
    queue: DeferredQueue,
    sender: broadcast::Sender<PushMessage>,
}

impl PushHub {
    /// Creates a hub buffering up to `capacity` messages per client.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            queue: DeferredQueue::default(),
            sender,
        }
    }

    /// Registers a new client and runs the callbacks waiting for it.
    ///
    /// The client is subscribed first, so it receives whatever those
    /// callbacks broadcast.
    pub fn connect(&self) -> broadcast::Receiver<PushMessage> {
        let receiver = self.sender.subscribe();
        let ran = self.queue.client_connected();
        debug!(deferred = ran, "push client connected");
        receiver
    }

    /// Drops deferred callbacks; clients stay connected.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    #[must_use]
    pub fn queue(&self) -> &DeferredQueue {
        &self.queue
    }
}

impl LiveNotifier for PushHub {
    fn on_next_client_connect(&self, callback: ConnectCallback) {
        if !self.queue.defer(callback) {
            debug!("push hub shut down, dropping deferred callback");
        }
    }

    fn broadcast(&self, message: PushMessage) {
        if self.sender.send(message).is_err() {
            debug!("no push clients connected, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> ConnectCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn callbacks_run_once_on_next_connection() {
        let queue = DeferredQueue::default();
        let runs = Arc::new(AtomicUsize::new(0));
        assert!(queue.defer(counting(&runs)));
        assert!(queue.defer(counting(&runs)));

        assert_eq!(queue.client_connected(), 2);
        assert_eq!(queue.client_connected(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shutdown_drops_pending_and_rejects_new() {
        let queue = DeferredQueue::default();
        let runs = Arc::new(AtomicUsize::new(0));
        queue.defer(counting(&runs));

        queue.shutdown();

        assert!(!queue.defer(counting(&runs)));
        assert_eq!(queue.client_connected(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_may_defer_again() {
        let queue = Arc::new(DeferredQueue::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let inner_queue = Arc::clone(&queue);
        let inner_runs = Arc::clone(&runs);
        queue.defer(Box::new(move || {
            inner_queue.defer(counting(&inner_runs));
        }));

        assert_eq!(queue.client_connected(), 1);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.client_connected(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_broadcast_reaches_the_connecting_client() {
        let hub = Arc::new(PushHub::new(8));
        let execution_id = ExecutionId::new();
        let notifier = Arc::clone(&hub);
        hub.on_next_client_connect(Box::new(move || {
            notifier.broadcast(PushMessage::ExecutionRecovered { execution_id });
        }));

        let mut first = hub.connect();
        let mut second = hub.connect();

        assert_eq!(
            first.try_recv().unwrap(),
            PushMessage::ExecutionRecovered { execution_id }
        );
        assert!(second.try_recv().is_err());
    }

    #[test]
    fn push_message_wire_shape() {
        let execution_id = ExecutionId::new();
        let json =
            serde_json::to_value(PushMessage::ExecutionRecovered { execution_id }).unwrap();

        assert_eq!(json["type"], "executionRecovered");
        assert_eq!(json["data"]["executionId"], execution_id.as_ulid().to_string());
    }
}
