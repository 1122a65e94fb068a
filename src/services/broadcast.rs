//! Broadcast - Per-Subscriber Fan-Out
//!
//! Each subscriber owns an unbounded flume channel and sees every value
//! published after it subscribed. Disconnected subscribers are pruned on the
//! next publish.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;

pub struct Broadcast<T> {
    subscribers: Arc<Mutex<Vec<flume::Sender<T>>>>,
}

impl<T: Clone> Broadcast<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> flume::Receiver<T> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `value` to every live subscriber, returning how many received it
    pub fn publish(&self, value: T) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.send(value.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!("Pruning subscriber: {}", Error::from(e));
                false
            }
        });
        subscribers.len()
    }

    /// Number of live subscribers as of the last publish
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<T: Clone> std::fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcast")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
