//! Thread-safe unbounded FIFO with a suspending dequeue.
//!
//! One queue feeds a sender's worker task (many producers, one consumer) and
//! another feeds a receiver's consumer (many inbound connection tasks, one
//! application consumer). Enqueue never blocks and never drops an item.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Unbounded FIFO delivery queue.
#[derive(Debug)]
pub struct DeliveryQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> Default for DeliveryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeliveryQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    /// Append an item and wake one waiting consumer.
    pub fn enqueue(&self, item: T) {
        self.items
            .lock()
            .expect("delivery queue lock poisoned")
            .push_back(item);
        self.available.notify_one();
    }

    /// Wait until an item is present, then remove and return the oldest.
    ///
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    pub async fn dequeue(&self) -> T {
        loop {
            let notified = self.available.notified();
            if let Some(item) = self.try_dequeue() {
                return item;
            }
            notified.await;
        }
    }

    /// Remove the oldest item if one is present.
    pub fn try_dequeue(&self) -> Option<T> {
        self.items
            .lock()
            .expect("delivery queue lock poisoned")
            .pop_front()
    }

    /// Advisory depth; may be stale by the time the caller reads it.
    pub fn size(&self) -> usize {
        self.items.lock().expect("delivery queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
