//! Bounded producer/consumer queue with a drop-oldest backpressure policy.
//!
//! `tokio::sync::mpsc` has no built-in way to evict the head of the queue
//! when full — a `try_send` on a full channel simply fails, and the
//! producer would have to decide what to do with the item it couldn't
//! send. Dropping the *newest* item under load is wrong here: a producer
//! that's falling behind should shed stale backlog, not refuse fresh data.
//! This wraps a plain `VecDeque` behind a mutex and a notify so a full push
//! evicts the front before inserting.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

/// Cloneable handle; every clone shares the same underlying queue. One
/// producer task pushes, the consumer loop drains.
pub struct DropOldestQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DropOldestQueue<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
            }),
        }
    }

    /// Pushes `item`, evicting the oldest queued item first if at capacity.
    /// Returns `true` if an item was dropped.
    pub async fn push(&self, item: T) -> bool {
        let mut guard = self.inner.items.lock().await;
        let dropped = if guard.len() >= self.inner.capacity {
            guard.pop_front();
            true
        } else {
            false
        };
        guard.push_back(item);
        drop(guard);
        self.inner.notify.notify_one();
        dropped
    }

    /// Drains everything currently queued, oldest first. Never blocks.
    pub async fn drain(&self) -> Vec<T> {
        let mut guard = self.inner.items.lock().await;
        guard.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }
}
