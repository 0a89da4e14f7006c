//! A bounded, single-producer/multi-producer, single-consumer queue that drops
//! the oldest queued item on overflow instead of blocking the producer.
//!
//! `tokio::sync::mpsc` can't express this directly — a full channel either
//! blocks the sender or rejects the new item — so subscriber fan-out (the log
//! ring buffer, the dashboard WebSocket hub) is built on this instead.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    closed: AtomicBool,
    notify: Notify,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Never blocks. Drops the oldest queued item when at capacity.
    pub fn push(&self, item: T) {
        {
            let mut items = self.items.lock().unwrap();
            if items.len() >= self.capacity {
                items.pop_front();
            }
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Waits for an item, or returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut items = self.items.lock().unwrap();
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn drops_oldest_on_overflow() {
        let q = DropOldestQueue::new(2);
        q.push(1);
        q.push(2);
        q.push(3); // 1 should be dropped
        assert_eq!(q.recv().await, Some(2));
        assert_eq!(q.recv().await, Some(3));
    }

    #[tokio::test]
    async fn close_wakes_pending_receiver() {
        let q = Arc::new(DropOldestQueue::<i32>::new(4));
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.recv().await });
        tokio::task::yield_now().await;
        q.close();
        assert_eq!(handle.await.unwrap(), None);
    }
}
