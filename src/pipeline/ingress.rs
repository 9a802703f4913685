//! Ingress queue (§4.1): a bounded FIFO of `(connection-id, raw-frame)`
//! pairs with soft/hard backpressure watermarks. Hand-rolled over
//! `tokio::sync::{Mutex, Notify}` since no off-the-shelf channel offers
//! "never blocks, never fails, signals backpressure via a return value"
//! directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

pub type ConnectionId = u64;

/// The queue carries the raw, unparsed frame text — §4.2 step 1 ("Parse
/// the framed payload") happens in the validator, not here, so a
/// malformed frame still produces the same notice-and-drop behavior for
/// every worker.
#[derive(Debug, Clone)]
pub struct IngressItem {
    pub connection_id: ConnectionId,
    pub raw_frame: String,
}

struct Inner {
    queue: Mutex<VecDeque<IngressItem>>,
    notify: Notify,
    closed: AtomicBool,
    soft_limit: usize,
    hard_limit: usize,
}

/// Shared handle; cheap to clone, safe across producers and consumers.
#[derive(Clone)]
pub struct IngressQueue {
    inner: Arc<Inner>,
}

impl IngressQueue {
    pub fn new(soft_limit: usize, hard_limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                soft_limit,
                hard_limit,
            }),
        }
    }

    /// Never blocks, never fails: accepts the item if the queue is below
    /// its hard-full threshold, and reports whether the soft-full
    /// watermark is still respected. Returns `false` when the item was
    /// dropped because the hard limit was reached (§4.1).
    pub async fn push(&self, item: IngressItem) -> bool {
        let mut queue = self.inner.queue.lock().await;
        if queue.len() >= self.inner.hard_limit {
            return false;
        }
        let below_soft = queue.len() < self.inner.soft_limit;
        queue.push_back(item);
        drop(queue);
        self.inner.notify.notify_one();
        below_soft
    }

    /// Blocks until at least one item is available, `n` items have been
    /// collected, or `deadline` elapses — whichever comes first. Returns
    /// an empty batch if the queue was closed while waiting (§4.1
    /// cancellation).
    pub async fn pop(&self, n: usize, deadline: Duration) -> Vec<IngressItem> {
        let deadline_at = tokio::time::Instant::now() + deadline;
        loop {
            {
                let mut queue = self.inner.queue.lock().await;
                if !queue.is_empty() || self.inner.closed.load(Ordering::Acquire) {
                    let take = n.min(queue.len());
                    return queue.drain(..take).collect();
                }
            }
            let remaining = deadline_at.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Vec::new();
            }
            let _ = timeout(remaining, self.inner.notify.notified()).await;
        }
    }

    /// Wakes every waiter with an empty batch (§4.1 cancellation).
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: ConnectionId) -> IngressItem {
        IngressItem {
            connection_id: id,
            raw_frame: r#"["CLOSE", "s"]"#.to_owned(),
        }
    }

    #[tokio::test]
    async fn push_reports_below_soft_watermark() {
        let q = IngressQueue::new(2, 10);
        assert!(q.push(item(1)).await);
        assert!(q.push(item(1)).await);
        assert!(!q.push(item(1)).await);
    }

    #[tokio::test]
    async fn push_drops_past_hard_limit() {
        let q = IngressQueue::new(1, 2);
        assert!(q.push(item(1)).await);
        q.push(item(1)).await;
        assert!(!q.push(item(1)).await);
        assert_eq!(q.len().await, 2);
    }

    #[tokio::test]
    async fn pop_returns_available_items_up_to_n() {
        let q = IngressQueue::new(10, 100);
        q.push(item(1)).await;
        q.push(item(2)).await;
        q.push(item(3)).await;
        let batch = q.pop(2, Duration::from_millis(100)).await;
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn pop_times_out_with_empty_batch_when_nothing_arrives() {
        let q = IngressQueue::new(10, 100);
        let batch = q.pop(5, Duration::from_millis(10)).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn close_wakes_waiters_with_empty_batch() {
        let q = IngressQueue::new(10, 100);
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop(5, Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let batch = waiter.await.unwrap();
        assert!(batch.is_empty());
    }
}
