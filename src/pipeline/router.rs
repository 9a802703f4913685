//! Response router (§4.8): one bounded outbound queue per connection, with
//! a dispatch task per connection draining it into the transport adapter
//! with a small batching window.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::model::RelayMessage;
use crate::pipeline::ingress::ConnectionId;

const BATCH_WINDOW: Duration = Duration::from_millis(10);

struct Outbound {
    queue: Mutex<VecDeque<RelayMessage>>,
    notify: Notify,
    closed: AtomicBool,
    hard_limit: usize,
}

/// Owns every connection's outbound queue (§4.8, §3 "Ownership").
pub struct ResponseRouter {
    queues: DashMap<ConnectionId, Arc<Outbound>>,
    soft_limit: usize,
    hard_limit: usize,
}

impl ResponseRouter {
    pub fn new(soft_limit: usize, hard_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            queues: DashMap::new(),
            soft_limit,
            hard_limit,
        })
    }

    /// Registers a new connection and returns the receiving half of its
    /// dispatch feed. The caller (the transport adapter) drives a task
    /// that drains `recv_batch` into the wire.
    pub fn register(&self, connection_id: ConnectionId) {
        self.queues.insert(
            connection_id,
            Arc::new(Outbound {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                hard_limit: self.hard_limit,
            }),
        );
    }

    /// Non-blocking; returns `false` when the connection's queue is at its
    /// hard-full threshold, in which case the caller drops the message
    /// (§4.8, §4.4 "consecutive drops").
    pub async fn send(&self, connection_id: ConnectionId, message: RelayMessage) -> bool {
        let Some(outbound) = self.queues.get(&connection_id).map(|e| e.clone()) else {
            return false;
        };
        let mut queue = outbound.queue.lock().await;
        if queue.len() >= outbound.hard_limit || outbound.closed.load(Ordering::Acquire) {
            return false;
        }
        let below_soft = queue.len() < self.soft_limit;
        queue.push_back(message);
        drop(queue);
        outbound.notify.notify_one();
        below_soft
    }

    /// Drains up to `BATCH_WINDOW` worth of queued messages, or returns
    /// immediately with whatever is queued if the queue is closed. Used by
    /// the per-connection dispatch task.
    pub async fn recv_batch(&self, connection_id: ConnectionId) -> Option<Vec<RelayMessage>> {
        let outbound = self.queues.get(&connection_id)?.clone();
        loop {
            let has_messages = {
                let queue = outbound.queue.lock().await;
                if queue.is_empty() && outbound.closed.load(Ordering::Acquire) {
                    return None;
                }
                !queue.is_empty()
            };
            if has_messages {
                tokio::time::sleep(BATCH_WINDOW).await;
                let mut queue = outbound.queue.lock().await;
                return Some(queue.drain(..).collect());
            }
            tokio::select! {
                _ = outbound.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            if outbound.closed.load(Ordering::Acquire) {
                let mut queue = outbound.queue.lock().await;
                if queue.is_empty() {
                    return None;
                }
                return Some(queue.drain(..).collect());
            }
        }
    }

    /// Closes a connection's queue and drops it (§4.8 "On transport write
    /// failure, the router closes the queue"; §9 open question: drop on
    /// close, not drain).
    pub fn detach(&self, connection_id: ConnectionId) {
        if let Some((_, outbound)) = self.queues.remove(&connection_id) {
            outbound.closed.store(true, Ordering::Release);
            outbound.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_recv_batch_delivers_message() {
        let router = ResponseRouter::new(10, 20);
        router.register(1);
        router
            .send(
                1,
                RelayMessage::Notice {
                    message: "hi".to_owned(),
                },
            )
            .await;
        let batch = router.recv_batch(1).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn send_to_unregistered_connection_returns_false() {
        let router = ResponseRouter::new(10, 20);
        let sent = router
            .send(
                99,
                RelayMessage::Notice {
                    message: "hi".to_owned(),
                },
            )
            .await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn send_past_hard_limit_is_rejected() {
        let router = ResponseRouter::new(1, 2);
        router.register(1);
        for _ in 0..2 {
            router
                .send(
                    1,
                    RelayMessage::Notice {
                        message: "x".to_owned(),
                    },
                )
                .await;
        }
        let sent = router
            .send(
                1,
                RelayMessage::Notice {
                    message: "overflow".to_owned(),
                },
            )
            .await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn detach_closes_queue_and_recv_batch_returns_none() {
        let router = ResponseRouter::new(10, 20);
        router.register(1);
        router.detach(1);
        assert!(router.recv_batch(1).await.is_none());
    }
}
