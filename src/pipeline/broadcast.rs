//! Broadcast engine (§4.4): consumes accepted events, computes candidate
//! subscriptions from the registry's inverted index, verifies the full
//! match, and dispatches deliveries to the response router.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::metrics::Metrics;
use crate::model::event::Event;
use crate::model::RelayMessage;
use crate::pipeline::ingress::ConnectionId;
use crate::pipeline::registry::SubscriptionRegistry;
use crate::pipeline::router::ResponseRouter;

/// After this many consecutive dropped deliveries on one connection, the
/// worker asks the transport adapter to close it (§4.4).
const CONSECUTIVE_DROP_THRESHOLD: u32 = 50;

#[derive(Clone)]
pub struct BroadcastEngineHandle {
    sender: mpsc::Sender<Arc<Event>>,
}

impl BroadcastEngineHandle {
    pub fn submit(&self, event: Arc<Event>) {
        // Broadcast is in-memory and CPU-bound; a full channel means the
        // worker pool is behind, and backpressure here would stall the
        // validator, which §5 forbids. Best-effort submit.
        let _ = self.sender.try_send(event);
    }
}

/// Tracks consecutive delivery drops per connection so the threshold in
/// §4.4 can trigger a close request.
#[derive(Default)]
pub struct DropCounters {
    counts: DashMap<ConnectionId, AtomicU32>,
}

impl DropCounters {
    fn record_drop(&self, connection_id: ConnectionId) -> u32 {
        self.counts
            .entry(connection_id)
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    fn reset(&self, connection_id: ConnectionId) {
        if let Some(counter) = self.counts.get(&connection_id) {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

pub fn spawn(
    registry: Arc<SubscriptionRegistry>,
    router: Arc<ResponseRouter>,
    metrics: Arc<Metrics>,
    close_requests: mpsc::Sender<ConnectionId>,
    worker_count: usize,
    buffer_capacity: usize,
) -> BroadcastEngineHandle {
    let (sender, receiver) = mpsc::channel(buffer_capacity);
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    let drop_counters = Arc::new(DropCounters::default());

    for _ in 0..worker_count.max(1) {
        let registry = registry.clone();
        let router = router.clone();
        let metrics = metrics.clone();
        let receiver = receiver.clone();
        let drop_counters = drop_counters.clone();
        let close_requests = close_requests.clone();
        tokio::spawn(async move {
            worker_loop(registry, router, metrics, receiver, drop_counters, close_requests).await;
        });
    }

    BroadcastEngineHandle { sender }
}

async fn worker_loop(
    registry: Arc<SubscriptionRegistry>,
    router: Arc<ResponseRouter>,
    metrics: Arc<Metrics>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<Event>>>>,
    drop_counters: Arc<DropCounters>,
    close_requests: mpsc::Sender<ConnectionId>,
) {
    loop {
        let event = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(event) = event else { return };

        let candidates = registry.candidates(&event);
        // Group by connection so we fetch each connection's filter map
        // once, even if several sub-ids on it are candidates.
        let mut by_connection: HashMap<ConnectionId, Vec<String>> = HashMap::new();
        for (connection_id, sub_id) in candidates {
            by_connection.entry(connection_id).or_default().push(sub_id);
        }

        for (connection_id, sub_ids) in by_connection {
            for sub_id in sub_ids {
                let Some(filters) = registry.filters_for(connection_id, &sub_id).await else {
                    continue;
                };
                if !filters.iter().any(|f| f.matches(&event)) {
                    continue;
                }
                Metrics::inc(&metrics.deliveries_attempted);
                let sent = router
                    .send(
                        connection_id,
                        RelayMessage::Event {
                            sub_id: sub_id.clone(),
                            event: event.to_record(),
                        },
                    )
                    .await;
                if sent {
                    drop_counters.reset(connection_id);
                } else {
                    Metrics::inc(&metrics.deliveries_dropped);
                    let consecutive = drop_counters.record_drop(connection_id);
                    if consecutive >= CONSECUTIVE_DROP_THRESHOLD {
                        warn!(connection_id, "slow consumer threshold exceeded, requesting close");
                        Metrics::inc(&metrics.connections_closed_slow_consumer);
                        let _ = close_requests.try_send(connection_id);
                    }
                }
            }
        }
    }
}
