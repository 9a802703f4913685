//! Storage batcher (§4.7): coalesces non-ephemeral events into batches and
//! hands them to the document store, with transient-failure retry and a
//! non-blocking bounded buffer so the broadcast path is never slowed down
//! by storage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::metrics::Metrics;
use crate::model::event::Event;
use crate::store::EventStore;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct StorageBatcherHandle {
    sender: mpsc::Sender<Arc<Event>>,
    depth: Arc<AtomicUsize>,
    buffer_capacity: usize,
}

impl StorageBatcherHandle {
    /// Non-blocking enqueue; drops with a warning when the buffer is full
    /// (§4.7 "the storage path degrades to drop-with-warning").
    pub fn enqueue(&self, event: Arc<Event>, metrics: &Metrics) {
        if self.depth.load(Ordering::Relaxed) >= self.buffer_capacity {
            warn!(event_id = %event.id_hex, "storage buffer full, dropping event");
            Metrics::inc(&metrics.storage_dropped);
            return;
        }
        match self.sender.try_send(event) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event_id = %event.id_hex, "storage buffer full, dropping event");
                Metrics::inc(&metrics.storage_dropped);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Spawns `worker_count` workers, each coalescing events into batches of
/// up to `batch_size` or `flush_interval`, whichever comes first, and
/// writing them to `store`.
pub fn spawn(
    store: Arc<dyn EventStore>,
    metrics: Arc<Metrics>,
    worker_count: usize,
    batch_size: usize,
    flush_interval: Duration,
    buffer_capacity: usize,
) -> StorageBatcherHandle {
    let (sender, receiver) = mpsc::channel(buffer_capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    for worker_id in 0..worker_count.max(1) {
        let store = store.clone();
        let metrics = metrics.clone();
        let receiver = receiver.clone();
        let depth = depth.clone();
        tokio::spawn(async move {
            worker_loop(worker_id, store, metrics, receiver, depth, batch_size, flush_interval).await;
        });
    }

    StorageBatcherHandle {
        sender,
        depth,
        buffer_capacity,
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<dyn EventStore>,
    metrics: Arc<Metrics>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<Event>>>>,
    depth: Arc<AtomicUsize>,
    batch_size: usize,
    flush_interval: Duration,
) {
    loop {
        let batch = collect_batch(&receiver, &depth, batch_size, flush_interval).await;
        if batch.is_empty() {
            // `collect_batch` only returns empty when the channel's sender
            // half has been dropped — nothing left to do.
            return;
        }
        write_with_retry(worker_id, &store, &metrics, batch).await;
    }
}

async fn collect_batch(
    receiver: &Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<Event>>>>,
    depth: &Arc<AtomicUsize>,
    batch_size: usize,
    flush_interval: Duration,
) -> Vec<Arc<Event>> {
    let mut batch = Vec::new();
    let deadline = tokio::time::Instant::now() + flush_interval;
    let mut receiver = receiver.lock().await;

    let Some(first) = receiver.recv().await else {
        return batch;
    };
    depth.fetch_sub(1, Ordering::Relaxed);
    batch.push(first);

    while batch.len() < batch_size {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, receiver.recv()).await {
            Ok(Some(event)) => {
                depth.fetch_sub(1, Ordering::Relaxed);
                batch.push(event);
            }
            Ok(None) | Err(_) => break,
        }
    }
    batch
}

/// On transient failure the whole batch is retried with exponential
/// backoff; on permanent failure the batch is split and each document
/// retried individually, with per-document errors counted (§4.7).
async fn write_with_retry(
    worker_id: usize,
    store: &Arc<dyn EventStore>,
    metrics: &Metrics,
    batch: Vec<Arc<Event>>,
) {
    let owned: Vec<Event> = batch.iter().map(|e| (**e).clone()).collect();
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match store.put_batch(&owned).await {
            Ok(()) => {
                Metrics::inc(&metrics.storage_batches_written);
                return;
            }
            Err(e) if e.is_transient() => {
                Metrics::inc(&metrics.storage_transient_failures);
                warn!(worker_id, error = %e, backoff_ms = backoff.as_millis(), "transient storage failure, retrying batch");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(e) => {
                warn!(worker_id, error = %e, "permanent storage failure, retrying documents individually");
                for event in &owned {
                    match store.put_batch(std::slice::from_ref(event)).await {
                        Ok(()) => {}
                        Err(e) => {
                            Metrics::inc(&metrics.storage_permanent_failures);
                            warn!(event_id = %event.id_hex, error = %e, "document rejected by store");
                        }
                    }
                }
                info!(worker_id, count = owned.len(), "batch split and retried per document");
                return;
            }
        }
    }
}
