//! Shared application state (§3 "Ownership"): wires the eight pipeline
//! components together and hands out connection ids. One `AppState` is
//! built at startup and cloned into every request/connection handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::pipeline::broadcast::{self, BroadcastEngineHandle};
use crate::pipeline::historical::HistoricalEngine;
use crate::pipeline::ingress::{ConnectionId, IngressQueue};
use crate::pipeline::registry::SubscriptionRegistry;
use crate::pipeline::router::ResponseRouter;
use crate::pipeline::storage_batcher::{self, StorageBatcherHandle};
use crate::pipeline::validator::{self, ValidatorContext};
use crate::store::{EventStore, PolicyStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub event_store: Arc<dyn EventStore>,
    pub policy: Arc<dyn PolicyStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub router: Arc<ResponseRouter>,
    pub ingress: IngressQueue,
    pub historical: Arc<HistoricalEngine>,
    pub broadcast: BroadcastEngineHandle,
    pub storage: StorageBatcherHandle,
    connection_ids: Arc<AtomicU64>,
    /// One entry per live connection; the broadcast engine's close-request
    /// channel wakes the matching entry to force the transport adapter to
    /// close a slow consumer (§4.4).
    close_signals: Arc<DashMap<ConnectionId, Arc<Notify>>>,
}

impl AppState {
    /// Builds every pipeline component and spawns its worker pool. Called
    /// once at startup.
    pub fn new(config: Config, event_store: Arc<dyn EventStore>, policy: Arc<dyn PolicyStore>) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());
        let registry = SubscriptionRegistry::new();
        let router = ResponseRouter::new(config.outbound_soft_limit, config.outbound_hard_limit);
        let ingress = IngressQueue::new(config.ingress_soft_limit, config.ingress_hard_limit);
        let historical = Arc::new(HistoricalEngine::new(
            event_store.clone(),
            config.max_filters_per_req,
            config.max_historical_limit,
            Duration::from_millis(config.query_deadline_ms),
        ));

        let close_signals: Arc<DashMap<ConnectionId, Arc<Notify>>> = Arc::new(DashMap::new());
        let (close_tx, mut close_rx) = mpsc::channel::<ConnectionId>(256);
        {
            let close_signals = close_signals.clone();
            tokio::spawn(async move {
                while let Some(connection_id) = close_rx.recv().await {
                    if let Some(notify) = close_signals.get(&connection_id) {
                        notify.notify_waiters();
                    }
                }
            });
        }

        let broadcast = broadcast::spawn(
            registry.clone(),
            router.clone(),
            metrics.clone(),
            close_tx,
            config.broadcast_workers,
            config.outbound_hard_limit,
        );

        let storage = storage_batcher::spawn(
            event_store.clone(),
            metrics.clone(),
            config.storage_workers,
            config.storage_batch_size,
            Duration::from_millis(config.storage_flush_ms),
            config.ingress_hard_limit,
        );

        let state = Self {
            config,
            metrics,
            event_store,
            policy,
            registry,
            router,
            ingress,
            historical,
            broadcast,
            storage,
            connection_ids: Arc::new(AtomicU64::new(1)),
            close_signals,
        };

        let ctx = Arc::new(ValidatorContext {
            ingress: state.ingress.clone(),
            registry: state.registry.clone(),
            router: state.router.clone(),
            historical: state.historical.clone(),
            broadcast: state.broadcast.clone(),
            storage: state.storage.clone(),
            policy: state.policy.clone(),
            metrics: state.metrics.clone(),
            config: (*state.config).clone(),
        });
        validator::spawn(ctx);

        state
    }

    /// Allocates a fresh connection id and registers its router queue and
    /// close signal. The transport adapter calls this once per upgraded
    /// socket.
    pub fn open_connection(&self) -> (ConnectionId, Arc<Notify>) {
        let connection_id = self.connection_ids.fetch_add(1, Ordering::Relaxed);
        self.router.register(connection_id);
        let notify = Arc::new(Notify::new());
        self.close_signals.insert(connection_id, notify.clone());
        (connection_id, notify)
    }

    /// Tears down every trace of a connection: router queue, subscription
    /// index entries, and close signal (§4.3, §4.8).
    pub async fn close_connection(&self, connection_id: ConnectionId) {
        self.router.detach(connection_id);
        self.registry.detach(connection_id).await;
        self.close_signals.remove(&connection_id);
    }
}
