//! Event validator (§4.2): the seven-step pipeline from raw frame text to
//! an accepted, broadcast- and storage-bound event, plus the REQ/CLOSE
//! dispatch that feeds the subscription registry and historical engine.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::config::Config;
use crate::errors::WireErrorKind;
use crate::metrics::Metrics;
use crate::model::event::{Event, EventClass, VerifyError};
use crate::model::{ClientFrame, RelayMessage};
use crate::pipeline::broadcast::BroadcastEngineHandle;
use crate::pipeline::historical::HistoricalEngine;
use crate::pipeline::ingress::{ConnectionId, IngressItem, IngressQueue};
use crate::pipeline::registry::SubscriptionRegistry;
use crate::pipeline::router::ResponseRouter;
use crate::pipeline::storage_batcher::StorageBatcherHandle;
use crate::store::PolicyStore;

pub struct ValidatorContext {
    pub ingress: IngressQueue,
    pub registry: Arc<SubscriptionRegistry>,
    pub router: Arc<ResponseRouter>,
    pub historical: Arc<HistoricalEngine>,
    pub broadcast: BroadcastEngineHandle,
    pub storage: StorageBatcherHandle,
    pub policy: Arc<dyn PolicyStore>,
    pub metrics: Arc<Metrics>,
    pub config: Config,
}

/// Spawns `config.validation_workers` workers draining `ctx.ingress`
/// (§4.2 "horizontally parallel ... no ordering guarantee across
/// workers").
pub fn spawn(ctx: Arc<ValidatorContext>) {
    for _ in 0..ctx.config.validation_workers.max(1) {
        let ctx = ctx.clone();
        tokio::spawn(async move { worker_loop(ctx).await });
    }
}

async fn worker_loop(ctx: Arc<ValidatorContext>) {
    loop {
        let batch = ctx.ingress.pop(64, Duration::from_millis(250)).await;
        if batch.is_empty() {
            continue;
        }
        for item in batch {
            process_item(&ctx, item).await;
        }
    }
}

async fn process_item(ctx: &Arc<ValidatorContext>, item: IngressItem) {
    let connection_id = item.connection_id;

    // Step 1: parse the framed payload.
    let frame: ClientFrame = match serde_json::from_str(&item.raw_frame) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection_id, error = %e, "malformed frame");
            ctx.router
                .send(
                    connection_id,
                    RelayMessage::Notice {
                        message: WireErrorKind::Invalid.ack_message("malformed frame"),
                    },
                )
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::Event(record) => process_event(ctx, connection_id, record).await,
        ClientFrame::Req(sub_id, filters) => process_req(ctx, connection_id, sub_id, filters).await,
        ClientFrame::Close(sub_id) => process_close(ctx, connection_id, &sub_id).await,
    }
}

async fn ack(ctx: &ValidatorContext, connection_id: ConnectionId, id: String, accepted: bool, message: String) {
    ctx.router
        .send(
            connection_id,
            RelayMessage::Ok {
                id,
                accepted,
                message,
            },
        )
        .await;
}

async fn process_event(
    ctx: &Arc<ValidatorContext>,
    connection_id: ConnectionId,
    record: crate::model::event::EventRecord,
) {
    let id_for_ack = record.id.clone();

    // Step 2: structural check.
    let event = match Event::try_from(record) {
        Ok(event) => event,
        Err(e) => {
            Metrics::inc(&ctx.metrics.events_invalid);
            let message = WireErrorKind::Invalid.ack_message(&format!("malformed event ({e})"));
            ack(ctx, connection_id, id_for_ack, false, message).await;
            return;
        }
    };

    // Step 3: size check.
    let size = serde_json::to_vec(&event.to_record()).map(|v| v.len()).unwrap_or(usize::MAX);
    if size > ctx.config.max_event_bytes {
        Metrics::inc(&ctx.metrics.events_rejected);
        let message = WireErrorKind::Rejected.ack_message("event too large");
        ack(ctx, connection_id, event.id_hex.clone(), false, message).await;
        return;
    }

    // Step 4: policy checks, in order.
    if let Some(reason) = policy_reject_reason(&ctx.policy, &event, &ctx.metrics).await {
        Metrics::inc(&ctx.metrics.events_blocked);
        ack(ctx, connection_id, event.id_hex.clone(), false, reason).await;
        return;
    }

    // Step 5: signature verification.
    if let Err(e) = event.verify() {
        Metrics::inc(&ctx.metrics.events_invalid);
        let detail = match e {
            VerifyError::IdMismatch => "id does not match event hash",
            VerifyError::BadSignature => "signature verification failed",
            VerifyError::BadEncoding => "malformed signature or pubkey",
        };
        let message = WireErrorKind::Invalid.ack_message(detail);
        ack(ctx, connection_id, event.id_hex.clone(), false, message).await;
        return;
    }

    // Step 6: age classification.
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let age = now - event.created_at;
    let too_old = ctx.config.broadcast_max_age_seconds > 0 && age > ctx.config.broadcast_max_age_seconds;
    let class = event.class();

    if too_old && class == EventClass::Ephemeral {
        Metrics::inc(&ctx.metrics.events_rejected);
        let message = WireErrorKind::Rejected.ack_message("event too old");
        ack(ctx, connection_id, event.id_hex.clone(), false, message).await;
        return;
    }

    // Step 7: accept.
    Metrics::inc(&ctx.metrics.events_accepted);
    ack(ctx, connection_id, event.id_hex.clone(), true, String::new()).await;

    let event = Arc::new(event);
    if !(too_old && class != EventClass::Ephemeral) {
        ctx.broadcast.submit(event.clone());
    }
    if class != EventClass::Ephemeral {
        ctx.storage.enqueue(event, &ctx.metrics);
    }
}

/// Policy checks in the §4.2 step-4 order: author-ban, author-allowlist
/// (when non-empty), event-id ban, kind-allowlist (when non-empty).
/// Any `PolicyError` (store unreachable) is logged and treated as a
/// generic rejection, never silent acceptance (§4.2 "Failure semantics").
async fn policy_reject_reason(
    policy: &Arc<dyn PolicyStore>,
    event: &Event,
    metrics: &Metrics,
) -> Option<String> {
    match policy.is_pubkey_banned(&event.pubkey_hex).await {
        Ok(true) => return Some(WireErrorKind::Blocked.ack_message("author is banned")),
        Ok(false) => {}
        Err(e) => return Some(policy_failure(e, metrics)),
    }

    match policy.pubkey_allowlist().await {
        Ok(allowlist) if !allowlist.is_empty() && !allowlist.contains(&event.pubkey_hex) => {
            return Some(WireErrorKind::Blocked.ack_message("author not on allowlist"));
        }
        Ok(_) => {}
        Err(e) => return Some(policy_failure(e, metrics)),
    }

    match policy.is_event_banned(&event.id_hex).await {
        Ok(true) => return Some(WireErrorKind::Blocked.ack_message("event id is banned")),
        Ok(false) => {}
        Err(e) => return Some(policy_failure(e, metrics)),
    }

    match policy.kind_allowlist().await {
        Ok(allowlist) if !allowlist.is_empty() && !allowlist.contains(&event.kind) => {
            return Some(WireErrorKind::Blocked.ack_message("kind not on allowlist"));
        }
        Ok(_) => {}
        Err(e) => return Some(policy_failure(e, metrics)),
    }

    None
}

fn policy_failure(e: crate::errors::PolicyError, metrics: &Metrics) -> String {
    warn!(error = %e, "policy store unreachable, rejecting event");
    Metrics::inc(&metrics.events_error);
    WireErrorKind::Blocked.ack_message("policy check unavailable")
}

async fn process_req(
    ctx: &Arc<ValidatorContext>,
    connection_id: ConnectionId,
    sub_id: String,
    filters: Vec<crate::model::Filter>,
) {
    if filters.len() > ctx.config.max_filters_per_req {
        // §9 open question: source code silently truncates; this crate
        // follows that baseline rather than the conservative notice.
        info!(connection_id, sub_id = %sub_id, requested = filters.len(), "REQ filters truncated");
    }
    let truncated: Vec<_> = filters
        .into_iter()
        .take(ctx.config.max_filters_per_req)
        .collect();

    ctx.registry
        .subscribe(connection_id, sub_id.clone(), truncated.clone())
        .await;

    ctx.historical
        .run(&ctx.router, connection_id, sub_id, &truncated)
        .await;
}

async fn process_close(ctx: &Arc<ValidatorContext>, connection_id: ConnectionId, sub_id: &str) {
    ctx.registry.unsubscribe(connection_id, sub_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::EventRecord;
    use crate::store::memory::{MemoryEventStore, MemoryPolicyStore};
    use relay_test_utils::sign_event;

    async fn build_ctx() -> Arc<ValidatorContext> {
        build_ctx_with_policy(Arc::new(MemoryPolicyStore::new())).await
    }

    async fn build_ctx_with_policy(policy: Arc<dyn PolicyStore>) -> Arc<ValidatorContext> {
        let config = Config {
            database_url: String::new(),
            bind_addr: String::new(),
            log_level: "info".to_owned(),
            validation_workers: 1,
            broadcast_workers: 1,
            storage_workers: 1,
            ingress_soft_limit: 100,
            ingress_hard_limit: 1000,
            outbound_soft_limit: 100,
            outbound_hard_limit: 1000,
            storage_batch_size: 10,
            storage_flush_ms: 50,
            broadcast_max_age_seconds: 0,
            max_event_bytes: 500_000,
            max_filters_per_req: 10,
            max_historical_limit: 5000,
            query_deadline_ms: 10_000,
            policy_cache_ttl_secs: 30,
        };

        let store: Arc<dyn crate::store::EventStore> = Arc::new(MemoryEventStore::new());
        let registry = SubscriptionRegistry::new();
        let router = ResponseRouter::new(config.outbound_soft_limit, config.outbound_hard_limit);
        let metrics = Arc::new(Metrics::new());
        let historical = Arc::new(HistoricalEngine::new(
            store.clone(),
            config.max_filters_per_req,
            config.max_historical_limit,
            Duration::from_millis(config.query_deadline_ms),
        ));
        let (close_tx, _close_rx) = tokio::sync::mpsc::channel(16);
        let broadcast = crate::pipeline::broadcast::spawn(
            registry.clone(),
            router.clone(),
            metrics.clone(),
            close_tx,
            1,
            64,
        );
        let storage = crate::pipeline::storage_batcher::spawn(
            store,
            metrics.clone(),
            1,
            config.storage_batch_size,
            Duration::from_millis(config.storage_flush_ms),
            64,
        );

        Arc::new(ValidatorContext {
            ingress: IngressQueue::new(config.ingress_soft_limit, config.ingress_hard_limit),
            registry,
            router,
            historical,
            broadcast,
            storage,
            policy,
            metrics,
            config,
        })
    }

    #[tokio::test]
    async fn well_signed_event_is_accepted() {
        let ctx = build_ctx().await;
        ctx.router.register(1);
        let record = sign_event(1, 1000, vec![], "hi".to_owned());

        process_event(&ctx, 1, record.clone()).await;

        let batch = ctx.router.recv_batch(1).await.unwrap();
        assert_eq!(
            batch[0],
            RelayMessage::Ok {
                id: record.id,
                accepted: true,
                message: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn structurally_malformed_event_is_rejected_before_signature_check() {
        let ctx = build_ctx().await;
        ctx.router.register(1);
        let mut record = sign_event(1, 1000, vec![], "hi".to_owned());
        record.id = "zz".to_owned(); // bad hex, bad length

        process_event(&ctx, 1, record.clone()).await;

        let batch = ctx.router.recv_batch(1).await.unwrap();
        match &batch[0] {
            RelayMessage::Ok { accepted, message, .. } => {
                assert!(!accepted);
                assert!(message.starts_with("invalid: malformed event"));
            }
            _ => panic!("expected OK frame"),
        }
    }

    #[tokio::test]
    async fn tampered_content_fails_signature_verification() {
        let ctx = build_ctx().await;
        ctx.router.register(1);
        let mut record = sign_event(1, 1000, vec![], "hi".to_owned());
        record.content = "tampered".to_owned();

        process_event(&ctx, 1, record).await;

        let batch = ctx.router.recv_batch(1).await.unwrap();
        match &batch[0] {
            RelayMessage::Ok { accepted, message, .. } => {
                assert!(!accepted);
                assert_eq!(message, "invalid: id does not match event hash");
            }
            _ => panic!("expected OK frame"),
        }
    }

    #[tokio::test]
    async fn banned_pubkey_is_blocked() {
        let record = sign_event(1, 1000, vec![], "hi".to_owned());
        let policy = MemoryPolicyStore::new();
        policy.banned_pubkeys.write().unwrap().push(record.pubkey.clone());
        let ctx = build_ctx_with_policy(Arc::new(policy)).await;
        ctx.router.register(1);

        process_event(&ctx, 1, record).await;

        let batch = ctx.router.recv_batch(1).await.unwrap();
        match &batch[0] {
            RelayMessage::Ok { accepted, message, .. } => {
                assert!(!accepted);
                assert_eq!(message, "blocked: author is banned");
            }
            _ => panic!("expected OK frame"),
        }
    }
}
