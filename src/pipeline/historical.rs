//! Historical query engine (§4.6): translates filters into store queries
//! for a fresh subscribe command and streams the results ahead of the
//! end-of-stored-events sentinel.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::errors::WireErrorKind;
use crate::model::{Filter, RelayMessage, SubId};
use crate::pipeline::ingress::ConnectionId;
use crate::pipeline::router::ResponseRouter;
use crate::store::EventStore;

pub struct HistoricalEngine {
    store: Arc<dyn EventStore>,
    max_filters_per_req: usize,
    max_historical_limit: u32,
    default_limit: u32,
    query_deadline: Duration,
}

impl HistoricalEngine {
    pub fn new(
        store: Arc<dyn EventStore>,
        max_filters_per_req: usize,
        max_historical_limit: u32,
        query_deadline: Duration,
    ) -> Self {
        Self {
            store,
            max_filters_per_req,
            max_historical_limit,
            default_limit: 500,
            query_deadline,
        }
    }

    /// Streams historical matches for every filter in `filters` (up to
    /// `max_filters_per_req`, surplus silently dropped per §4.6), then
    /// emits the end-of-stored-events sentinel. Runs under a combined
    /// deadline; on expiry, stops issuing further queries and emits EOSE
    /// anyway (§5 "historical query ... 10-second hard deadline").
    pub async fn run(
        &self,
        router: &ResponseRouter,
        connection_id: ConnectionId,
        sub_id: SubId,
        filters: &[Filter],
    ) {
        let truncated = &filters[..filters.len().min(self.max_filters_per_req)];
        let deadline = tokio::time::Instant::now() + self.query_deadline;

        for filter in truncated {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            let effective = self.clamp_limit(filter);
            if effective.limit == Some(0) {
                continue;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let result = tokio::time::timeout(remaining, self.store.query(&effective)).await;
            let events = match result {
                Ok(Ok(events)) => events,
                Ok(Err(e)) => {
                    warn!(sub_id = %sub_id, error = %e, "historical query failed");
                    let message = WireErrorKind::Error.ack_message("historical query failed");
                    router.send(connection_id, RelayMessage::Notice { message }).await;
                    continue;
                }
                Err(_) => {
                    warn!(sub_id = %sub_id, "historical query deadline exceeded");
                    let message = WireErrorKind::Error.ack_message("historical query deadline exceeded");
                    router.send(connection_id, RelayMessage::Notice { message }).await;
                    break;
                }
            };
            for event in events {
                let sent = router
                    .send(
                        connection_id,
                        RelayMessage::Event {
                            sub_id: sub_id.clone(),
                            event: event.to_record(),
                        },
                    )
                    .await;
                if !sent {
                    break;
                }
            }
        }

        router
            .send(connection_id, RelayMessage::Eose { sub_id })
            .await;
    }

    /// §4.6: `limit` defaults to 500 when absent, is capped at
    /// `max_historical_limit`, and `limit = 0` means "real-time only".
    fn clamp_limit(&self, filter: &Filter) -> Filter {
        let mut clamped = filter.clone();
        clamped.limit = Some(match filter.limit {
            None => self.default_limit,
            Some(0) => 0,
            Some(n) => n.min(self.max_historical_limit),
        });
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::EventRecord;
    use crate::model::Event;
    use crate::store::memory::MemoryEventStore;

    fn event(created_at: i64) -> Event {
        Event::try_from(EventRecord {
            id: format!("{created_at:064x}"),
            pubkey: "a".repeat(64),
            created_at,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: "2".repeat(128),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn clamp_limit_defaults_to_500_when_absent() {
        let engine = HistoricalEngine::new(
            Arc::new(MemoryEventStore::new()),
            10,
            5000,
            Duration::from_secs(10),
        );
        let clamped = engine.clamp_limit(&Filter::default());
        assert_eq!(clamped.limit, Some(500));
    }

    #[tokio::test]
    async fn clamp_limit_caps_at_max_historical_limit() {
        let engine = HistoricalEngine::new(
            Arc::new(MemoryEventStore::new()),
            10,
            5000,
            Duration::from_secs(10),
        );
        let filter = Filter {
            limit: Some(999_999),
            ..Default::default()
        };
        assert_eq!(engine.clamp_limit(&filter).limit, Some(5000));
    }

    #[tokio::test]
    async fn clamp_limit_preserves_zero_as_real_time_only() {
        let engine = HistoricalEngine::new(
            Arc::new(MemoryEventStore::new()),
            10,
            5000,
            Duration::from_secs(10),
        );
        let filter = Filter {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(engine.clamp_limit(&filter).limit, Some(0));
    }

    #[tokio::test]
    async fn run_emits_eose_after_historical_matches() {
        let store = Arc::new(MemoryEventStore::new());
        store
            .put_batch(&[event(100), event(200)])
            .await
            .unwrap();
        let engine = HistoricalEngine::new(store, 10, 5000, Duration::from_secs(10));
        let router = ResponseRouter::new(100, 1000);
        router.register(1);

        engine
            .run(&router, 1, "sub1".to_owned(), &[Filter::default()])
            .await;

        let batch = router.recv_batch(1).await.unwrap();
        assert_eq!(batch.len(), 3); // 2 events + EOSE
        assert!(matches!(batch.last(), Some(RelayMessage::Eose { .. })));
    }
}
