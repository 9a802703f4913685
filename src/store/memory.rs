//! In-memory `EventStore`/`PolicyStore` for tests (§6 [AMBIENT] test
//! tooling). Dedups replaceable/addressable keys at read time (§4.6,
//! §9 "Implementations may maintain this invariant at write time ... or at
//! read time").

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::{PolicyError, StoreError};
use crate::model::event::ReplaceKey;
use crate::model::{Event, Filter};

use super::{EventStore, PolicyStore, RelayMetadata};

#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn put_batch(&self, events: &[Event]) -> Result<(), StoreError> {
        let mut store = self.events.write().unwrap();
        store.extend(events.iter().cloned());
        Ok(())
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, StoreError> {
        let store = self.events.read().unwrap();
        let mut winners: HashMap<ReplaceKey, Event> = HashMap::new();
        let mut plain = Vec::new();
        for event in store.iter().filter(|e| filter.matches(e)) {
            match event.replace_key() {
                Some(key) => {
                    winners
                        .entry(key)
                        .and_modify(|current| {
                            if event.wins_tiebreak(current) {
                                *current = event.clone();
                            }
                        })
                        .or_insert_with(|| event.clone());
                }
                None => plain.push(event.clone()),
            }
        }
        let mut all: Vec<Event> = plain.into_iter().chain(winners.into_values()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            all.truncate(limit as usize);
        }
        Ok(all)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.query(filter).await?.len() as u64)
    }

    async fn remove(&self, filter: &Filter) -> Result<(), StoreError> {
        let mut store = self.events.write().unwrap();
        store.retain(|e| !filter.matches(e));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPolicyStore {
    pub banned_pubkeys: RwLock<Vec<String>>,
    pub allowed_pubkeys: RwLock<Vec<String>>,
    pub banned_events: RwLock<Vec<String>>,
    pub allowed_kinds: RwLock<Vec<u32>>,
    pub blocked_ips: RwLock<Vec<String>>,
    pub metadata: RwLock<RelayMetadata>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn is_pubkey_banned(&self, pubkey: &str) -> Result<bool, PolicyError> {
        Ok(self
            .banned_pubkeys
            .read()
            .unwrap()
            .iter()
            .any(|p| p == pubkey))
    }

    async fn pubkey_allowlist(&self) -> Result<Vec<String>, PolicyError> {
        Ok(self.allowed_pubkeys.read().unwrap().clone())
    }

    async fn is_event_banned(&self, id: &str) -> Result<bool, PolicyError> {
        Ok(self.banned_events.read().unwrap().iter().any(|e| e == id))
    }

    async fn kind_allowlist(&self) -> Result<Vec<u32>, PolicyError> {
        Ok(self.allowed_kinds.read().unwrap().clone())
    }

    async fn is_ip_blocked(&self, ip: &str) -> Result<bool, PolicyError> {
        Ok(self.blocked_ips.read().unwrap().iter().any(|i| i == ip))
    }

    async fn relay_metadata(&self) -> Result<RelayMetadata, PolicyError> {
        Ok(self.metadata.read().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::EventRecord;

    fn event(kind: u32, pubkey: &str, created_at: i64, content: &str, tags: Vec<Vec<String>>) -> Event {
        Event::try_from(EventRecord {
            id: format!("{created_at:064x}"),
            pubkey: pubkey.to_owned(),
            created_at,
            kind,
            tags,
            content: content.to_owned(),
            sig: "2".repeat(128),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn query_dedups_replaceable_events_by_tiebreak() {
        let store = MemoryEventStore::new();
        let pubkey = "a".repeat(64);
        store
            .put_batch(&[
                event(0, &pubkey, 100, "old", vec![]),
                event(0, &pubkey, 200, "new", vec![]),
                event(0, &pubkey, 50, "older", vec![]),
            ])
            .await
            .unwrap();

        let filter = Filter {
            kinds: Some(vec![0]),
            authors: Some(vec![pubkey]),
            ..Default::default()
        };
        let results = store.query(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "new");
    }

    #[tokio::test]
    async fn query_orders_newest_first() {
        let store = MemoryEventStore::new();
        let pubkey = "b".repeat(64);
        store
            .put_batch(&[
                event(1, &pubkey, 100, "first", vec![]),
                event(1, &pubkey, 300, "third", vec![]),
                event(1, &pubkey, 200, "second", vec![]),
            ])
            .await
            .unwrap();

        let results = store.query(&Filter::default()).await.unwrap();
        let created_ats: Vec<i64> = results.iter().map(|e| e.created_at).collect();
        assert_eq!(created_ats, vec![300, 200, 100]);
    }
}
