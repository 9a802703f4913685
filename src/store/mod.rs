//! Document-store and policy-store contracts (§6). Both are dependency
//! injected and accessed through object-safe traits so `AppState` can hold
//! `Arc<dyn EventStore>` / `Arc<dyn PolicyStore>` without committing to one
//! backend.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::errors::{PolicyError, StoreError};
use crate::model::{Event, Filter};

/// The durable event store (§6 "Document-store contract"). Internals are
/// out of scope; this crate provides one Postgres-backed implementation
/// and one in-memory implementation for tests.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn put_batch(&self, events: &[Event]) -> Result<(), StoreError>;

    /// Returns events matching `filter`, newest-first, capped at
    /// `filter.limit` (already clamped by the caller per §4.6).
    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, StoreError>;

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError>;

    /// Policy-driven removal. Writes to the store otherwise only ever come
    /// from the storage batcher; `remove` exists for the administrative
    /// surface, which is out of scope here.
    async fn remove(&self, filter: &Filter) -> Result<(), StoreError>;
}

/// Relay metadata surfaced read-only at `GET /` (§9 [SUPPLEMENT]).
#[derive(Debug, Clone, Default)]
pub struct RelayMetadata {
    pub name: String,
    pub description: String,
    pub icon: String,
}

/// The policy store (§6 "Policy-store contract"). Writes come only from
/// the administrative surface, which is out of scope; this crate only
/// reads.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn is_pubkey_banned(&self, pubkey: &str) -> Result<bool, PolicyError>;

    /// Empty set means "no allowlist" (§6).
    async fn pubkey_allowlist(&self) -> Result<Vec<String>, PolicyError>;

    async fn is_event_banned(&self, id: &str) -> Result<bool, PolicyError>;

    /// Empty set means "no allowlist".
    async fn kind_allowlist(&self) -> Result<Vec<u32>, PolicyError>;

    async fn is_ip_blocked(&self, ip: &str) -> Result<bool, PolicyError>;

    async fn relay_metadata(&self) -> Result<RelayMetadata, PolicyError>;
}
