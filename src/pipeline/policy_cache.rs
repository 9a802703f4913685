//! Policy cache (§4.2 "Policy lookups must be cached"): a TTL-bounded
//! `moka` cache in front of the injected `PolicyStore`, so hot-path
//! validation never pays a round trip per event.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::errors::PolicyError;
use crate::store::{PolicyStore, RelayMetadata};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum CacheKey {
    PubkeyBanned(String),
    Allowlist,
    EventBanned(String),
    KindAllowlist,
    IpBlocked(String),
}

#[derive(Clone)]
enum CacheValue {
    Bool(bool),
    Strings(Arc<Vec<String>>),
    Kinds(Arc<Vec<u32>>),
}

pub struct CachedPolicyStore<S> {
    inner: S,
    cache: Cache<CacheKey, CacheValue>,
}

impl<S: PolicyStore> CachedPolicyStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    async fn get_or_load_bool(
        &self,
        key: CacheKey,
        load: impl std::future::Future<Output = Result<bool, PolicyError>>,
    ) -> Result<bool, PolicyError> {
        if let Some(CacheValue::Bool(v)) = self.cache.get(&key).await {
            return Ok(v);
        }
        let value = load.await?;
        self.cache.insert(key, CacheValue::Bool(value)).await;
        Ok(value)
    }
}

#[async_trait::async_trait]
impl<S: PolicyStore> PolicyStore for CachedPolicyStore<S> {
    async fn is_pubkey_banned(&self, pubkey: &str) -> Result<bool, PolicyError> {
        self.get_or_load_bool(
            CacheKey::PubkeyBanned(pubkey.to_owned()),
            self.inner.is_pubkey_banned(pubkey),
        )
        .await
    }

    async fn pubkey_allowlist(&self) -> Result<Vec<String>, PolicyError> {
        if let Some(CacheValue::Strings(v)) = self.cache.get(&CacheKey::Allowlist).await {
            return Ok((*v).clone());
        }
        let value = self.inner.pubkey_allowlist().await?;
        self.cache
            .insert(CacheKey::Allowlist, CacheValue::Strings(Arc::new(value.clone())))
            .await;
        Ok(value)
    }

    async fn is_event_banned(&self, id: &str) -> Result<bool, PolicyError> {
        self.get_or_load_bool(
            CacheKey::EventBanned(id.to_owned()),
            self.inner.is_event_banned(id),
        )
        .await
    }

    async fn kind_allowlist(&self) -> Result<Vec<u32>, PolicyError> {
        if let Some(CacheValue::Kinds(v)) = self.cache.get(&CacheKey::KindAllowlist).await {
            return Ok((*v).clone());
        }
        let value = self.inner.kind_allowlist().await?;
        self.cache
            .insert(CacheKey::KindAllowlist, CacheValue::Kinds(Arc::new(value.clone())))
            .await;
        Ok(value)
    }

    async fn is_ip_blocked(&self, ip: &str) -> Result<bool, PolicyError> {
        self.get_or_load_bool(
            CacheKey::IpBlocked(ip.to_owned()),
            self.inner.is_ip_blocked(ip),
        )
        .await
    }

    async fn relay_metadata(&self) -> Result<RelayMetadata, PolicyError> {
        // Metadata changes rarely and is read on every `GET /`; caching it
        // would add little, so pass through directly.
        self.inner.relay_metadata().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryPolicyStore;

    #[tokio::test]
    async fn caches_pubkey_banned_result() {
        let inner = MemoryPolicyStore::new();
        inner.banned_pubkeys.write().unwrap().push("abc".to_owned());
        let cached = CachedPolicyStore::new(inner, Duration::from_secs(30));

        assert!(cached.is_pubkey_banned("abc").await.unwrap());
        assert!(!cached.is_pubkey_banned("def").await.unwrap());
    }
}
