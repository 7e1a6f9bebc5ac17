//! Two-tier cache client.
//!
//! A short-lived in-process tier in front of the shared cache backend.
//!
//! ```text
//! get ──► local tier ──hit──► return
//!              │ miss
//!              ▼
//!         base client ──► populate local (ttl) ──► return
//!
//! set ──► base client ──► local tier (ttl)
//! delete ──► base client + local tier
//! ```
//!
//! Reads may be stale by at most `ttl` relative to writes made by other
//! processes; writes through this client are visible immediately. A zero
//! `ttl` disables the local tier and every call goes to the base client.

use super::{CacheClient, InMemoryCache};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Cache client with a bounded-duration local tier
pub struct TwoLevelClient {
    /// `None` when `ttl` is zero
    local: Option<InMemoryCache>,
    base: Arc<dyn CacheClient>,
    ttl: Duration,
}

impl TwoLevelClient {
    pub fn new(base: Arc<dyn CacheClient>, ttl: Duration) -> Self {
        let local = (!ttl.is_zero()).then(|| InMemoryCache::new(ttl).with_tier("local"));
        Self { local, base, ttl }
    }

    /// Lifetime of entries in the local tier
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The wrapped backend
    pub fn base(&self) -> &Arc<dyn CacheClient> {
        &self.base
    }
}

/// Decorate `base` with a local tier holding entries for `ttl`
pub fn wrap_with_second_tier(base: Arc<dyn CacheClient>, ttl: Duration) -> Arc<dyn CacheClient> {
    debug!(
        "Adding in-memory tier ({:?}) in front of {} cache",
        ttl,
        base.backend_name()
    );
    Arc::new(TwoLevelClient::new(base, ttl))
}

#[async_trait]
impl CacheClient for TwoLevelClient {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let Some(local) = &self.local else {
            return self.base.get(key).await;
        };
        if let Some(value) = local.get(key).await? {
            return Ok(Some(value));
        }

        let value = self.base.get(key).await?;
        if let Some(ref value) = value {
            local.set(key, value.clone(), Some(self.ttl)).await?;
        }
        Ok(value)
    }

    #[instrument(skip(self, value), fields(size = value.len()))]
    async fn set(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> Result<()> {
        let Some(local) = &self.local else {
            return self.base.set(key, value, expiration).await;
        };

        // Base first so a failed write leaves no local-only value
        if let Err(e) = self.base.set(key, value.clone(), expiration).await {
            local.delete(key).await?;
            return Err(e);
        }

        let local_ttl = match expiration {
            Some(exp) if !exp.is_zero() => exp.min(self.ttl),
            _ => self.ttl,
        };
        local.set(key, value, Some(local_ttl)).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        if let Some(local) = &self.local {
            local.delete(key).await?;
        }
        self.base.delete(key).await
    }

    fn purge_expired(&self) -> usize {
        let local = self.local.as_ref().map(|l| l.purge_expired()).unwrap_or(0);
        local + self.base.purge_expired()
    }

    fn backend_name(&self) -> &'static str {
        "two_level"
    }
}

impl std::fmt::Debug for TwoLevelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoLevelClient")
            .field("base", &self.base.backend_name())
            .field("local_entries", &self.local.as_ref().map(|l| l.len()))
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts calls into the wrapped backend
    struct CountingCache {
        inner: InMemoryCache,
        gets: AtomicUsize,
        sets: AtomicUsize,
        fail_sets: AtomicBool,
    }

    impl CountingCache {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryCache::new(Duration::ZERO),
                gets: AtomicUsize::new(0),
                sets: AtomicUsize::new(0),
                fail_sets: AtomicBool::new(false),
            })
        }

        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CacheClient for CountingCache {
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> Result<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            if self.fail_sets.load(Ordering::SeqCst) {
                return Err(Error::Cache("backend down".into()));
            }
            self.inner.set(key, value, expiration).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        fn backend_name(&self) -> &'static str {
            "counting"
        }
    }

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test(start_paused = true)]
    async fn test_read_after_write_served_locally() {
        let base = CountingCache::new();
        let client = TwoLevelClient::new(base.clone(), TTL);

        client.set("app", Bytes::from("state"), None).await.unwrap();
        assert_eq!(base.sets.load(Ordering::SeqCst), 1);

        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert_eq!(client.get("app").await.unwrap(), Some(Bytes::from("state")));
        assert_eq!(base.gets(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_ttl_consults_base() {
        let base = CountingCache::new();
        let client = TwoLevelClient::new(base.clone(), TTL);

        client.set("app", Bytes::from("state"), None).await.unwrap();
        tokio::time::advance(TTL).await;

        assert_eq!(client.get("app").await.unwrap(), Some(Bytes::from("state")));
        assert_eq!(base.gets(), 1);

        // Repopulated locally
        assert_eq!(client.get("app").await.unwrap(), Some(Bytes::from("state")));
        assert_eq!(base.gets(), 1);
    }

    #[tokio::test]
    async fn test_delete_invalidates_both_tiers() {
        let base = CountingCache::new();
        let client = TwoLevelClient::new(base.clone(), TTL);

        client.set("app", Bytes::from("state"), None).await.unwrap();
        client.delete("app").await.unwrap();

        assert_eq!(client.get("app").await.unwrap(), None);
        assert_eq!(base.gets(), 1);
        assert_eq!(base.inner.get("app").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_miss_populates_local_tier() {
        let base = CountingCache::new();
        base.inner
            .set("app", Bytes::from("remote"), None)
            .await
            .unwrap();
        let client = TwoLevelClient::new(base.clone(), TTL);

        assert_eq!(client.get("app").await.unwrap(), Some(Bytes::from("remote")));
        assert_eq!(client.get("app").await.unwrap(), Some(Bytes::from("remote")));
        assert_eq!(base.gets(), 1);
    }

    #[tokio::test]
    async fn test_absent_keys_not_cached() {
        let base = CountingCache::new();
        let client = TwoLevelClient::new(base.clone(), TTL);

        assert_eq!(client.get("nothing").await.unwrap(), None);
        assert_eq!(client.get("nothing").await.unwrap(), None);
        assert_eq!(base.gets(), 2);
    }

    #[tokio::test]
    async fn test_failed_base_write_drops_local_copy() {
        let base = CountingCache::new();
        let client = TwoLevelClient::new(base.clone(), TTL);

        client.set("app", Bytes::from("old"), None).await.unwrap();
        base.fail_sets.store(true, Ordering::SeqCst);

        assert!(client.set("app", Bytes::from("new"), None).await.is_err());
        // Falls through to the base, which still holds the old value
        assert_eq!(client.get("app").await.unwrap(), Some(Bytes::from("old")));
        assert_eq!(base.gets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_expiration_bounds_local_tier() {
        let base = CountingCache::new();
        let client = TwoLevelClient::new(base.clone(), TTL);

        client
            .set("app", Bytes::from("state"), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        client.get("app").await.unwrap();
        assert_eq!(base.gets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_reads_through() {
        let base = CountingCache::new();
        base.inner.set("app", Bytes::from("v1"), None).await.unwrap();
        let client = wrap_with_second_tier(base.clone(), Duration::ZERO);

        assert_eq!(client.get("app").await.unwrap(), Some(Bytes::from("v1")));

        // Another writer updates the shared backend
        base.inner.set("app", Bytes::from("v2"), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;

        assert_eq!(client.get("app").await.unwrap(), Some(Bytes::from("v2")));
        assert_eq!(base.gets(), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_writes_through() {
        let base = CountingCache::new();
        let client = TwoLevelClient::new(base.clone(), Duration::ZERO);
        assert!(client.local.is_none());

        client.set("app", Bytes::from("state"), None).await.unwrap();
        assert_eq!(client.get("app").await.unwrap(), Some(Bytes::from("state")));
        assert_eq!(base.gets(), 1);

        client.delete("app").await.unwrap();
        assert_eq!(base.inner.get("app").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_shrinks_local_tier() {
        let base = CountingCache::new();
        let client = TwoLevelClient::new(base.clone(), TTL);

        for i in 0..10 {
            client
                .set(&format!("app-{}", i), Bytes::from("state"), None)
                .await
                .unwrap();
        }
        let local = client.local.as_ref().unwrap();
        assert_eq!(local.len(), 10);
        assert_eq!(client.purge_expired(), 0);

        tokio::time::advance(TTL).await;
        assert_eq!(client.purge_expired(), 10);
        assert!(local.is_empty());
        // Base entries never expire in this stub
        assert_eq!(base.inner.len(), 10);
    }

    #[test]
    fn test_local_tier_has_own_label() {
        let client = TwoLevelClient::new(Arc::new(InMemoryCache::new(Duration::ZERO)), TTL);
        assert_eq!(client.local.as_ref().unwrap().tier(), "local");
        assert_eq!(InMemoryCache::new(TTL).tier(), "memory");
    }

    #[test]
    fn test_wrapping_keeps_backend_reachable() {
        let base: Arc<dyn CacheClient> = Arc::new(InMemoryCache::new(Duration::ZERO));
        let wrapped = wrap_with_second_tier(base, TTL);
        assert_eq!(wrapped.backend_name(), "two_level");
    }
}
