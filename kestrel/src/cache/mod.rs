//! Cache module for the controller
//!
//! A `CacheClient` is a shared key/value store handle. The controller reads
//! and writes application state through `AppStateCache`, whose client is
//! usually a `TwoLevelClient`: a short-lived in-process tier in front of the
//! shared backend (Redis, or in-memory when no Redis is configured).

mod memory;
mod two_level;

#[cfg(feature = "cache-redis")]
mod redis;

pub use memory::InMemoryCache;
pub use two_level::{wrap_with_second_tier, TwoLevelClient};

#[cfg(feature = "cache-redis")]
pub use self::redis::RedisCache;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Default expiration of entries in the shared backend
pub const DEFAULT_CACHE_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Key/value cache handle, safe for concurrent use
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Read a value, `None` on miss
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value; `None` expiration uses the backend default
    async fn set(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> Result<()>;

    /// Remove a value; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Drop entries whose expiration has passed, returning how many went
    ///
    /// Backends that expire entries on their own do nothing here.
    fn purge_expired(&self) -> usize {
        0
    }

    /// Backend name for logs and metrics labels
    fn backend_name(&self) -> &'static str;
}

/// Base cache selection
#[derive(Debug, Clone, Default)]
pub struct CacheSettings {
    /// Redis address (`host:port`); in-memory backend when unset
    pub redis_address: Option<String>,
    /// Redis database number
    pub redis_db: u32,
    /// Expiration for entries written without an explicit one
    pub default_expiration: Option<Duration>,
}

impl CacheSettings {
    fn default_expiration(&self) -> Duration {
        self.default_expiration.unwrap_or(DEFAULT_CACHE_EXPIRATION)
    }

    /// Create the shared cache handle
    pub fn build(&self) -> Result<AppStateCache> {
        let client: Arc<dyn CacheClient> = match &self.redis_address {
            Some(address) => self.redis_client(address)?,
            None => {
                tracing::info!("No Redis configured, using in-memory cache");
                Arc::new(InMemoryCache::new(self.default_expiration()))
            }
        };
        Ok(AppStateCache::new(client))
    }

    #[cfg(feature = "cache-redis")]
    fn redis_client(&self, address: &str) -> Result<Arc<dyn CacheClient>> {
        tracing::info!("Using Redis cache at {} (db {})", address, self.redis_db);
        let url = format!("redis://{}/{}", address, self.redis_db);
        Ok(Arc::new(RedisCache::new(&url, self.default_expiration())?))
    }

    #[cfg(not(feature = "cache-redis"))]
    fn redis_client(&self, address: &str) -> Result<Arc<dyn CacheClient>> {
        Err(crate::Error::Cache(format!(
            "Redis address {} configured but built without the cache-redis feature",
            address
        )))
    }
}

/// Application state cache whose backing client can be swapped
#[derive(Clone)]
pub struct AppStateCache {
    client: Arc<RwLock<Arc<dyn CacheClient>>>,
}

impl AppStateCache {
    pub fn new(client: Arc<dyn CacheClient>) -> Self {
        Self {
            client: Arc::new(RwLock::new(client)),
        }
    }

    /// Current backing client
    pub fn client(&self) -> Arc<dyn CacheClient> {
        Arc::clone(&self.client.read())
    }

    /// Replace the backing client for all clones of this handle
    pub fn set_client(&self, client: Arc<dyn CacheClient>) {
        *self.client.write() = client;
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.client().get(key).await
    }

    pub async fn set(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> Result<()> {
        self.client().set(key, value, expiration).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.client().delete(key).await
    }

    /// Drop expired entries held in process
    pub fn purge_expired(&self) -> usize {
        self.client().purge_expired()
    }
}

impl std::fmt::Debug for AppStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStateCache")
            .field("backend", &self.client().backend_name())
            .finish()
    }
}

pub(crate) fn record_lookup(tier: &'static str, hit: bool) {
    metrics::counter!(
        "kestrel_cache_requests_total",
        "tier" => tier,
        "result" => if hit { "hit" } else { "miss" },
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_by_default() {
        let cache = CacheSettings::default().build().unwrap();
        assert_eq!(cache.client().backend_name(), "memory");

        cache.set("k", Bytes::from("v"), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_set_client_visible_to_clones() {
        let cache = CacheSettings::default().build().unwrap();
        let clone = cache.clone();

        let wrapped = wrap_with_second_tier(cache.client(), Duration::from_secs(60));
        cache.set_client(wrapped);

        assert_eq!(clone.client().backend_name(), "two_level");
    }

    #[cfg(not(feature = "cache-redis"))]
    #[test]
    fn test_redis_requires_feature() {
        let settings = CacheSettings {
            redis_address: Some("localhost:6379".into()),
            ..Default::default()
        };
        assert!(matches!(settings.build(), Err(crate::Error::Cache(_))));
    }
}
