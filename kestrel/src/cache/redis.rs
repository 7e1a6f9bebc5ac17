//! Redis-backed shared cache

use super::{record_lookup, CacheClient};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Namespace for controller keys in a shared Redis
const KEY_PREFIX: &str = "kestrel:";

/// Redis cache shared by all controller replicas
pub struct RedisCache {
    client: redis::Client,
    connection: OnceCell<redis::aio::MultiplexedConnection>,
    default_expiration: Duration,
}

impl RedisCache {
    /// Create a client for the given URL; no connection is made yet
    pub fn new(url: &str, default_expiration: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Cache(format!("Invalid Redis URL {}: {}", url, e)))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            default_expiration,
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| Error::Cache(format!("Redis connection failed: {}", e)))
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(self.make_key(key))
            .await
            .map_err(|e| Error::Cache(format!("Redis GET {}: {}", key, e)))?;

        record_lookup("redis", value.is_some());
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> Result<()> {
        let mut conn = self.connection().await?;
        let redis_key = self.make_key(key);
        let expiration = expiration.unwrap_or(self.default_expiration);

        let result = if expiration.is_zero() {
            conn.set::<_, _, ()>(&redis_key, value.as_ref()).await
        } else {
            conn.set_ex::<_, _, ()>(&redis_key, value.as_ref(), expiration.as_secs().max(1))
                .await
        };
        result.map_err(|e| Error::Cache(format!("Redis SET {}: {}", key, e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.make_key(key))
            .await
            .map_err(|e| Error::Cache(format!("Redis DEL {}: {}", key, e)))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url() {
        assert!(RedisCache::new("not a url", Duration::ZERO).is_err());
    }

    #[test]
    fn test_key_prefix() {
        let cache = RedisCache::new("redis://127.0.0.1:6379/0", Duration::ZERO).unwrap();
        assert_eq!(cache.make_key("app"), "kestrel:app");
    }
}
