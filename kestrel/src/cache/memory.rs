//! In-process cache with per-entry expiration

use super::{record_lookup, CacheClient};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// In-memory cache; expired entries are dropped on access or by `purge_expired`
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    default_expiration: Duration,
    tier: &'static str,
}

impl InMemoryCache {
    /// A zero default expiration keeps entries until deleted
    pub fn new(default_expiration: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_expiration,
            tier: "memory",
        }
    }

    /// Label lookups with `tier` in the request counter
    pub fn with_tier(mut self, tier: &'static str) -> Self {
        self.tier = tier;
        self
    }

    pub fn tier(&self) -> &'static str {
        self.tier
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheClient for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    record_lookup(self.tier, true);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => {
                    record_lookup(self.tier, false);
                    return Ok(None);
                }
            }
        }

        // Expired: remove unless a writer refreshed it meanwhile
        let mut entries = self.entries.write();
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        record_lookup(self.tier, false);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> Result<()> {
        let ttl = expiration.unwrap_or(self.default_expiration);
        // Deadlines past what an Instant can hold never expire
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };

        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("entries", &self.len())
            .field("default_expiration", &self.default_expiration)
            .field("tier", &self.tier)
            .finish()
    }
}
