//! Reconciliation engine seam
//!
//! The bootstrap sequencer assembles an [`EngineContext`] and hands it to an
//! [`EngineFactory`]. The built-in [`ShardedClusterWatcher`] tracks which
//! clusters this replica owns and publishes that set through the shared cache.

use async_trait::async_trait;
use bytes::Bytes;
use kestrel::cache::AppStateCache;
use kestrel::repo_client::RepoServerClient;
use kestrel::settings::SettingsManager;
use kestrel::{Cluster, ClusterSource, Error, Result};
use kestrel_sharding::{accepts, ClusterFilter};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything the engine needs, assembled during bootstrap
#[derive(Clone)]
pub struct EngineContext {
    pub namespace: String,
    pub settings: Arc<SettingsManager>,
    pub clusters: Arc<dyn ClusterSource>,
    pub repo_client: RepoServerClient,
    pub cache: AppStateCache,
    /// `None` when this replica owns every cluster
    pub cluster_filter: Option<ClusterFilter>,
    pub resync: Duration,
    pub self_heal_timeout: Duration,
    pub metrics_port: u16,
    pub metrics_cache_expiration: Duration,
    /// Concurrent exec limit, `None` for unlimited
    pub parallelism_limit: Option<usize>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("namespace", &self.namespace)
            .field("repo_client", &self.repo_client)
            .field("cache", &self.cache)
            .field("cluster_filter", &self.cluster_filter)
            .field("resync", &self.resync)
            .field("parallelism_limit", &self.parallelism_limit)
            .finish()
    }
}

#[async_trait]
pub trait ReconciliationEngine: Send {
    /// Run until `token` is cancelled
    async fn run(
        self: Box<Self>,
        token: CancellationToken,
        status_processors: usize,
        operation_processors: usize,
    );
}

pub trait EngineFactory: Send + Sync {
    fn build(&self, context: EngineContext) -> Result<Box<dyn ReconciliationEngine>>;
}

/// Builds [`ShardedClusterWatcher`] engines
#[derive(Debug, Default, Clone, Copy)]
pub struct WatcherFactory;

impl EngineFactory for WatcherFactory {
    fn build(&self, context: EngineContext) -> Result<Box<dyn ReconciliationEngine>> {
        Ok(Box::new(ShardedClusterWatcher::new(context)))
    }
}

/// Cache key holding the cluster names owned by `shard`
pub fn ownership_key(shard: Option<u32>) -> String {
    match shard {
        Some(shard) => format!("ownership|shard-{}", shard),
        None => "ownership|all".to_string(),
    }
}

#[derive(Debug, Serialize)]
struct OwnershipReport<'a> {
    shard: Option<u32>,
    replicas: Option<u32>,
    clusters: &'a BTreeSet<String>,
}

/// Periodically lists clusters and keeps the set this replica owns
pub struct ShardedClusterWatcher {
    context: EngineContext,
    exec_limit: Option<Arc<Semaphore>>,
    owned: BTreeSet<String>,
}

impl ShardedClusterWatcher {
    pub fn new(context: EngineContext) -> Self {
        let exec_limit = context
            .parallelism_limit
            .map(|n| Arc::new(Semaphore::new(n.min(Semaphore::MAX_PERMITS))));
        Self {
            context,
            exec_limit,
            owned: BTreeSet::new(),
        }
    }

    /// Clusters owned after the last refresh
    pub fn owned(&self) -> &BTreeSet<String> {
        &self.owned
    }

    /// List clusters, apply the filter and publish the owned set
    ///
    /// Waits for an exec permit when a parallelism limit is set.
    pub async fn refresh(&mut self) -> Result<()> {
        let _permit = match &self.exec_limit {
            Some(limit) => Some(
                Arc::clone(limit)
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Engine(format!("Exec limit closed: {}", e)))?,
            ),
            None => None,
        };

        let purged = self.context.cache.purge_expired();
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }

        let clusters = self.context.clusters.list_clusters().await?;
        let owned: BTreeSet<String> = clusters
            .iter()
            .filter(|c| accepts(self.context.cluster_filter.as_ref(), c))
            .map(cluster_key)
            .collect();

        for gained in owned.difference(&self.owned) {
            info!("Now processing cluster {}", gained);
        }
        for lost in self.owned.difference(&owned) {
            info!("No longer processing cluster {}", lost);
        }
        debug!(
            "Owning {} of {} clusters in {}",
            owned.len(),
            clusters.len(),
            self.context.namespace
        );
        metrics::gauge!("kestrel_clusters_owned").set(owned.len() as f64);

        let filter = self.context.cluster_filter.as_ref();
        let report = OwnershipReport {
            shard: filter.map(|f| f.shard()),
            replicas: filter.map(|f| f.replicas()),
            clusters: &owned,
        };
        let payload = serde_json::to_vec(&report)?;
        let ttl = self.context.resync.saturating_mul(2).max(Duration::from_secs(1));
        self.context
            .cache
            .set(&ownership_key(report.shard), Bytes::from(payload), Some(ttl))
            .await?;

        self.owned = owned;
        Ok(())
    }

    /// Resync period, preferring the value from the settings config map
    async fn resync_period(&self) -> Duration {
        match self.context.settings.settings().await {
            Ok(settings) => settings.reconciliation_timeout.unwrap_or(self.context.resync),
            Err(e) => {
                debug!("Using default resync period: {}", e);
                self.context.resync
            }
        }
    }
}

fn cluster_key(cluster: &Cluster) -> String {
    format!("{} ({})", cluster.name, cluster.server)
}

#[async_trait]
impl ReconciliationEngine for ShardedClusterWatcher {
    async fn run(
        mut self: Box<Self>,
        token: CancellationToken,
        status_processors: usize,
        operation_processors: usize,
    ) {
        let mut period = self.resync_period().await;
        if period.is_zero() {
            warn!("Resync period is zero, refreshing once per second");
            period = Duration::from_secs(1);
        }
        info!(
            "Cluster watcher started (resync {:?}, {} status / {} operation processors)",
            period, status_processors, operation_processors
        );

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!("Failed to refresh cluster ownership: {}", e);
                    }
                }
            }
        }
        info!("Cluster watcher stopped");
    }
}
