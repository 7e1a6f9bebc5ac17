//! Cluster filters
//!
//! `None` means this replica processes every cluster. It is kept distinct
//! from a filter that happens to accept everything so callers can skip
//! filtering entirely.

use crate::partition::Partitioner;
use crate::resolver::{resolve_shard, ShardInference};
use kestrel::env::{parse_num_from_env, ENV_CONTROLLER_REPLICAS, ENV_CONTROLLER_SHARD};
use kestrel::{Cluster, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Replica topology as configured for this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardingSettings {
    /// Total number of controller replicas; 0 or 1 disables sharding
    pub replicas: u32,
    /// Explicit shard index, negative when unset
    pub shard: i32,
}

impl Default for ShardingSettings {
    fn default() -> Self {
        Self {
            replicas: 0,
            shard: -1,
        }
    }
}

impl ShardingSettings {
    /// Read replica count and shard index from the environment
    pub fn from_env() -> Self {
        Self {
            replicas: parse_num_from_env(ENV_CONTROLLER_REPLICAS, 0u32, 0, i32::MAX as u32),
            shard: parse_num_from_env(ENV_CONTROLLER_SHARD, -1i32, -i32::MAX, i32::MAX),
        }
    }

    pub fn is_sharded(&self) -> bool {
        self.replicas > 1
    }
}

/// Predicate selecting the clusters owned by one replica
#[derive(Clone)]
pub struct ClusterFilter {
    predicate: Arc<dyn Fn(&Cluster) -> bool + Send + Sync>,
    replicas: u32,
    shard: u32,
}

impl ClusterFilter {
    pub fn accepts(&self, cluster: &Cluster) -> bool {
        (self.predicate)(cluster)
    }

    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    pub fn shard(&self) -> u32 {
        self.shard
    }
}

impl std::fmt::Debug for ClusterFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterFilter")
            .field("replicas", &self.replicas)
            .field("shard", &self.shard)
            .finish()
    }
}

/// Apply an optional filter; `None` accepts every cluster
pub fn accepts(filter: Option<&ClusterFilter>, cluster: &Cluster) -> bool {
    filter.map(|f| f.accepts(cluster)).unwrap_or(true)
}

/// Build the filter for `shard` out of `replicas`
pub fn build_filter(
    replicas: u32,
    shard: u32,
    partitioner: Arc<dyn Partitioner>,
) -> Option<ClusterFilter> {
    if replicas <= 1 {
        return None;
    }

    let predicate = move |cluster: &Cluster| partitioner.partition(cluster) % replicas == shard;
    Some(ClusterFilter {
        predicate: Arc::new(predicate),
        replicas,
        shard,
    })
}

/// Resolve the shard (inferring it when unset) and build the filter
///
/// With one replica or fewer the inference source is never consulted.
pub fn cluster_filter_from_settings(
    settings: &ShardingSettings,
    inference: &dyn ShardInference,
    partitioner: Arc<dyn Partitioner>,
) -> Result<Option<ClusterFilter>> {
    if !settings.is_sharded() {
        info!("Processing all cluster shards");
        return Ok(None);
    }

    let shard = resolve_shard(settings.replicas, settings.shard, inference)?;
    if shard >= settings.replicas {
        warn!(
            "Shard {} is outside [0, {}); this replica will not own any cluster",
            shard, settings.replicas
        );
    }
    info!("Processing clusters from shard {}", shard);
    metrics::gauge!("kestrel_controller_shard").set(shard as f64);
    metrics::gauge!("kestrel_controller_replicas").set(settings.replicas as f64);

    Ok(build_filter(settings.replicas, shard, partitioner))
}
