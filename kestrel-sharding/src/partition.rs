//! Cluster partitioning
//!
//! Maps a cluster to a partition number. Replica `shard` of `replicas` owns a
//! cluster iff `partition(cluster) % replicas == shard`, so the partition
//! function must give the same answer in every replica process.

use kestrel::Cluster;

/// Deterministic cluster partition function
pub trait Partitioner: Send + Sync {
    fn partition(&self, cluster: &Cluster) -> u32;

    fn name(&self) -> &'static str;
}

/// FNV-1a (32-bit) over the cluster id, honouring explicit shard pinning
///
/// An empty id maps to partition 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fnv32aPartitioner;

impl Partitioner for Fnv32aPartitioner {
    fn partition(&self, cluster: &Cluster) -> u32 {
        if let Some(shard) = cluster.shard {
            return shard;
        }
        if cluster.id.is_empty() {
            return 0;
        }
        fnv1a_hash32(cluster.id.as_bytes())
    }

    fn name(&self) -> &'static str {
        "fnv32a"
    }
}

pub fn fnv1a_hash32(data: &[u8]) -> u32 {
    const FNV_OFFSET: u32 = 2166136261;
    const FNV_PRIME: u32 = 16777619;
    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
