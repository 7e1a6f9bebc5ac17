//! Kestrel Sharding - cluster ownership for horizontally scaled controllers
//!
//! Each controller replica resolves a shard index and builds a filter that
//! selects the clusters it owns. With all replicas `0..replicas` running,
//! every cluster is owned by exactly one of them.
//!
//! ```ignore
//! use kestrel_sharding::{
//!     cluster_filter_from_settings, Fnv32aPartitioner, HostnameInference, ShardingSettings,
//! };
//!
//! let settings = ShardingSettings::from_env();
//! let partitioner = Arc::new(Fnv32aPartitioner);
//! let filter = cluster_filter_from_settings(&settings, &HostnameInference, partitioner)?;
//! ```

pub mod filter;
pub mod partition;
pub mod resolver;

pub use filter::{
    accepts, build_filter, cluster_filter_from_settings, ClusterFilter, ShardingSettings,
};
pub use partition::{Fnv32aPartitioner, Partitioner};
pub use resolver::{parse_ordinal, resolve_shard, FixedInference, HostnameInference, ShardInference};
