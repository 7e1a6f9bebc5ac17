//! Managed cluster identities
//!
//! Clusters are registered as labelled secrets in the controller namespace.
//! The local cluster is always managed and needs no secret.

use crate::error::Result;
use crate::kube::{KubeClient, Secret};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Server URL of the cluster the controller runs in
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";
pub const IN_CLUSTER_NAME: &str = "in-cluster";

/// Label marking a secret as a cluster registration
pub const CLUSTER_SECRET_LABEL: &str = "kestrel.io/secret-type=cluster";

/// A managed cluster as seen by the controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cluster {
    /// Human readable name
    pub name: String,
    /// API server URL
    pub server: String,
    /// Stable key used for shard partitioning
    pub id: String,
    /// Explicit shard pinning, overrides hashing when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<u32>,
}

impl Cluster {
    /// Create a cluster keyed by its server URL
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        let server = server.into();
        Self {
            name: name.into(),
            id: server.clone(),
            server,
            shard: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_shard(mut self, shard: u32) -> Self {
        self.shard = Some(shard);
        self
    }

    /// The cluster the controller itself runs in
    pub fn in_cluster() -> Self {
        Self::new(IN_CLUSTER_NAME, IN_CLUSTER_SERVER)
    }
}

/// Source of the managed cluster list
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn list_clusters(&self) -> Result<Vec<Cluster>>;
}

/// Lists clusters registered as secrets in the controller namespace
pub struct SecretClusterSource {
    client: Arc<KubeClient>,
    namespace: String,
}

impl SecretClusterSource {
    pub fn new(client: Arc<KubeClient>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl ClusterSource for SecretClusterSource {
    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let secrets = self
            .client
            .list_secrets(&self.namespace, CLUSTER_SECRET_LABEL)
            .await?;
        Ok(clusters_from_secrets(&secrets))
    }
}

/// Decode cluster secrets, always including the local cluster
///
/// Secrets that fail to decode are skipped with a warning.
pub fn clusters_from_secrets(secrets: &[Secret]) -> Vec<Cluster> {
    let mut clusters = Vec::with_capacity(secrets.len() + 1);
    let mut has_local = false;

    for secret in secrets {
        match cluster_from_secret(secret) {
            Ok(cluster) => {
                has_local |= cluster.server == IN_CLUSTER_SERVER;
                clusters.push(cluster);
            }
            Err(e) => warn!("Skipping cluster secret {}: {}", secret.metadata.name, e),
        }
    }

    if !has_local {
        clusters.push(Cluster::in_cluster());
    }

    debug!("Decoded {} clusters from {} secrets", clusters.len(), secrets.len());
    clusters
}

fn cluster_from_secret(secret: &Secret) -> Result<Cluster> {
    let server = secret.decoded("server")?.ok_or_else(|| {
        crate::Error::Kube(format!("secret {} has no server", secret.metadata.name))
    })?;
    let name = secret
        .decoded("name")?
        .unwrap_or_else(|| secret.metadata.name.clone());

    let mut cluster = Cluster::new(name, server);
    if let Some(shard) = secret.decoded("shard")? {
        let shard = shard.trim().parse::<u32>().map_err(|e| {
            crate::Error::Kube(format!("secret {} has invalid shard: {}", secret.metadata.name, e))
        })?;
        cluster = cluster.with_shard(shard);
    }
    Ok(cluster)
}

/// Fixed cluster list, useful for tests and static deployments
pub struct StaticClusterSource {
    clusters: Vec<Cluster>,
}

impl StaticClusterSource {
    pub fn new(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }
}

#[async_trait]
impl ClusterSource for StaticClusterSource {
    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        Ok(self.clusters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn secret(name: &str, fields: &[(&str, &str)]) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.name = name.into();
        for (k, v) in fields {
            secret.data.insert(
                k.to_string(),
                base64::engine::general_purpose::STANDARD.encode(v),
            );
        }
        secret
    }

    #[test]
    fn test_cluster_keyed_by_server() {
        let cluster = Cluster::new("prod", "https://prod.example.com");
        assert_eq!(cluster.id, "https://prod.example.com");
        assert!(cluster.shard.is_none());
    }

    #[test]
    fn test_secrets_decode_and_add_local() {
        let secrets = vec![
            secret("c1", &[("name", "east"), ("server", "https://east.example.com")]),
            secret("c2", &[("server", "https://west.example.com"), ("shard", "2")]),
        ];

        let clusters = clusters_from_secrets(&secrets);
        assert_eq!(clusters.len(), 3);
        assert_eq!(clusters[0].name, "east");
        assert_eq!(clusters[1].name, "c2");
        assert_eq!(clusters[1].shard, Some(2));
        assert_eq!(clusters[2], Cluster::in_cluster());
    }

    #[test]
    fn test_explicit_local_cluster_not_duplicated() {
        let secrets = vec![secret(
            "local",
            &[("name", "home"), ("server", IN_CLUSTER_SERVER)],
        )];

        let clusters = clusters_from_secrets(&secrets);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, "home");
    }

    #[test]
    fn test_bad_secrets_skipped() {
        let secrets = vec![
            secret("no-server", &[("name", "x")]),
            secret("bad-shard", &[("server", "https://a"), ("shard", "two")]),
        ];

        let clusters = clusters_from_secrets(&secrets);
        assert_eq!(clusters, vec![Cluster::in_cluster()]);
    }
}
