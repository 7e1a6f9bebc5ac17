//! Controller settings
//!
//! Built once from command line arguments and the environment, then passed by
//! reference to the bootstrap sequencer.

use kestrel::cache::CacheSettings;
use kestrel::kube::ClientConfig;
use kestrel::tls::TlsPaths;
use kestrel_sharding::ShardingSettings;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Lifetime of entries in the in-process cache tier
pub const SECOND_TIER_TTL: Duration = Duration::from_secs(10 * 60);

/// Default engine resync period
pub const DEFAULT_APP_RESYNC: Duration = Duration::from_secs(180);

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Kubernetes client configuration sources
    pub client: ClientConfig,

    /// Engine resync period
    pub app_resync: Duration,

    pub repo_server_address: String,
    pub repo_server_timeout_seconds: u64,
    pub repo_server_plaintext: bool,
    pub repo_server_strict_tls: bool,
    pub tls_paths: TlsPaths,

    pub status_processors: usize,
    pub operation_processors: usize,
    pub self_heal_timeout: Duration,
    /// Concurrent exec limit; zero or negative is unlimited
    pub kubectl_parallelism_limit: i64,

    pub metrics_port: u16,
    /// Zero disables metrics cache expiration
    pub metrics_cache_expiration: Duration,

    pub cache: CacheSettings,
    pub second_tier_ttl: Duration,

    pub sharding: ShardingSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            app_resync: DEFAULT_APP_RESYNC,
            repo_server_address: kestrel::repo_client::DEFAULT_REPO_SERVER_ADDR.to_string(),
            repo_server_timeout_seconds: 60,
            repo_server_plaintext: false,
            repo_server_strict_tls: false,
            tls_paths: TlsPaths::under(kestrel::env::DEFAULT_APP_CONFIG_PATH),
            status_processors: 1,
            operation_processors: 1,
            self_heal_timeout: Duration::from_secs(5),
            kubectl_parallelism_limit: 20,
            metrics_port: 8082,
            metrics_cache_expiration: Duration::ZERO,
            cache: CacheSettings::default(),
            second_tier_ttl: SECOND_TIER_TTL,
            sharding: ShardingSettings::default(),
        }
    }
}

impl ControllerSettings {
    /// Exec parallelism limit, `None` when unlimited
    pub fn parallelism_limit(&self) -> Option<usize> {
        exec_limit(self.kubectl_parallelism_limit)
    }
}

/// Positive limits are clamped to what a semaphore can hold
pub(crate) fn exec_limit(limit: i64) -> Option<usize> {
    if limit <= 0 {
        None
    } else {
        Some((limit as u64).min(Semaphore::MAX_PERMITS as u64) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.app_resync, Duration::from_secs(180));
        assert_eq!(settings.second_tier_ttl, Duration::from_secs(600));
        assert_eq!(settings.repo_server_address, "kestrel-repo-server:8081");
        assert_eq!(settings.parallelism_limit(), Some(20));
        assert!(!settings.sharding.is_sharded());
    }

    #[test]
    fn test_unlimited_parallelism() {
        assert_eq!(exec_limit(0), None);
        assert_eq!(exec_limit(-5), None);
        assert_eq!(exec_limit(1), Some(1));
    }

    #[test]
    fn test_huge_parallelism_is_clamped() {
        let limit = exec_limit(i64::MAX).unwrap();
        assert_eq!(limit, Semaphore::MAX_PERMITS);
        let semaphore = Semaphore::new(limit);
        assert_eq!(semaphore.available_permits(), Semaphore::MAX_PERMITS);
    }
}
