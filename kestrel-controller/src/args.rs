//! Command line arguments

use crate::config::{ControllerSettings, DEFAULT_APP_RESYNC, SECOND_TIER_TTL};
use crate::logging::LogFormat;
use clap::Parser;
use kestrel::cache::{CacheSettings, DEFAULT_CACHE_EXPIRATION};
use kestrel::env::{parse_duration, parse_duration_from_env, ENV_RECONCILIATION_TIMEOUT};
use kestrel::kube::ClientConfig;
use kestrel::repo_client::DEFAULT_REPO_SERVER_ADDR;
use kestrel::tls::TlsPaths;
use kestrel_sharding::ShardingSettings;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "kestrel-controller")]
#[command(about = "Kestrel application controller")]
#[command(long_about = "Watches managed clusters and reconciles application state. \
    With KESTREL_CONTROLLER_REPLICAS > 1 each replica owns a disjoint subset of clusters.")]
#[command(version)]
pub struct Args {
    /// Time period in seconds for application resync
    #[arg(long, default_value_t = default_app_resync_secs())]
    pub app_resync: u64,

    /// Repo server address
    #[arg(long, default_value = DEFAULT_REPO_SERVER_ADDR)]
    pub repo_server: String,

    /// Repo server RPC call timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub repo_server_timeout_seconds: u64,

    /// Disable TLS on connections to the repo server
    #[arg(long)]
    pub repo_server_plaintext: bool,

    /// Whether to use strict validation of the TLS certificate presented by the repo server
    #[arg(long)]
    pub repo_server_strict_tls: bool,

    /// Number of application status processors
    #[arg(long, default_value_t = 1)]
    pub status_processors: usize,

    /// Number of application operation processors
    #[arg(long, default_value_t = 1)]
    pub operation_processors: usize,

    /// Start metrics server on given port (0 disables it)
    #[arg(long, default_value_t = 8082)]
    pub metrics_port: u16,

    /// Prometheus metrics cache expiration (disabled by default, e.g. 24h0m0s)
    #[arg(long, default_value = "0s", value_parser = duration_arg)]
    pub metrics_cache_expiration: Duration,

    /// Specifies timeout between application self heal attempts
    #[arg(long, default_value_t = 5)]
    pub self_heal_timeout_seconds: u64,

    /// Number of allowed concurrent kubectl fork/execs; any value <= 0 means no limit
    #[arg(long, default_value_t = 20, allow_negative_numbers = true)]
    pub kubectl_parallelism_limit: i64,

    /// Path to a kube config; in-cluster configuration is used when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// The name of the kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Namespace scope for this controller
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Redis server hostname and port (e.g. kestrel-redis:6379)
    #[arg(long, env = "REDIS_SERVER")]
    pub redis: Option<String>,

    /// Redis database
    #[arg(long, default_value_t = 0)]
    pub redisdb: u32,

    /// Cache expiration default
    #[arg(long, default_value = "24h", value_parser = duration_arg)]
    pub default_cache_expiration: Duration,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub logformat: LogFormat,

    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub loglevel: String,
}

impl Args {
    /// Settings for the bootstrap sequencer
    ///
    /// Replica topology and the TLS base directory come from the environment.
    pub fn into_settings(self) -> ControllerSettings {
        self.into_settings_with(ShardingSettings::from_env(), TlsPaths::from_env())
    }

    pub fn into_settings_with(
        self,
        sharding: ShardingSettings,
        tls_paths: TlsPaths,
    ) -> ControllerSettings {
        let default_expiration = if self.default_cache_expiration.is_zero() {
            DEFAULT_CACHE_EXPIRATION
        } else {
            self.default_cache_expiration
        };

        ControllerSettings {
            client: ClientConfig {
                kubeconfig: self.kubeconfig,
                context: self.context,
                namespace: self.namespace,
                ..ClientConfig::default()
            },
            app_resync: Duration::from_secs(self.app_resync),
            repo_server_address: self.repo_server,
            repo_server_timeout_seconds: self.repo_server_timeout_seconds,
            repo_server_plaintext: self.repo_server_plaintext,
            repo_server_strict_tls: self.repo_server_strict_tls,
            tls_paths,
            status_processors: self.status_processors,
            operation_processors: self.operation_processors,
            self_heal_timeout: Duration::from_secs(self.self_heal_timeout_seconds),
            kubectl_parallelism_limit: self.kubectl_parallelism_limit,
            metrics_port: self.metrics_port,
            metrics_cache_expiration: self.metrics_cache_expiration,
            cache: CacheSettings {
                redis_address: self.redis.filter(|r| !r.is_empty()),
                redis_db: self.redisdb,
                default_expiration: Some(default_expiration),
            },
            second_tier_ttl: SECOND_TIER_TTL,
            sharding,
        }
    }
}

fn default_app_resync_secs() -> u64 {
    parse_duration_from_env(
        ENV_RECONCILIATION_TIMEOUT,
        DEFAULT_APP_RESYNC,
        Duration::ZERO,
        Duration::from_secs(i32::MAX as u64),
    )
    .as_secs()
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration '{}'", s))
}
