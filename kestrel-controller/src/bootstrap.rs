//! Controller bootstrap sequence
//!
//! Assembles the controller's collaborators in a fixed order, failing fast on
//! the first error, then runs the reconciliation engine until shutdown.

use crate::config::ControllerSettings;
use crate::diagnostics::{Diagnostics, ProcessDiagnostics};
use crate::engine::{EngineContext, EngineFactory, WatcherFactory};
use kestrel::cache::wrap_with_second_tier;
use kestrel::cluster::SecretClusterSource;
use kestrel::kube::KubeClient;
use kestrel::repo_client::RepoServerClient;
use kestrel::settings::{SettingsManager, SettingsSource};
use kestrel::tls::{prepare_tls, CertPoolLoader, PemCertPoolLoader};
use kestrel::{ClusterSource, Error, Result};
use kestrel_sharding::{
    cluster_filter_from_settings, Fnv32aPartitioner, HostnameInference, Partitioner,
    ShardInference,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pluggable pieces of the bootstrap sequence
#[derive(Clone)]
pub struct Collaborators {
    pub cert_loader: Arc<dyn CertPoolLoader>,
    pub shard_inference: Arc<dyn ShardInference>,
    pub partitioner: Arc<dyn Partitioner>,
    pub engine_factory: Arc<dyn EngineFactory>,
    /// Optional process diagnostics, failures are never fatal
    pub diagnostics: Option<Arc<dyn Diagnostics>>,
}

impl Collaborators {
    /// Collaborators used by the controller binary
    pub fn production() -> Self {
        Self {
            cert_loader: Arc::new(PemCertPoolLoader),
            shard_inference: Arc::new(HostnameInference),
            partitioner: Arc::new(Fnv32aPartitioner),
            engine_factory: Arc::new(WatcherFactory),
            diagnostics: Some(Arc::new(ProcessDiagnostics::default())),
        }
    }
}

pub struct Bootstrap {
    settings: ControllerSettings,
    collaborators: Collaborators,
}

impl Bootstrap {
    pub fn new(settings: ControllerSettings, collaborators: Collaborators) -> Self {
        Self {
            settings,
            collaborators,
        }
    }

    /// Assemble the controller and run it until `shutdown` completes
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let settings = &self.settings;
        let collaborators = &self.collaborators;

        let (rest, namespace) = timed("client_config", || settings.client.resolve())?;
        let kube = Arc::new(KubeClient::new(rest)?);
        debug!("Using Kubernetes API server {}", kube.config().server);

        let resync = settings.app_resync;
        let tls = timed("tls", || {
            prepare_tls(
                settings.repo_server_plaintext,
                settings.repo_server_strict_tls,
                &settings.tls_paths,
                collaborators.cert_loader.as_ref(),
            )
        })?;

        let repo_client = timed("repo_client", || {
            RepoServerClient::new(
                &settings.repo_server_address,
                settings.repo_server_timeout_seconds,
                tls,
            )
        })?;

        let root = CancellationToken::new();
        // Cancels everything if we leave early
        let _guard = root.clone().drop_guard();

        let cache = timed("cache", || settings.cache.build())?;
        cache.set_client(wrap_with_second_tier(cache.client(), settings.second_tier_ttl));

        let settings_source: Arc<dyn SettingsSource> = kube.clone();
        let settings_manager = Arc::new(SettingsManager::new(
            root.clone(),
            settings_source,
            namespace.clone(),
        ));

        let cluster_filter = timed("cluster_filter", || {
            cluster_filter_from_settings(
                &settings.sharding,
                collaborators.shard_inference.as_ref(),
                Arc::clone(&collaborators.partitioner),
            )
        })?;

        let clusters: Arc<dyn ClusterSource> =
            Arc::new(SecretClusterSource::new(kube, namespace.clone()));
        let context = EngineContext {
            namespace: namespace.clone(),
            settings: settings_manager,
            clusters,
            repo_client,
            cache,
            cluster_filter,
            resync,
            self_heal_timeout: settings.self_heal_timeout,
            metrics_port: settings.metrics_port,
            metrics_cache_expiration: settings.metrics_cache_expiration,
            parallelism_limit: settings.parallelism_limit(),
        };
        let engine = timed("engine", || collaborators.engine_factory.build(context))?;

        if let Some(diagnostics) = &collaborators.diagnostics {
            if let Err(e) = diagnostics.register(&root) {
                warn!("Failed to register diagnostics: {}", e);
            }
        }

        let mut engine_task = tokio::spawn(engine.run(
            root.child_token(),
            settings.status_processors,
            settings.operation_processors,
        ));
        info!(
            "Kestrel application controller (version {}) starting (namespace: {})",
            kestrel::VERSION,
            namespace
        );

        tokio::select! {
            _ = shutdown => {
                info!("Shutting down application controller");
                root.cancel();
                engine_task
                    .await
                    .map_err(|e| Error::Engine(format!("Engine task failed: {}", e)))?;
                Ok(())
            }
            joined = &mut engine_task => {
                let reason = match joined {
                    Ok(()) => "exited".to_string(),
                    Err(e) => format!("failed: {}", e),
                };
                Err(Error::Engine(format!("Engine {} before shutdown", reason)))
            }
        }
    }
}

fn timed<T>(step: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let result = f();
    metrics::histogram!("kestrel_bootstrap_step_duration_seconds", "step" => step)
        .record(start.elapsed().as_secs_f64());
    match &result {
        Ok(_) => debug!("Bootstrap step {} done in {:?}", step, start.elapsed()),
        Err(e) => {
            metrics::counter!(
                "kestrel_bootstrap_failures_total",
                "step" => step,
                "error" => e.error_type()
            )
            .increment(1);
        }
    }
    result
}
