//! Controller settings backed by a config map
//!
//! The manager is bound to the controller namespace and the process root
//! token. Construction performs no I/O; settings are fetched on first use and
//! cached until invalidated.

use crate::env::parse_duration;
use crate::error::{Error, Result};
use crate::kube::KubeClient;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Name of the settings config map
pub const SETTINGS_CONFIG_MAP: &str = "kestrel-cm";

/// Raw key/value settings provider
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self, namespace: &str) -> Result<BTreeMap<String, String>>;
}

#[async_trait]
impl SettingsSource for KubeClient {
    async fn load(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        match self.get_config_map(namespace, SETTINGS_CONFIG_MAP).await? {
            Some(cm) => Ok(cm.data),
            None => {
                warn!(
                    "Config map {}/{} not found, using default settings",
                    namespace, SETTINGS_CONFIG_MAP
                );
                Ok(BTreeMap::new())
            }
        }
    }
}

/// Parsed controller settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// External URL of the deployment
    pub url: Option<String>,
    /// Reconciliation timeout overriding the CLI resync period
    pub reconciliation_timeout: Option<Duration>,
    /// All keys as read from the config map
    pub raw: BTreeMap<String, String>,
}

impl Settings {
    /// Parse settings from config map data
    pub fn from_data(raw: BTreeMap<String, String>) -> Result<Self> {
        let url = raw.get("url").cloned().filter(|u| !u.is_empty());

        let reconciliation_timeout = match raw.get("timeout.reconciliation") {
            Some(value) => Some(parse_duration(value).ok_or_else(|| {
                Error::Settings(format!("Invalid timeout.reconciliation '{}'", value))
            })?),
            None => None,
        };

        Ok(Self {
            url,
            reconciliation_timeout,
            raw,
        })
    }
}

/// Lazily loaded, cached controller settings
pub struct SettingsManager {
    token: CancellationToken,
    source: Arc<dyn SettingsSource>,
    namespace: String,
    cached: RwLock<Option<Arc<Settings>>>,
}

impl SettingsManager {
    pub fn new(
        token: CancellationToken,
        source: Arc<dyn SettingsSource>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            token,
            source,
            namespace: namespace.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Current settings, loading them on first use
    pub async fn settings(&self) -> Result<Arc<Settings>> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled("settings manager stopped".into()));
        }
        if let Some(settings) = self.cached.read().as_ref() {
            return Ok(Arc::clone(settings));
        }

        let raw = tokio::select! {
            _ = self.token.cancelled() => {
                return Err(Error::Cancelled("settings manager stopped".into()));
            }
            raw = self.source.load(&self.namespace) => raw?,
        };

        let settings = Arc::new(Settings::from_data(raw)?);
        debug!("Loaded {} settings keys from {}", settings.raw.len(), self.namespace);
        *self.cached.write() = Some(Arc::clone(&settings));
        Ok(settings)
    }

    /// Force the next call to reload settings
    pub fn invalidate(&self) {
        self.cached.write().take();
    }
}

impl std::fmt::Debug for SettingsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsManager")
            .field("namespace", &self.namespace)
            .field("loaded", &self.cached.read().is_some())
            .finish()
    }
}
