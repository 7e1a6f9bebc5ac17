//! Kubernetes client configuration
//!
//! Resolves the API server endpoint, credentials and working namespace either
//! from a kubeconfig file or from the in-cluster service account.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to talk to the Kubernetes API server
#[derive(Debug, Clone, PartialEq)]
pub struct RestConfig {
    /// API server base URL
    pub server: String,
    /// Bearer token, if any
    pub token: Option<String>,
    /// PEM encoded CA bundle used to verify the API server
    pub ca_pem: Option<Vec<u8>>,
    /// Skip API server certificate verification
    pub insecure_skip_tls_verify: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            token: None,
            ca_pem: None,
            insecure_skip_tls_verify: false,
            timeout: Duration::ZERO,
        }
    }

    /// Fill in the request timeout when left unset
    pub fn with_defaults(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        self
    }
}

/// Where the service account files live when running inside a pod
#[derive(Debug, Clone)]
pub struct InClusterPaths {
    pub token: PathBuf,
    pub namespace: PathBuf,
    pub ca: PathBuf,
}

impl InClusterPaths {
    pub fn under(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            token: dir.join("token"),
            namespace: dir.join("namespace"),
            ca: dir.join("ca.crt"),
        }
    }
}

impl Default for InClusterPaths {
    fn default() -> Self {
        Self::under(SERVICE_ACCOUNT_DIR)
    }
}

/// User-facing client options (kubectl-style flags)
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Explicit kubeconfig path
    pub kubeconfig: Option<PathBuf>,
    /// Context to use instead of `current-context`
    pub context: Option<String>,
    /// Namespace override
    pub namespace: Option<String>,
    /// Service account locations for in-cluster mode
    pub in_cluster: InClusterPaths,
}

impl ClientConfig {
    /// Resolve the REST configuration and the working namespace
    pub fn resolve(&self) -> Result<(RestConfig, String)> {
        if let Some(path) = &self.kubeconfig {
            return self.from_kubeconfig(path);
        }
        self.from_in_cluster()
    }

    fn from_kubeconfig(&self, path: &Path) -> Result<(RestConfig, String)> {
        debug!("Loading kubeconfig from {:?}", path);
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::KubeConfig(format!("Failed to read kubeconfig {:?}: {}", path, e))
        })?;
        let kubeconfig: Kubeconfig = serde_yaml::from_str(&contents)?;

        let context_name = self
            .context
            .clone()
            .or(kubeconfig.current_context.clone())
            .ok_or_else(|| {
                Error::KubeConfig("No context selected and no current-context set".into())
            })?;

        let context = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| Error::KubeConfig(format!("Context '{}' not found", context_name)))?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| Error::KubeConfig(format!("Cluster '{}' not found", context.cluster)))?;

        let mut rest = RestConfig::new(cluster.server.clone());
        rest.insecure_skip_tls_verify = cluster.insecure_skip_tls_verify;
        rest.ca_pem = match (&cluster.certificate_authority_data, &cluster.certificate_authority) {
            (Some(data), _) => Some(decode_base64(data)?),
            (None, Some(file)) => Some(std::fs::read(relative_to(path, file))?),
            (None, None) => None,
        };

        if let Some(user_name) = &context.user {
            if let Some(user) = kubeconfig.users.iter().find(|u| &u.name == user_name) {
                rest.token = match (&user.user.token, &user.user.token_file) {
                    (Some(token), _) => Some(token.clone()),
                    (None, Some(file)) => {
                        Some(std::fs::read_to_string(relative_to(path, file))?.trim().to_string())
                    }
                    (None, None) => None,
                };
            }
        }

        let namespace = self
            .namespace
            .clone()
            .or(context.namespace.clone())
            .unwrap_or_else(|| "default".to_string());
        validate_namespace(&namespace)?;

        Ok((rest.with_defaults(), namespace))
    }

    fn from_in_cluster(&self) -> Result<(RestConfig, String)> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok().filter(|h| !h.is_empty());
        let port = std::env::var("KUBERNETES_SERVICE_PORT").ok().filter(|p| !p.is_empty());

        let (host, port) = match (host, port) {
            (Some(host), Some(port)) => (host, port),
            _ => {
                return Err(Error::KubeConfig(
                    "No kubeconfig given and not running inside a cluster \
                     (KUBERNETES_SERVICE_HOST/PORT unset)"
                        .into(),
                ))
            }
        };

        let server = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };

        let token = std::fs::read_to_string(&self.in_cluster.token).map_err(|e| {
            Error::KubeConfig(format!(
                "Failed to read service account token {:?}: {}",
                self.in_cluster.token, e
            ))
        })?;

        let mut rest = RestConfig::new(server);
        rest.token = Some(token.trim().to_string());
        rest.ca_pem = std::fs::read(&self.in_cluster.ca).ok();

        let namespace = match &self.namespace {
            Some(ns) => ns.clone(),
            None => std::fs::read_to_string(&self.in_cluster.namespace)
                .map(|s| s.trim().to_string())
                .map_err(|e| {
                    Error::Namespace(format!(
                        "Failed to read namespace from {:?}: {}",
                        self.in_cluster.namespace, e
                    ))
                })?,
        };
        validate_namespace(&namespace)?;

        Ok((rest.with_defaults(), namespace))
    }
}

fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(Error::Namespace("Namespace must not be empty".into()));
    }
    let valid = namespace.len() <= 63
        && namespace
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !namespace.starts_with('-')
        && !namespace.ends_with('-');
    if !valid {
        return Err(Error::Namespace(format!("Invalid namespace '{}'", namespace)));
    }
    Ok(())
}

fn decode_base64(data: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| Error::KubeConfig(format!("Invalid base64 data: {}", e)))
}

fn relative_to(kubeconfig: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    kubeconfig
        .parent()
        .map(|dir| dir.join(file))
        .unwrap_or_else(|| file.to_path_buf())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: KubeconfigCluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigCluster {
    server: String,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: KubeconfigUser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigUser {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: KubeconfigContext,
}

#[derive(Debug, Deserialize)]
struct KubeconfigContext {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}
