//! Client handle for the manifest-rendering repo server
//!
//! The RPC protocol is provided by the transport layer; this type carries the
//! validated target, timeout and TLS client configuration it needs.

use crate::error::{Error, Result};
use crate::tls::{TlsConfiguration, TlsMode};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default repo server address
pub const DEFAULT_REPO_SERVER_ADDR: &str = "kestrel-repo-server:8081";

#[derive(Clone)]
pub struct RepoServerClient {
    address: String,
    host: String,
    port: u16,
    timeout: Duration,
    tls: TlsConfiguration,
    rustls_config: Option<Arc<rustls::ClientConfig>>,
}

impl RepoServerClient {
    /// Validate the target and build the TLS client configuration
    pub fn new(address: &str, timeout_seconds: u64, tls: TlsConfiguration) -> Result<Self> {
        let (host, port) = split_host_port(address)?;
        let rustls_config = tls.client_config()?;

        info!(
            "Repo server client targeting {} (timeout {}s, tls {})",
            address,
            timeout_seconds,
            tls.mode.as_str()
        );

        Ok(Self {
            address: address.to_string(),
            host,
            port,
            timeout: Duration::from_secs(timeout_seconds),
            tls,
            rustls_config,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Per-call RPC timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.tls.mode
    }

    pub fn tls(&self) -> &TlsConfiguration {
        &self.tls
    }

    /// TLS client configuration, `None` for plaintext
    pub fn rustls_config(&self) -> Option<Arc<rustls::ClientConfig>> {
        self.rustls_config.clone()
    }
}

impl std::fmt::Debug for RepoServerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoServerClient")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .field("tls", &self.tls.mode)
            .finish()
    }
}

fn split_host_port(address: &str) -> Result<(String, u16)> {
    let invalid = || {
        Error::Config(format!(
            "Invalid repo server address '{}', expected host:port",
            address
        ))
    };

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        // [ipv6]:port
        rest.split_once("]:").ok_or_else(invalid)?
    } else {
        address.rsplit_once(':').ok_or_else(invalid)?
    };

    if host.is_empty() || (host.contains(':') && !address.starts_with('[')) {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}
