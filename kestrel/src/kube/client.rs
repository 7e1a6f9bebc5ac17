//! Minimal Kubernetes API client
//!
//! Only the reads the controller needs at bootstrap: config maps for settings
//! and labelled secrets for managed clusters.

use super::config::RestConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Object metadata subset
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigMap {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Secret with still base64-encoded data values
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    /// Decode a data key as UTF-8
    pub fn decoded(&self, key: &str) -> Result<Option<String>> {
        use base64::Engine;
        let Some(raw) = self.data.get(key) else {
            return Ok(None);
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| Error::Kube(format!("Secret {} key {}: {}", self.metadata.name, key, e)))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| Error::Kube(format!("Secret {} key {}: {}", self.metadata.name, key, e)))
    }
}

#[derive(Debug, Deserialize)]
struct SecretList {
    #[serde(default)]
    items: Vec<Secret>,
}

/// HTTP client bound to a single API server
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    config: RestConfig,
}

impl KubeClient {
    /// Build a client from a resolved REST config
    pub fn new(config: RestConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout);

        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| Error::KubeConfig(format!("Invalid API server CA: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if config.insecure_skip_tls_verify {
            tracing::warn!("Kubernetes API server TLS verification disabled - INSECURE");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::KubeConfig(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server.trim_end_matches('/'), path)
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch a config map, `None` when it does not exist
    pub async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let url = self.url(&format!("/api/v1/namespaces/{}/configmaps/{}", namespace, name));
        debug!("GET {}", url);

        let response = self.request(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Kube(format!(
                "GET configmap {}/{} returned {}",
                namespace,
                name,
                response.status()
            )));
        }
        Ok(Some(response.json().await?))
    }

    /// List secrets in a namespace matching a label selector
    pub async fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>> {
        let url = self.url(&format!("/api/v1/namespaces/{}/secrets", namespace));
        debug!("GET {} labelSelector={}", url, label_selector);

        let response = self
            .request(&url)
            .query(&[("labelSelector", label_selector)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Kube(format!(
                "LIST secrets in {} returned {}",
                namespace,
                response.status()
            )));
        }
        let list: SecretList = response.json().await?;
        Ok(list.items)
    }
}
