//! Kubernetes API access

mod client;
mod config;

pub use client::{ConfigMap, KubeClient, ObjectMeta, Secret};
pub use config::{ClientConfig, InClusterPaths, RestConfig};
