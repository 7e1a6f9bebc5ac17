//! Kestrel - sharded cluster-monitoring controller core
//!
//! Building blocks the controller assembles at startup:
//!
//! - **Cluster**: managed cluster identities and where they come from
//! - **TLS**: trust material for the repo server connection
//! - **Cache**: shared cache handle with an in-process second tier
//! - **Kube**: API server configuration and a minimal client
//! - **Settings**: config map backed controller settings
//! - **Repo client**: validated handle for the manifest-rendering service

pub mod cache;
pub mod cluster;
pub mod env;
pub mod error;
pub mod kube;
pub mod repo_client;
pub mod settings;
pub mod tls;

pub use cluster::{Cluster, ClusterSource};
pub use error::{Error, ErrorCategory, Result};

/// Crate version, reported in the controller start line
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
