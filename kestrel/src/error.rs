//! Controller error types

use thiserror::Error;

/// Errors raised while assembling or running the controller
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Namespace error: {0}")]
    Namespace(String),

    #[error("Kubeconfig error: {0}")]
    KubeConfig(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Shard inference error: {0}")]
    ShardInference(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Kubernetes API error: {0}")]
    Kube(String),

    #[error("Repo server error: {0}")]
    RepoServer(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Reconciliation engine error: {0}")]
    Engine(String),

    #[error("Diagnostics error: {0}")]
    Diagnostics(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// How an error is treated during bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad client configuration, missing namespace and similar
    FatalConfiguration,
    /// Trust material could not be loaded in strict mode
    FatalSecurity,
    /// Shard could not be inferred with more than one replica
    FatalInference,
    /// Instrumentation problems, logged and otherwise ignored
    BestEffortDiagnostic,
    /// Failures of runtime collaborators after startup
    Runtime,
}

impl Error {
    /// Classify the error for bootstrap handling
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::Namespace(_)
            | Error::KubeConfig(_)
            | Error::Cache(_)
            | Error::Io(_)
            | Error::Yaml(_) => ErrorCategory::FatalConfiguration,
            Error::Tls(_) => ErrorCategory::FatalSecurity,
            Error::ShardInference(_) => ErrorCategory::FatalInference,
            Error::Diagnostics(_) => ErrorCategory::BestEffortDiagnostic,
            Error::Kube(_)
            | Error::RepoServer(_)
            | Error::Settings(_)
            | Error::Engine(_)
            | Error::Cancelled(_)
            | Error::Json(_)
            | Error::Http(_) => ErrorCategory::Runtime,
        }
    }

    /// Whether the process must stop when this error surfaces during bootstrap
    pub fn is_fatal(&self) -> bool {
        !matches!(self.category(), ErrorCategory::BestEffortDiagnostic)
    }

    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Namespace(_) => "namespace",
            Error::KubeConfig(_) => "kubeconfig",
            Error::Tls(_) => "tls",
            Error::ShardInference(_) => "shard_inference",
            Error::Cache(_) => "cache",
            Error::Kube(_) => "kube",
            Error::RepoServer(_) => "repo_server",
            Error::Settings(_) => "settings",
            Error::Engine(_) => "engine",
            Error::Diagnostics(_) => "diagnostics",
            Error::Cancelled(_) => "cancelled",
            Error::Io(_) => "io",
            Error::Yaml(_) => "yaml",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::Tls("missing ca".into()).category(),
            ErrorCategory::FatalSecurity
        );
        assert_eq!(
            Error::ShardInference("no ordinal".into()).category(),
            ErrorCategory::FatalInference
        );
        assert_eq!(
            Error::Namespace("empty".into()).category(),
            ErrorCategory::FatalConfiguration
        );
        assert!(!Error::Diagnostics("no signals".into()).is_fatal());
        assert!(Error::Config("bad".into()).is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.error_type(), "io");
        assert_eq!(err.category(), ErrorCategory::FatalConfiguration);
    }
}
