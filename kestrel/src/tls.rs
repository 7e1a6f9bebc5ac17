//! TLS preparation for connections to the repo server
//!
//! ```text
//! plaintext = true                  -> Disabled       (no TLS)
//! plaintext = false, strict = false -> Opportunistic  (TLS, identity unchecked)
//! plaintext = false, strict = true  -> Strict         (TLS, identity checked against loaded pool)
//! ```
//!
//! Trust material is only read in strict mode. A strict configuration whose
//! files cannot be loaded is an error; it never degrades to opportunistic.

use crate::env::{string_from_env, DEFAULT_APP_CONFIG_PATH, ENV_APP_CONFIG_PATH};
use crate::error::{Error, Result};
use rustls::pki_types::CertificateDer;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How connections to the repo server are secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Disabled,
    Opportunistic,
    Strict,
}

impl TlsMode {
    pub fn from_flags(plaintext: bool, strict: bool) -> Self {
        match (plaintext, strict) {
            (true, _) => TlsMode::Disabled,
            (false, false) => TlsMode::Opportunistic,
            (false, true) => TlsMode::Strict,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::Disabled => "disabled",
            TlsMode::Opportunistic => "opportunistic",
            TlsMode::Strict => "strict",
        }
    }
}

/// Locations of the controller's TLS material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub ca_path: PathBuf,
}

impl TlsPaths {
    /// Well-known layout under a configuration base directory
    pub fn under(base: impl AsRef<Path>) -> Self {
        let dir = base.as_ref().join("controller").join("tls");
        Self {
            cert_path: dir.join("tls.crt"),
            ca_path: dir.join("ca.crt"),
        }
    }

    /// Layout under the base directory named by the environment
    pub fn from_env() -> Self {
        Self::under(string_from_env(ENV_APP_CONFIG_PATH, DEFAULT_APP_CONFIG_PATH))
    }
}

/// Immutable pool of trusted certificates
#[derive(Debug, Clone, Default)]
pub struct CertPool {
    certs: Vec<CertificateDer<'static>>,
}

impl CertPool {
    pub fn new(certs: Vec<CertificateDer<'static>>) -> Self {
        Self { certs }
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn certs(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }
}

/// Loads a certificate pool from files
pub trait CertPoolLoader: Send + Sync {
    fn load(&self, paths: &[&Path]) -> Result<CertPool>;
}

/// Reads PEM encoded certificates from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct PemCertPoolLoader;

impl CertPoolLoader for PemCertPoolLoader {
    fn load(&self, paths: &[&Path]) -> Result<CertPool> {
        let mut certs = Vec::new();

        for path in paths {
            let file = File::open(path)
                .map_err(|e| Error::Tls(format!("Failed to open cert file {:?}: {}", path, e)))?;
            let mut reader = BufReader::new(file);
            let loaded = rustls_pemfile::certs(&mut reader)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    Error::Tls(format!("Failed to parse certificates in {:?}: {}", path, e))
                })?;

            if loaded.is_empty() {
                return Err(Error::Tls(format!("No certificates found in {:?}", path)));
            }
            debug!("Loaded {} certificates from {:?}", loaded.len(), path);
            certs.extend(loaded);
        }

        Ok(CertPool::new(certs))
    }
}

/// Resolved TLS settings handed to the repo server client
#[derive(Debug, Clone)]
pub struct TlsConfiguration {
    pub mode: TlsMode,
    /// Trust pool, present only in strict mode
    pub certificates: Option<Arc<CertPool>>,
}

impl TlsConfiguration {
    pub fn disabled() -> Self {
        Self {
            mode: TlsMode::Disabled,
            certificates: None,
        }
    }

    /// Build the rustls client config, `None` when TLS is disabled
    pub fn client_config(&self) -> Result<Option<Arc<rustls::ClientConfig>>> {
        if self.mode == TlsMode::Disabled {
            return Ok(None);
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("Failed to select TLS versions: {}", e)))?;

        let config = if self.mode == TlsMode::Opportunistic {
            warn!("Repo server TLS identity is not verified; enable strict TLS to verify it");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification { provider }))
                .with_no_client_auth()
        } else {
            let pool = self.certificates.as_ref().ok_or_else(|| {
                Error::Tls("Strict TLS requested without a certificate pool".into())
            })?;

            let mut roots = rustls::RootCertStore::empty();
            for cert in pool.certs() {
                roots
                    .add(cert.clone())
                    .map_err(|e| Error::Tls(format!("Failed to add CA cert: {}", e)))?;
            }

            builder.with_root_certificates(roots).with_no_client_auth()
        };

        Ok(Some(Arc::new(config)))
    }
}

/// Select the TLS mode and load trust material when strict validation is on
pub fn prepare_tls(
    plaintext: bool,
    strict: bool,
    paths: &TlsPaths,
    loader: &dyn CertPoolLoader,
) -> Result<TlsConfiguration> {
    let mode = TlsMode::from_flags(plaintext, strict);

    let certificates = if mode == TlsMode::Strict {
        let pool = loader.load(&[paths.cert_path.as_path(), paths.ca_path.as_path()])?;
        if pool.is_empty() {
            return Err(Error::Tls("Loaded certificate pool is empty".into()));
        }
        info!(
            "Loaded {} trusted certificates for strict repo server validation",
            pool.len()
        );
        Some(Arc::new(pool))
    } else {
        None
    };

    Ok(TlsConfiguration { mode, certificates })
}

/// Certificate verifier that accepts any server identity
#[derive(Debug)]
struct SkipServerVerification {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    // Handshake signatures are still checked, only the chain is not
    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
