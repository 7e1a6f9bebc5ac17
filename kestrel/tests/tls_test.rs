//! Tests for loading repo server trust material from disk

use kestrel::repo_client::RepoServerClient;
use kestrel::tls::{prepare_tls, PemCertPoolLoader, TlsMode, TlsPaths};
use kestrel::{Error, ErrorCategory};
use std::path::Path;
use tempfile::TempDir;

// Test CA and a server certificate it signed
const CA_PEM: &str = include_str!("fixtures/ca.crt");
const CERT_PEM: &str = include_str!("fixtures/tls.crt");

// Well-formed PEM around a truncated DER body
const MALFORMED_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBszCCAVmgAwIBAgIUY2VydGlmaWNhdGUtYm9keQ==
-----END CERTIFICATE-----
";

fn write_material(base: &Path, cert: Option<&str>, ca: Option<&str>) -> TlsPaths {
    let paths = TlsPaths::under(base);
    std::fs::create_dir_all(paths.cert_path.parent().unwrap()).unwrap();
    if let Some(cert) = cert {
        std::fs::write(&paths.cert_path, cert).unwrap();
    }
    if let Some(ca) = ca {
        std::fs::write(&paths.ca_path, ca).unwrap();
    }
    paths
}

#[test]
fn test_strict_with_valid_files() {
    let temp = TempDir::new().unwrap();
    let paths = write_material(temp.path(), Some(CERT_PEM), Some(CA_PEM));

    let config = prepare_tls(false, true, &paths, &PemCertPoolLoader).unwrap();
    assert_eq!(config.mode, TlsMode::Strict);

    let pool = config.certificates.as_ref().expect("strict mode carries a pool");
    assert_eq!(pool.len(), 2);
    assert!(!pool.is_empty());

    let client = RepoServerClient::new("kestrel-repo-server:8081", 5, config).unwrap();
    assert_eq!(client.tls_mode(), TlsMode::Strict);
    assert!(client.rustls_config().is_some());
}

#[test]
fn test_strict_with_malformed_certificate() {
    let temp = TempDir::new().unwrap();
    let paths = write_material(temp.path(), Some(MALFORMED_PEM), Some(CA_PEM));

    // The loader only checks PEM framing
    let config = prepare_tls(false, true, &paths, &PemCertPoolLoader).unwrap();
    assert!(matches!(config.client_config(), Err(Error::Tls(_))));
    assert!(matches!(
        RepoServerClient::new("kestrel-repo-server:8081", 5, config),
        Err(Error::Tls(_))
    ));
}

#[test]
fn test_strict_with_missing_ca() {
    let temp = TempDir::new().unwrap();
    let paths = write_material(temp.path(), Some(CERT_PEM), None);

    let err = prepare_tls(false, true, &paths, &PemCertPoolLoader).unwrap_err();
    assert!(matches!(err, Error::Tls(_)));
    assert_eq!(err.category(), ErrorCategory::FatalSecurity);
}

#[test]
fn test_strict_with_missing_cert() {
    let temp = TempDir::new().unwrap();
    let paths = write_material(temp.path(), None, Some(CA_PEM));

    assert!(matches!(
        prepare_tls(false, true, &paths, &PemCertPoolLoader),
        Err(Error::Tls(_))
    ));
}

#[test]
fn test_strict_with_file_without_certificates() {
    let temp = TempDir::new().unwrap();
    let paths = write_material(temp.path(), Some("not a certificate\n"), Some(CA_PEM));

    assert!(matches!(
        prepare_tls(false, true, &paths, &PemCertPoolLoader),
        Err(Error::Tls(_))
    ));
}

#[test]
fn test_non_strict_ignores_missing_files() {
    let temp = TempDir::new().unwrap();
    let paths = TlsPaths::under(temp.path());

    let config = prepare_tls(false, false, &paths, &PemCertPoolLoader).unwrap();
    assert_eq!(config.mode, TlsMode::Opportunistic);
    assert!(config.certificates.is_none());

    let config = prepare_tls(true, true, &paths, &PemCertPoolLoader).unwrap();
    assert_eq!(config.mode, TlsMode::Disabled);
}
