//! TLS recipe assembly: defaults, CA pool population on readable vs
//! unreadable input, and build-time validation.

use std::io::Write;

use netfabric::tls::{MinVersion, Renegotiation, TlsRecipe};
use netfabric::Error;

// A throwaway self-signed certificate, PEM-encoded; only its parseability
// matters to these tests.
const DUMMY_PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUI\n-----END CERTIFICATE-----\n";

fn pem_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_recipe_defaults() {
    let recipe = TlsRecipe::new();
    assert_eq!(recipe.certificate_count(), 0);
    assert!(!recipe.has_root_cas());
    assert!(!recipe.has_client_cas());
}

#[test]
fn test_root_ca_pool_created_on_readable_file() {
    let file = pem_file(DUMMY_PEM);
    let recipe = TlsRecipe::new().with_root_ca(file.path());
    assert!(recipe.has_root_cas());
}

#[test]
fn test_root_ca_pool_not_created_on_unreadable_file() {
    let recipe = TlsRecipe::new().with_root_ca("/nonexistent/ca.pem");
    assert!(!recipe.has_root_cas());
}

#[test]
fn test_client_ca_pool_created_on_readable_file() {
    let file = pem_file(DUMMY_PEM);
    let recipe = TlsRecipe::new().with_client_ca(file.path());
    assert!(recipe.has_client_cas());
}

#[test]
fn test_client_ca_pool_not_created_on_unreadable_file() {
    let recipe = TlsRecipe::new().with_client_ca("/nonexistent/ca.pem");
    assert!(!recipe.has_client_cas());
}

#[test]
fn test_unreadable_certificate_pair_is_skipped() {
    let recipe = TlsRecipe::new().with_certificate("/nonexistent/cert.pem", "/nonexistent/key.pem");
    assert_eq!(recipe.certificate_count(), 0);
}

#[test]
fn test_server_build_requires_certificate() {
    let err = TlsRecipe::new().build_server().unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_server_build_accepts_cert_cache_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = TlsRecipe::new()
        .with_cert_cache_dir(dir.path())
        .build_server()
        .unwrap();
    assert!(!config.ignore_client_order);
}

#[test]
fn test_renegotiation_is_rejected() {
    let err = TlsRecipe::new()
        .with_renegotiation(Renegotiation::OnceAsClient)
        .build_client()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_client_builds_with_defaults() {
    let config = TlsRecipe::new().build_client().unwrap();
    drop(config);
}

#[test]
fn test_client_builds_with_insecure_skip_verify() {
    let config = TlsRecipe::new()
        .with_insecure_skip_verify(true)
        .with_min_version(MinVersion::Tls13)
        .build_client()
        .unwrap();
    drop(config);
}

#[test]
fn test_prefer_server_cipher_suites_flag() {
    let dir = tempfile::tempdir().unwrap();
    let config = TlsRecipe::new()
        .with_cert_cache_dir(dir.path())
        .with_prefer_server_cipher_suites(true)
        .with_session_cache(1024)
        .build_server()
        .unwrap();
    assert!(config.ignore_client_order);
}
