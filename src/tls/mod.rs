//! TLS configuration assembly.
//!
//! One [`TlsRecipe`] collects certificates, CA pools, cipher suites, curve
//! preferences, minimum version, renegotiation policy, session cache and an
//! optional directory-backed certificate resolver, and builds both the
//! server and the client side of a rustls configuration from the same
//! fields.

mod resolver;

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use may::net::TcpStream;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::Resumption;
use rustls::crypto::ring::{self, cipher_suite, kx_group};
use rustls::crypto::{CryptoProvider, SupportedKxGroup, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::{ServerSessionMemoryCache, WebPkiClientVerifier};
use rustls::version::{TLS12, TLS13};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, ServerConfig,
    ServerConnection, SignatureScheme, StreamOwned, SupportedCipherSuite,
    SupportedProtocolVersion,
};
use tracing::warn;

use crate::error::Error;
use crate::stream::NetStream;

pub use resolver::DirCertResolver;

/// Renegotiation policy. rustls never renegotiates, so only [`Never`]
/// builds; the other policies are kept for configuration parity and are
/// rejected at build time.
///
/// [`Never`]: Renegotiation::Never
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Renegotiation {
    #[default]
    Never,
    OnceAsClient,
    FreelyAsClient,
}

/// Minimum accepted protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinVersion {
    #[default]
    Tls12,
    Tls13,
}

/// Reusable TLS configuration recipe, consumed identically by client and
/// server assembly.
pub struct TlsRecipe {
    certificates: Vec<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    client_cas: Option<RootCertStore>,
    root_cas: Option<RootCertStore>,
    cipher_suites: Vec<SupportedCipherSuite>,
    curve_preferences: Vec<&'static dyn SupportedKxGroup>,
    min_version: MinVersion,
    renegotiation: Renegotiation,
    insecure_skip_verify: bool,
    prefer_server_cipher_suites: bool,
    session_cache_size: Option<usize>,
    cert_cache_dir: Option<PathBuf>,
}

impl Default for TlsRecipe {
    fn default() -> Self {
        TlsRecipe::new()
    }
}

impl TlsRecipe {
    /// A recipe with the stock suite and curve preferences: AES-256-GCM
    /// first, TLS 1.2 minimum, no renegotiation.
    pub fn new() -> TlsRecipe {
        TlsRecipe {
            certificates: Vec::new(),
            client_cas: None,
            root_cas: None,
            cipher_suites: vec![
                cipher_suite::TLS13_AES_256_GCM_SHA384,
                cipher_suite::TLS13_AES_128_GCM_SHA256,
                cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
                cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
                cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            ],
            curve_preferences: vec![kx_group::SECP384R1, kx_group::SECP256R1, kx_group::X25519],
            min_version: MinVersion::Tls12,
            renegotiation: Renegotiation::Never,
            insecure_skip_verify: false,
            prefer_server_cipher_suites: false,
            session_cache_size: None,
            cert_cache_dir: None,
        }
    }

    /// Loads a PEM certificate chain and key pair and appends them to the
    /// recipe. An unreadable pair is skipped with a warning.
    pub fn with_certificate(
        mut self,
        certificate: impl AsRef<Path>,
        key: impl AsRef<Path>,
    ) -> TlsRecipe {
        match (
            load_certs(certificate.as_ref()),
            load_private_key(key.as_ref()),
        ) {
            (Ok(chain), Ok(key)) => self.certificates.push((chain, key)),
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "skipping unreadable certificate pair");
            }
        }
        self
    }

    /// Appends a PEM root CA certificate to the root pool, creating the
    /// pool on first successful read.
    pub fn with_root_ca(mut self, certificate: impl AsRef<Path>) -> TlsRecipe {
        match fs::read(certificate.as_ref()) {
            Ok(pem) => append_pool(&mut self.root_cas, &pem),
            Err(err) => warn!(error = %err, "skipping unreadable root CA certificate"),
        }
        self
    }

    /// Appends a PEM client CA certificate to the client pool, creating the
    /// pool on first successful read.
    pub fn with_client_ca(mut self, certificate: impl AsRef<Path>) -> TlsRecipe {
        match fs::read(certificate.as_ref()) {
            Ok(pem) => append_pool(&mut self.client_cas, &pem),
            Err(err) => warn!(error = %err, "skipping unreadable client CA certificate"),
        }
        self
    }

    /// Resolves server certificates from `<sni>.pem` / `<sni>-key.pem`
    /// files under `dir` instead of a fixed certificate.
    pub fn with_cert_cache_dir(mut self, dir: impl Into<PathBuf>) -> TlsRecipe {
        self.cert_cache_dir = Some(dir.into());
        self
    }

    pub fn with_min_version(mut self, min: MinVersion) -> TlsRecipe {
        self.min_version = min;
        self
    }

    pub fn with_insecure_skip_verify(mut self, insecure: bool) -> TlsRecipe {
        self.insecure_skip_verify = insecure;
        self
    }

    pub fn with_renegotiation(mut self, renegotiation: Renegotiation) -> TlsRecipe {
        self.renegotiation = renegotiation;
        self
    }

    /// Enables an in-memory session cache holding `size` entries.
    pub fn with_session_cache(mut self, size: usize) -> TlsRecipe {
        self.session_cache_size = Some(size);
        self
    }

    /// Appends a cipher suite to the preset list.
    pub fn more_cipher_suites(mut self, suite: SupportedCipherSuite) -> TlsRecipe {
        self.cipher_suites.push(suite);
        self
    }

    /// Appends a key exchange group to the preset list.
    pub fn more_curve_preferences(mut self, group: &'static dyn SupportedKxGroup) -> TlsRecipe {
        self.curve_preferences.push(group);
        self
    }

    pub fn with_prefer_server_cipher_suites(mut self, prefer: bool) -> TlsRecipe {
        self.prefer_server_cipher_suites = prefer;
        self
    }

    pub fn has_root_cas(&self) -> bool {
        self.root_cas.is_some()
    }

    pub fn has_client_cas(&self) -> bool {
        self.client_cas.is_some()
    }

    pub fn certificate_count(&self) -> usize {
        self.certificates.len()
    }

    fn protocol_versions(&self) -> &'static [&'static SupportedProtocolVersion] {
        static TLS12_AND_TLS13: &[&SupportedProtocolVersion] = &[&TLS13, &TLS12];
        static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&TLS13];
        match self.min_version {
            MinVersion::Tls12 => TLS12_AND_TLS13,
            MinVersion::Tls13 => TLS13_ONLY,
        }
    }

    fn provider(&self) -> Arc<CryptoProvider> {
        Arc::new(CryptoProvider {
            cipher_suites: self.cipher_suites.clone(),
            kx_groups: self.curve_preferences.clone(),
            ..ring::default_provider()
        })
    }

    fn check_renegotiation(&self) -> Result<(), Error> {
        if self.renegotiation != Renegotiation::Never {
            return Err(Error::InvalidConfig(
                "renegotiation is not supported; use Renegotiation::Never".to_string(),
            ));
        }
        Ok(())
    }

    /// Assembles the server-side rustls configuration.
    pub fn build_server(&self) -> Result<Arc<ServerConfig>, Error> {
        self.check_renegotiation()?;
        let builder = ServerConfig::builder_with_provider(self.provider())
            .with_protocol_versions(self.protocol_versions())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let builder = match &self.client_cas {
            Some(pool) => {
                let verifier = WebPkiClientVerifier::builder(Arc::new(pool.clone()))
                    .build()
                    .map_err(|e| Error::InvalidConfig(e.to_string()))?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };
        let mut config = match &self.cert_cache_dir {
            Some(dir) => builder.with_cert_resolver(Arc::new(DirCertResolver::new(dir.clone()))),
            None => {
                let (chain, key) = self
                    .certificates
                    .first()
                    .map(|(chain, key)| (chain.clone(), key.clone_key()))
                    .ok_or_else(|| {
                        Error::InvalidConfig(
                            "TLS server requires a certificate or a certificate cache directory"
                                .to_string(),
                        )
                    })?;
                builder
                    .with_single_cert(chain, key)
                    .map_err(|e| Error::InvalidConfig(e.to_string()))?
            }
        };
        config.ignore_client_order = self.prefer_server_cipher_suites;
        if let Some(size) = self.session_cache_size {
            config.session_storage = ServerSessionMemoryCache::new(size);
        }
        Ok(Arc::new(config))
    }

    /// Assembles the client-side rustls configuration.
    pub fn build_client(&self) -> Result<Arc<ClientConfig>, Error> {
        self.check_renegotiation()?;
        let provider = self.provider();
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(self.protocol_versions())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let builder = if self.insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert {
                    algorithms: provider.signature_verification_algorithms,
                }))
        } else {
            let roots = match &self.root_cas {
                Some(pool) => pool.clone(),
                None => {
                    let mut pool = RootCertStore::empty();
                    pool.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                    pool
                }
            };
            builder.with_root_certificates(roots)
        };
        let mut config = match self.certificates.first() {
            Some((chain, key)) => builder
                .with_client_auth_cert(chain.clone(), key.clone_key())
                .map_err(|e| Error::InvalidConfig(e.to_string()))?,
            None => builder.with_no_client_auth(),
        };
        if let Some(size) = self.session_cache_size {
            config.resumption = Resumption::in_memory_sessions(size);
        }
        Ok(Arc::new(config))
    }
}

fn append_pool(pool: &mut Option<RootCertStore>, pem: &[u8]) {
    let store = pool.get_or_insert_with(RootCertStore::empty);
    let certs: Vec<CertificateDer<'static>> = match rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<Result<_, _>>()
    {
        Ok(certs) => certs,
        Err(err) => {
            warn!(error = %err, "skipping unparsable CA certificate");
            return;
        }
    };
    let (added, ignored) = store.add_parsable_certificates(certs);
    if ignored > 0 {
        warn!(added, ignored, "some CA certificates were not parsable");
    }
}

/// Reads a PEM certificate chain.
pub fn load_certs(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = fs::File::open(path.as_ref())?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(Error::Io)
}

/// Reads a PEM private key.
pub fn load_private_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>, Error> {
    let file = fs::File::open(path.as_ref())?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(Error::Io)?
        .ok_or_else(|| Error::InvalidConfig("no private key found in file".to_string()))
}

/// Wraps an accepted socket in a server-side TLS stream.
pub fn server_stream(
    config: Arc<ServerConfig>,
    sock: TcpStream,
) -> Result<Box<dyn NetStream>, Error> {
    let conn = ServerConnection::new(config).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    Ok(Box::new(StreamOwned::new(conn, sock)))
}

/// Wraps a dialed socket in a client-side TLS stream for `host`.
pub fn client_stream(
    config: Arc<ClientConfig>,
    host: &str,
    sock: TcpStream,
) -> Result<Box<dyn NetStream>, Error> {
    let name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::InvalidConfig(format!("invalid TLS server name {host}: {e}")))?;
    let conn =
        ClientConnection::new(config, name).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    Ok(Box::new(StreamOwned::new(conn, sock)))
}

/// Verifier behind `insecure_skip_verify`: accepts any server certificate.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
