use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use rustls::crypto::ring::sign::any_supported_type;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tracing::{debug, warn};

use super::{load_certs, load_private_key};

/// Certificate resolver backed by an on-disk cache directory.
///
/// For a client hello carrying SNI name `example.com`, the resolver loads
/// `example.com.pem` and `example.com-key.pem` from the directory and keeps
/// the parsed pair in memory for later handshakes. Hellos without SNI, or
/// names with no matching files, resolve to nothing and the handshake fails.
#[derive(Debug)]
pub struct DirCertResolver {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl DirCertResolver {
    pub fn new(dir: PathBuf) -> DirCertResolver {
        DirCertResolver {
            dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn load(&self, name: &str) -> Option<Arc<CertifiedKey>> {
        // SNI names are never paths, but keep file lookups inside the dir.
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            warn!(name, "rejecting suspicious server name");
            return None;
        }
        let cert_path = self.dir.join(format!("{name}.pem"));
        let key_path = self.dir.join(format!("{name}-key.pem"));
        let chain = match load_certs(&cert_path) {
            Ok(chain) if !chain.is_empty() => chain,
            Ok(_) => {
                warn!(path = %cert_path.display(), "certificate file holds no certificates");
                return None;
            }
            Err(err) => {
                warn!(path = %cert_path.display(), error = %err, "no cached certificate");
                return None;
            }
        };
        let key = match load_private_key(&key_path) {
            Ok(key) => key,
            Err(err) => {
                warn!(path = %key_path.display(), error = %err, "no cached key");
                return None;
            }
        };
        let signing_key = match any_supported_type(&key) {
            Ok(key) => key,
            Err(err) => {
                warn!(path = %key_path.display(), error = %err, "unsupported key type");
                return None;
            }
        };
        Some(Arc::new(CertifiedKey::new(chain, signing_key)))
    }
}

impl ResolvesServerCert for DirCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let name = client_hello.server_name()?.to_string();
        if let Some(cached) = self.cache.read().unwrap().get(&name) {
            return Some(Arc::clone(cached));
        }
        let loaded = self.load(&name)?;
        debug!(name, "cached certificate loaded from disk");
        self.cache
            .write()
            .unwrap()
            .insert(name, Arc::clone(&loaded));
        Some(loaded)
    }
}
