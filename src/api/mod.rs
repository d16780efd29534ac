//! HTTP API surface: a request/response server with content-negotiated
//! body encoding, and the matching client.
//!
//! The server owns its accept loop so lifecycle accounting and shutdown
//! behave identically across the HTTP, TCP and pipe surfaces. Requests are
//! parsed with `httparse`, routed by path through a `matchit` router, then
//! dispatched to the method-keyed action of the registered handler.

mod client;
mod handler;
mod request;
mod response;
mod server;

use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::Timeouts;
use crate::tls::TlsRecipe;

pub use client::ApiClient;
pub use handler::{ApiAction, ApiHandler, ApiHandlerBuilder};
pub use server::ApiServer;

/// HTTP server connection properties.
pub struct ApiServerConfig {
    /// Host name or address; empty binds every interface.
    pub host: String,
    pub port: u16,
    /// TLS certificate file path; TLS is enabled when both paths are set.
    pub cert_path: Option<PathBuf>,
    /// TLS certificate key file path.
    pub key_path: Option<PathBuf>,
    /// Recipe for the TLS listener; a default recipe is used when TLS is
    /// enabled without one.
    pub tls: Option<TlsRecipe>,
    pub timeouts: Timeouts,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        ApiServerConfig {
            host: String::new(),
            port: 0,
            cert_path: None,
            key_path: None,
            tls: None,
            timeouts: Timeouts::default(),
        }
    }
}

/// HTTP client connection properties.
pub struct ApiClientConfig {
    /// Communication protocol, `http` or `https`.
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Request timeout; `None` means unset.
    pub timeout: Option<Duration>,
    /// Extra root CA certificate (PEM) trusted for `https`.
    pub root_ca_path: Option<PathBuf>,
    /// Skip server certificate verification.
    pub insecure_skip_verify: bool,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        ApiClientConfig {
            protocol: "http".to_string(),
            host: String::new(),
            port: 0,
            timeout: None,
            root_ca_path: None,
            insecure_skip_verify: false,
        }
    }
}
