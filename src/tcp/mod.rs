//! TCP request/response surface: a server demultiplexing each connection to
//! named handlers over a shared stream buffer, and the matching client.
//!
//! The wire carries no framing: one connection holds one logical request
//! and one logical response, delimited by socket idle. When more than one
//! handler is registered, all of them run concurrently against the same
//! stream buffer; reads compete, so multi-handler setups should either
//! coordinate who reads or treat the extra handlers as write-only.

mod client;
mod handler;
mod server;

use std::time::Duration;

use crate::encoding::Encoding;
use crate::runtime::Timeouts;
use crate::tls::TlsRecipe;

pub use client::TcpClient;
pub use handler::{TcpAction, TcpHandler, TcpHandlerBuilder};
pub use server::TcpServer;

/// TCP server connection properties.
pub struct TcpServerConfig {
    /// Connection network type; informational, always TCP.
    pub network: String,
    /// Host name or address; empty binds every interface.
    pub host: String,
    pub port: u16,
    /// Encoding applied to every request and response.
    pub encoding: Encoding,
    /// TLS recipe; plain TCP when unset.
    pub tls: Option<TlsRecipe>,
    pub timeouts: Timeouts,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        TcpServerConfig {
            network: "tcp".to_string(),
            host: String::new(),
            port: 0,
            encoding: Encoding::Json,
            tls: None,
            timeouts: Timeouts::default(),
        }
    }
}

/// TCP client connection properties.
pub struct TcpClientConfig {
    /// Connection network type; informational, always TCP.
    pub network: String,
    pub host: String,
    pub port: u16,
    /// Read/write deadline applied after connect; `None` means unset.
    pub timeout: Option<Duration>,
    /// Encoding applied to every request and response.
    pub encoding: Encoding,
    /// TLS recipe; plain TCP when unset.
    pub tls: Option<TlsRecipe>,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        TcpClientConfig {
            network: "tcp".to_string(),
            host: String::new(),
            port: 0,
            timeout: None,
            encoding: Encoding::Json,
            tls: None,
        }
    }
}
