//! netfabric: coroutine-based building blocks for networked services.
//!
//! Three surfaces share one concurrency and transport skeleton:
//!
//! - [`api`] — an HTTP request/response server with content-negotiated
//!   body encoding (JSON/YAML/XML), plus the matching client;
//! - [`tcp`] — a length-unbounded TCP request/response framework where
//!   each connection is demultiplexed to named handlers;
//! - [`pipe`] — a uni- or bidirectional TCP pipe node bridging network
//!   traffic and in-process message channels.
//!
//! All three run on the `may` coroutine runtime, support optional TLS via
//! one reusable [`tls::TlsRecipe`], follow the same graceful lifecycle
//! (init → start → serve → stop → drain → exit, see [`runtime`]), and hand
//! user actions a per-request context with a three-tier cache.

pub mod api;
pub mod cache;
pub mod context;
pub mod encoding;
pub mod error;
pub mod pipe;
pub mod runtime;
pub mod stream;
pub mod tcp;
pub mod tls;

pub use encoding::Encoding;
pub use error::Error;
