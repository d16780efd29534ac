use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use may::coroutine::JoinHandle;
use may::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::{TcpHandler, TcpServerConfig};
use crate::cache::{Cache, SharedCache};
use crate::encoding::Encoding;
use crate::error::Error;
use crate::runtime::{bind_address, wake_address, Lifecycle};
use crate::stream::{NetStream, SharedConn, StreamBuffer};
use crate::tls;

struct TcpServerInner {
    lifecycle: Arc<Lifecycle>,
    config: Mutex<Option<TcpServerConfig>>,
    handlers: Mutex<Vec<Arc<TcpHandler>>>,
    server_cache: SharedCache,
    bound_addr: Mutex<Option<SocketAddr>>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

/// TCP request/response server.
///
/// Every accepted connection is enrolled into a fresh stream buffer and
/// fanned out to all registered handlers, which run concurrently and share
/// the buffer. `init` → `add_path`* → `start` → `stop` → `wait`.
#[derive(Clone)]
pub struct TcpServer {
    inner: Arc<TcpServerInner>,
}

impl Default for TcpServer {
    fn default() -> Self {
        TcpServer::new()
    }
}

impl TcpServer {
    pub fn new() -> TcpServer {
        TcpServer {
            inner: Arc::new(TcpServerInner {
                lifecycle: Lifecycle::new(),
                config: Mutex::new(None),
                handlers: Mutex::new(Vec::new()),
                server_cache: Cache::shared(),
                bound_addr: Mutex::new(None),
                accept_handle: Mutex::new(None),
            }),
        }
    }

    /// Applies the server configuration. Rejected while running.
    pub fn init(&self, config: TcpServerConfig) -> Result<(), Error> {
        if self.inner.lifecycle.running() {
            return Err(Error::AlreadyRunning);
        }
        *self.inner.config.lock().unwrap() = Some(config);
        Ok(())
    }

    /// Registers a named handler.
    ///
    /// Rejects handlers without actions and duplicate names; the first
    /// registration stays active.
    pub fn add_path(&self, handler: TcpHandler) -> Result<(), Error> {
        let name = handler.name().to_string();
        if handler.action_names().is_empty() {
            warn!(name = %name, "no actions for tcp handler");
            return Err(Error::InvalidConfig(format!(
                "handler {name} has no actions"
            )));
        }
        let mut handlers = self.inner.handlers.lock().unwrap();
        if handlers.iter().any(|h| h.name() == name) {
            warn!(name = %name, "duplicated tcp handler");
            return Err(Error::Duplicate(name));
        }
        debug!(name = %name, "tcp handler registered");
        handlers.push(Arc::new(handler));
        Ok(())
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Binds a TLS listener when the configuration carries a recipe, plain
    /// TCP otherwise. A bind failure leaves the server idle.
    pub fn start(&self) -> Result<(), Error> {
        if self.inner.lifecycle.running() {
            error!("server already running");
            return Err(Error::AlreadyRunning);
        }
        let (address, encoding, tls_config) = {
            let guard = self.inner.config.lock().unwrap();
            let config = guard.as_ref().ok_or_else(|| {
                Error::InvalidConfig("no server configuration provided".to_string())
            })?;
            self.inner.lifecycle.set_timeouts(config.timeouts);
            let tls_config = match &config.tls {
                Some(recipe) => Some(recipe.build_server()?),
                None => None,
            };
            (
                bind_address(&config.host, config.port),
                config.encoding,
                tls_config,
            )
        };
        let listener = match TcpListener::bind(&address) {
            Ok(listener) => listener,
            Err(err) => {
                error!(address = %address, error = %err, "server failed to start");
                return Err(Error::Io(err));
            }
        };
        let local_addr = listener.local_addr()?;
        *self.inner.bound_addr.lock().unwrap() = Some(local_addr);
        self.inner.lifecycle.open_channels();
        self.inner.lifecycle.set_running(true);
        info!(address = %local_addr, tls = tls_config.is_some(), "tcp server started");
        let inner = Arc::clone(&self.inner);
        let handle = may::go!(move || accept_clients(inner, listener, encoding, tls_config));
        *self.inner.accept_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Posts the shutdown signal and closes the listener.
    pub fn stop(&self) -> Result<(), Error> {
        if !self.inner.lifecycle.running() {
            error!("server is already stopped");
            return Err(Error::AlreadyStopped);
        }
        self.inner.lifecycle.post_shutdown();
        self.inner.lifecycle.spawn_exit_check(|| {});
        self.inner.lifecycle.set_running(false);
        let bound = self.inner.bound_addr.lock().unwrap().take();
        if let Some(addr) = bound {
            if let Err(err) = std::net::TcpStream::connect(wake_address(addr)) {
                warn!(error = %err, "graceful listener close failed, forcing drain");
                self.inner.lifecycle.zero_counters();
            }
        }
        if let Some(handle) = self.inner.accept_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    pub fn running(&self) -> bool {
        self.inner.lifecycle.running()
    }

    pub fn working(&self) -> bool {
        self.inner.lifecycle.working()
    }

    /// Blocks until the server has exited, then returns after the settling
    /// delay.
    pub fn wait(&self) {
        self.inner.lifecycle.wait();
    }

    /// The address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.bound_addr.lock().unwrap()
    }
}

fn accept_clients(
    inner: Arc<TcpServerInner>,
    listener: TcpListener,
    encoding: Encoding,
    tls_config: Option<Arc<rustls::ServerConfig>>,
) {
    loop {
        match listener.accept() {
            Ok((sock, peer)) => {
                if !inner.lifecycle.running() {
                    debug!("accept loop stopping");
                    break;
                }
                debug!(peer = %peer, "handling request");
                let inner = Arc::clone(&inner);
                let tls_config = tls_config.clone();
                may::go!(move || handle_connection(inner, sock, encoding, tls_config, peer));
            }
            Err(err) => {
                if !inner.lifecycle.running() {
                    break;
                }
                error!(error = %err, "acceptance error");
            }
        }
    }
}

fn handle_connection(
    inner: Arc<TcpServerInner>,
    sock: TcpStream,
    encoding: Encoding,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    peer: SocketAddr,
) {
    let handlers = inner.handlers.lock().unwrap().clone();
    if handlers.is_empty() {
        warn!(peer = %peer, "closing connection, no handlers registered");
        return;
    }
    let conn: Box<dyn NetStream> = match tls_config {
        Some(config) => match tls::server_stream(config, sock) {
            Ok(conn) => conn,
            Err(err) => {
                error!(peer = %peer, error = %err, "tls session setup failed");
                return;
            }
        },
        None => Box::new(sock),
    };
    let conn = SharedConn::new(conn);
    let turn_reset = inner.lifecycle.timeouts().turn_reset;
    let buffer = StreamBuffer::new(turn_reset);
    buffer.enroll(conn.clone());
    let mut joins = Vec::with_capacity(handlers.len());
    for handler in handlers {
        let inner = Arc::clone(&inner);
        let conn = conn.clone();
        let buffer = buffer.clone();
        joins.push(may::go!(move || {
            inner.lifecycle.register_request();
            debug!(peer = %peer, handler = %handler.name(), "handling request");
            handler.handle(conn, buffer, encoding, Arc::clone(&inner.server_cache));
            inner.lifecycle.deregister_request();
        }));
    }
    for join in joins {
        let _ = join.join();
    }
    buffer.close();
    debug!(peer = %peer, "closing connection");
}
