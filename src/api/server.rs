use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use may::coroutine::JoinHandle;
use may::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::request::{read_request, ParsedRequest};
use super::response::{write_json_error, write_response};
use super::{ApiHandler, ApiServerConfig};
use crate::cache::{Cache, SharedCache};
use crate::context::{ApiContext, ResponseParts};
use crate::error::Error;
use crate::runtime::{bind_address, wake_address, Lifecycle};
use crate::stream::NetStream;
use crate::tls;

/// Read poll applied to idle keep-alive connections so workers notice a
/// server stop.
const IDLE_POLL: Duration = Duration::from_millis(500);

struct ApiServerInner {
    lifecycle: Arc<Lifecycle>,
    config: Mutex<Option<ApiServerConfig>>,
    handlers: Mutex<HashMap<String, Arc<ApiHandler>>>,
    router: Mutex<matchit::Router<Arc<ApiHandler>>>,
    server_cache: SharedCache,
    bound_addr: Mutex<Option<SocketAddr>>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

/// HTTP API server.
///
/// Owns a path router; each registered [`ApiHandler`] answers one path with
/// method-keyed actions. `init` → `add_path`* → `start` → `stop` → `wait`.
#[derive(Clone)]
pub struct ApiServer {
    inner: Arc<ApiServerInner>,
}

impl Default for ApiServer {
    fn default() -> Self {
        ApiServer::new()
    }
}

impl ApiServer {
    pub fn new() -> ApiServer {
        ApiServer {
            inner: Arc::new(ApiServerInner {
                lifecycle: Lifecycle::new(),
                config: Mutex::new(None),
                handlers: Mutex::new(HashMap::new()),
                router: Mutex::new(matchit::Router::new()),
                server_cache: Cache::shared(),
                bound_addr: Mutex::new(None),
                accept_handle: Mutex::new(None),
            }),
        }
    }

    /// Applies the server configuration. Rejected while running.
    pub fn init(&self, config: ApiServerConfig) -> Result<(), Error> {
        if self.inner.lifecycle.running() {
            return Err(Error::AlreadyRunning);
        }
        *self.inner.config.lock().unwrap() = Some(config);
        Ok(())
    }

    /// Registers a handler under its path.
    ///
    /// Rejects empty paths, handlers without actions, and duplicate paths;
    /// the first registration stays active.
    pub fn add_path(&self, handler: ApiHandler) -> Result<(), Error> {
        let path = handler.path().to_string();
        if path.is_empty() {
            warn!("empty path for api handler");
            return Err(Error::InvalidConfig("handler has an empty path".to_string()));
        }
        if handler.methods().is_empty() {
            warn!(path = %path, "no web methods for api handler");
            return Err(Error::InvalidConfig(format!(
                "handler for path {path} has no method actions"
            )));
        }
        let mut handlers = self.inner.handlers.lock().unwrap();
        if handlers.contains_key(&path) {
            warn!(path = %path, "duplicated api handler");
            return Err(Error::Duplicate(path));
        }
        let handler = Arc::new(handler);
        self.inner
            .router
            .lock()
            .unwrap()
            .insert(path.clone(), Arc::clone(&handler))
            .map_err(|e| Error::InvalidConfig(format!("unroutable path {path}: {e}")))?;
        debug!(path = %path, "api handler registered");
        handlers.insert(path, handler);
        Ok(())
    }

    /// Binds the listener and starts serving requests.
    ///
    /// Binds TLS when the configuration carries both certificate and key
    /// paths, plain HTTP otherwise. A bind failure leaves the server idle.
    pub fn start(&self) -> Result<(), Error> {
        if self.inner.lifecycle.running() {
            error!("server already running");
            return Err(Error::AlreadyRunning);
        }
        let (address, tls_config) = {
            let mut guard = self.inner.config.lock().unwrap();
            let config = guard.as_mut().ok_or_else(|| {
                Error::InvalidConfig("no server configuration provided".to_string())
            })?;
            self.inner.lifecycle.set_timeouts(config.timeouts);
            let tls_config = match (&config.cert_path, &config.key_path) {
                (Some(cert), Some(key)) => {
                    let recipe = config
                        .tls
                        .take()
                        .unwrap_or_default()
                        .with_certificate(cert, key);
                    Some(recipe.build_server()?)
                }
                _ => None,
            };
            (bind_address(&config.host, config.port), tls_config)
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
        info!(address = %local_addr, tls = tls_config.is_some(), "api server started");
        let inner = Arc::clone(&self.inner);
        let handle = may::go!(move || accept_clients(inner, listener, tls_config));
        *self.inner.accept_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Posts the shutdown signal and closes the listener.
    ///
    /// In-flight requests drain through the exit check; when waking the
    /// blocked accept fails, the counters are zeroed so exit cannot hang.
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
    inner: Arc<ApiServerInner>,
    listener: TcpListener,
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
                may::go!(move || handle_connection(inner, sock, tls_config, peer));
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
    inner: Arc<ApiServerInner>,
    sock: TcpStream,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    peer: SocketAddr,
) {
    let mut conn: Box<dyn NetStream> = match tls_config {
        Some(config) => match tls::server_stream(config, sock) {
            Ok(conn) => conn,
            Err(err) => {
                error!(peer = %peer, error = %err, "tls session setup failed");
                return;
            }
        },
        None => Box::new(sock),
    };
    if let Err(err) = conn.set_read_timeout(Some(IDLE_POLL)) {
        error!(peer = %peer, error = %err, "failed to arm read timeout");
        return;
    }
    loop {
        let request = match read_request(conn.as_mut(), &inner.lifecycle) {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(err) => {
                error!(peer = %peer, error = %err, "request read failed");
                break;
            }
        };
        let keep_alive = request.keep_alive && inner.lifecycle.running();
        inner.lifecycle.register_request();
        let parts = dispatch(&inner, request, peer);
        inner.lifecycle.deregister_request();
        let written = match parts {
            Some(parts) => write_response(conn.as_mut(), &parts, keep_alive),
            None => write_json_error(conn.as_mut(), StatusCode::NOT_FOUND, "Not Found", keep_alive),
        };
        if let Err(err) = written {
            error!(peer = %peer, error = %err, "response write failed");
            break;
        }
        if !keep_alive {
            break;
        }
    }
    debug!(peer = %peer, "closing connection");
}

/// Routes the request and runs the matching action. `None` means no route
/// or no action for the method, both answered with 404.
fn dispatch(
    inner: &Arc<ApiServerInner>,
    request: ParsedRequest,
    peer: SocketAddr,
) -> Option<ResponseParts> {
    let handler = {
        let router = inner.router.lock().unwrap();
        match router.at(&request.path) {
            Ok(matched) => Arc::clone(matched.value),
            Err(_) => return None,
        }
    };
    let mut ctx = ApiContext::new(
        request.path,
        request.method,
        Some(peer),
        request.headers,
        request.body,
        handler.handler_cache(),
        Arc::clone(&inner.server_cache),
    );
    if handler.handle(&mut ctx) {
        Some(ctx.into_response())
    } else {
        None
    }
}
