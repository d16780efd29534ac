//! Pipe node: a directional bridge between TCP endpoints and in-process
//! message channels.
//!
//! The input side listens, reads each accepted connection to completion and
//! publishes the bytes on the inbound channel. The output side consumes the
//! outbound channel and dials the configured peer once per message. Which
//! sides exist follows from the configuration: an input endpoint, an output
//! endpoint, or both.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use may::coroutine;
use may::coroutine::JoinHandle;
use may::net::{TcpListener, TcpStream};
use may::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::runtime::{bind_address, wake_address, Lifecycle, Timeouts};
use crate::stream::NetStream;
use crate::tls::{self, TlsRecipe};

/// Settling sleep before an outbound dial is closed, giving the peer time
/// to drain the socket.
const DIAL_SETTLE: Duration = Duration::from_secs(1);

/// An opaque byte message carried through a pipe; the node imposes no
/// framing.
pub type PipeMessage = Vec<u8>;

/// Which sides of the pipe are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeType {
    Input,
    Output,
    InputOutput,
}

/// Pipe node endpoints and transport properties.
///
/// Setting the input port enables the listening side; setting the output
/// port enables the dialing side; both together make a bidirectional node.
pub struct PipeNodeConfig {
    /// Input host name or address; empty binds every interface.
    pub in_host: String,
    pub in_port: u16,
    /// Output host name or address; empty dials loopback.
    pub out_host: String,
    pub out_port: u16,
    /// TLS recipe applied to both the listener and outbound dials.
    pub tls: Option<TlsRecipe>,
    pub timeouts: Timeouts,
}

impl Default for PipeNodeConfig {
    fn default() -> Self {
        PipeNodeConfig {
            in_host: String::new(),
            in_port: 0,
            out_host: String::new(),
            out_port: 0,
            tls: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl PipeNodeConfig {
    /// Node type derived from which endpoints are configured. Setting a
    /// host with port zero binds or dials an ephemeral/default port, so
    /// either field activates the side.
    pub fn node_type(&self) -> Option<PipeType> {
        let input = self.in_port > 0 || !self.in_host.is_empty();
        let output = self.out_port > 0 || !self.out_host.is_empty();
        match (input, output) {
            (true, true) => Some(PipeType::InputOutput),
            (true, false) => Some(PipeType::Input),
            (false, true) => Some(PipeType::Output),
            (false, false) => None,
        }
    }
}

struct PipeInner {
    lifecycle: Arc<Lifecycle>,
    config: Mutex<Option<PipeNodeConfig>>,
    node_type: Mutex<Option<PipeType>>,
    // Sender feeding received messages to the user; receiver taken once.
    inbound_tx: Mutex<Option<Sender<PipeMessage>>>,
    inbound_rx: Mutex<Option<Receiver<PipeMessage>>>,
    // Sender handed to the user; the receiver lives in the dial loop.
    outbound_tx: Mutex<Option<Sender<PipeMessage>>>,
    inbound_open: AtomicBool,
    outbound_open: AtomicBool,
    bound_addr: Mutex<Option<SocketAddr>>,
    output_address: Mutex<String>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

/// A uni- or bidirectional TCP pipe node.
///
/// `init` → `start` → `until_started` → exchange messages through
/// [`incoming`](PipeNode::incoming) / [`outgoing`](PipeNode::outgoing) →
/// `stop` → `wait`.
#[derive(Clone)]
pub struct PipeNode {
    inner: Arc<PipeInner>,
}

impl Default for PipeNode {
    fn default() -> Self {
        PipeNode::new()
    }
}

impl PipeNode {
    pub fn new() -> PipeNode {
        PipeNode {
            inner: Arc::new(PipeInner {
                lifecycle: Lifecycle::with_clients(),
                config: Mutex::new(None),
                node_type: Mutex::new(None),
                inbound_tx: Mutex::new(None),
                inbound_rx: Mutex::new(None),
                outbound_tx: Mutex::new(None),
                inbound_open: AtomicBool::new(false),
                outbound_open: AtomicBool::new(false),
                bound_addr: Mutex::new(None),
                output_address: Mutex::new(String::new()),
                accept_handle: Mutex::new(None),
            }),
        }
    }

    /// Applies the node configuration. Rejected while running; rejected
    /// when neither endpoint is configured.
    pub fn init(&self, config: PipeNodeConfig) -> Result<(), Error> {
        if self.inner.lifecycle.running() {
            return Err(Error::AlreadyRunning);
        }
        let node_type = config.node_type().ok_or_else(|| {
            Error::InvalidConfig("pipe node has neither input nor output endpoint".to_string())
        })?;
        *self.inner.node_type.lock().unwrap() = Some(node_type);
        *self.inner.config.lock().unwrap() = Some(config);
        Ok(())
    }

    pub fn node_type(&self) -> Option<PipeType> {
        *self.inner.node_type.lock().unwrap()
    }

    /// Starts the configured sides: binds and serves the input listener,
    /// and/or starts the outbound dial loop.
    pub fn start(&self) -> Result<(), Error> {
        if self.inner.lifecycle.running() {
            error!("server already running");
            return Err(Error::AlreadyRunning);
        }
        let node_type = self.node_type().ok_or_else(|| {
            Error::InvalidConfig("no server configuration provided".to_string())
        })?;
        let (in_address, out_address, server_tls, client_tls, out_host, timeouts) = {
            let guard = self.inner.config.lock().unwrap();
            let config = guard.as_ref().ok_or_else(|| {
                Error::InvalidConfig("no server configuration provided".to_string())
            })?;
            let has_input = matches!(node_type, PipeType::Input | PipeType::InputOutput);
            let has_output = matches!(node_type, PipeType::Output | PipeType::InputOutput);
            let server_tls = match &config.tls {
                Some(recipe) if has_input => Some(recipe.build_server()?),
                _ => None,
            };
            let client_tls = match &config.tls {
                Some(recipe) if has_output => Some(recipe.build_client()?),
                _ => None,
            };
            let out_host = if config.out_host.is_empty() {
                "127.0.0.1".to_string()
            } else {
                config.out_host.clone()
            };
            (
                bind_address(&config.in_host, config.in_port),
                format!("{}:{}", out_host, config.out_port),
                server_tls,
                client_tls,
                out_host,
                config.timeouts,
            )
        };
        self.inner.lifecycle.set_timeouts(timeouts);
        self.inner.lifecycle.open_channels();
        if matches!(node_type, PipeType::Input | PipeType::InputOutput) {
            let listener = match TcpListener::bind(&in_address) {
                Ok(listener) => listener,
                Err(err) => {
                    error!(address = %in_address, error = %err, "server failed to start");
                    return Err(Error::Io(err));
                }
            };
            let local_addr = listener.local_addr()?;
            *self.inner.bound_addr.lock().unwrap() = Some(local_addr);
            let (tx, rx) = channel();
            *self.inner.inbound_tx.lock().unwrap() = Some(tx);
            *self.inner.inbound_rx.lock().unwrap() = Some(rx);
            self.inner.inbound_open.store(true, Ordering::SeqCst);
            self.inner.lifecycle.set_running(true);
            info!(address = %local_addr, "pipe input side started");
            let inner = Arc::clone(&self.inner);
            let handle = may::go!(move || accept_clients(inner, listener, server_tls));
            *self.inner.accept_handle.lock().unwrap() = Some(handle);
        }
        if matches!(node_type, PipeType::Output | PipeType::InputOutput) {
            *self.inner.output_address.lock().unwrap() = out_address.clone();
            let (tx, rx) = channel();
            *self.inner.outbound_tx.lock().unwrap() = Some(tx);
            self.inner.outbound_open.store(true, Ordering::SeqCst);
            self.inner.lifecycle.set_running(true);
            info!(peer = %out_address, "pipe output side started");
            let inner = Arc::clone(&self.inner);
            may::go!(move || consume_outbound(inner, rx, out_address, out_host, client_tls));
        }
        Ok(())
    }

    /// Both channels required by the node type exist and the node runs.
    pub fn is_operating(&self) -> bool {
        if !self.inner.lifecycle.running() {
            return false;
        }
        match self.node_type() {
            Some(PipeType::Input) => self.inner.inbound_open.load(Ordering::SeqCst),
            Some(PipeType::Output) => self.inner.outbound_open.load(Ordering::SeqCst),
            Some(PipeType::InputOutput) => {
                self.inner.inbound_open.load(Ordering::SeqCst)
                    && self.inner.outbound_open.load(Ordering::SeqCst)
            }
            None => false,
        }
    }

    /// Blocks until the node runs and its channels are open.
    pub fn until_started(&self) {
        debug!("waiting for node running and pipe channels open");
        let poll = self.inner.lifecycle.timeouts().client_reset;
        while !self.is_operating() {
            coroutine::sleep(poll);
        }
        debug!("node is running and pipe channels are open");
    }

    /// The stream of messages received from the network. The receiver can
    /// be taken once; it closes when the node exits.
    pub fn incoming(&self) -> Option<Receiver<PipeMessage>> {
        self.inner.inbound_rx.lock().unwrap().take()
    }

    /// Sender for messages to push out to the configured peer. Closes when
    /// the node exits.
    pub fn outgoing(&self) -> Option<Sender<PipeMessage>> {
        self.inner.outbound_tx.lock().unwrap().clone()
    }

    /// Posts the shutdown signal and closes the listener; the exit check
    /// tears down the data channels once the node has drained.
    pub fn stop(&self) -> Result<(), Error> {
        if !self.inner.lifecycle.running() {
            error!("server is already stopped");
            return Err(Error::AlreadyStopped);
        }
        self.inner.lifecycle.post_shutdown();
        let inner = Arc::clone(&self.inner);
        self.inner.lifecycle.spawn_exit_check(move || {
            inner.inbound_tx.lock().unwrap().take();
            inner.inbound_rx.lock().unwrap().take();
            inner.outbound_tx.lock().unwrap().take();
            inner.inbound_open.store(false, Ordering::SeqCst);
            inner.outbound_open.store(false, Ordering::SeqCst);
        });
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

    /// Blocks until the node has exited, then returns after the settling
    /// delay.
    pub fn wait(&self) {
        self.inner.lifecycle.wait();
    }

    /// The address the input listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.bound_addr.lock().unwrap()
    }

    /// The peer address the output side dials, once started.
    pub fn output_address(&self) -> Option<String> {
        let address = self.inner.output_address.lock().unwrap();
        if address.is_empty() {
            None
        } else {
            Some(address.clone())
        }
    }
}

fn accept_clients(
    inner: Arc<PipeInner>,
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

/// Reads one accepted connection to completion and publishes the bytes on
/// the inbound channel. Errors on a single connection are logged, never
/// fatal.
fn handle_connection(
    inner: Arc<PipeInner>,
    sock: TcpStream,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    peer: SocketAddr,
) {
    inner.lifecycle.register_request();
    let mut conn: Box<dyn NetStream> = match tls_config {
        Some(config) => match tls::server_stream(config, sock) {
            Ok(conn) => conn,
            Err(err) => {
                error!(peer = %peer, error = %err, "tls session setup failed");
                inner.lifecycle.deregister_request();
                return;
            }
        },
        None => Box::new(sock),
    };
    let mut data = Vec::new();
    match conn.read_to_end(&mut data) {
        Ok(_) if !data.is_empty() => {
            let tx = inner.inbound_tx.lock().unwrap().clone();
            if let Some(tx) = tx {
                let _ = tx.send(data);
            }
        }
        Ok(_) => debug!(peer = %peer, "empty message skipped"),
        Err(err) => warn!(peer = %peer, error = %err, "unread message from client"),
    }
    debug!(peer = %peer, "closing connection");
    inner.lifecycle.deregister_request();
}

/// Drains the outbound channel, dialing the configured peer once per
/// message in a fresh coroutine.
fn consume_outbound(
    inner: Arc<PipeInner>,
    rx: Receiver<PipeMessage>,
    address: String,
    host: String,
    tls_config: Option<Arc<rustls::ClientConfig>>,
) {
    let poll = inner.lifecycle.timeouts().client_reset;
    while inner.lifecycle.running() {
        match rx.try_recv() {
            Ok(message) => {
                let inner = Arc::clone(&inner);
                let address = address.clone();
                let host = host.clone();
                let tls_config = tls_config.clone();
                may::go!(move || call_client(inner, message, address, host, tls_config));
            }
            Err(TryRecvError::Empty) => coroutine::sleep(poll),
            Err(TryRecvError::Disconnected) => break,
        }
    }
    debug!("outbound consumer stopped");
}

/// Dials the peer, writes one message, settles and closes. Failures are
/// logged only; the message is dropped.
fn call_client(
    inner: Arc<PipeInner>,
    message: PipeMessage,
    address: String,
    host: String,
    tls_config: Option<Arc<rustls::ClientConfig>>,
) {
    inner.lifecycle.register_client();
    let outcome = dial_and_write(&message, &address, &host, tls_config);
    match outcome {
        Ok(()) => info!(peer = %address, "message sent to client"),
        Err(err) => error!(peer = %address, error = %err, "error sending message to client"),
    }
    inner.lifecycle.deregister_client();
}

fn dial_and_write(
    message: &[u8],
    address: &str,
    host: &str,
    tls_config: Option<Arc<rustls::ClientConfig>>,
) -> Result<(), Error> {
    let sock = TcpStream::connect(address)?;
    let mut conn: Box<dyn NetStream> = match tls_config {
        Some(config) => tls::client_stream(config, host, sock)?,
        None => Box::new(sock),
    };
    conn.write_all(message)?;
    conn.flush()?;
    coroutine::sleep(DIAL_SETTLE);
    Ok(())
}
