//! Lifecycle state machine and request accounting shared by every server.
//!
//! All three servers (API, TCP, pipe node) embed a [`Lifecycle`]: a running
//! flag, active-work counters, and a pair of signal channels driving the
//! shutdown sequence. `stop()` posts `Shutdown`; a periodic exit check posts
//! `Exit` once the server is idle; `wait()` drains until it sees `Exit` and
//! then sleeps a settling delay before returning. Deregistering the last
//! active unit while stopped posts `Exit` directly, so the ticker is only a
//! backstop.

use std::env;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use may::coroutine;
use may::sync::mpsc::{channel, Receiver, Sender};
use std::sync::mpsc::TryRecvError;
use tracing::{debug, warn};

/// Shutdown sequencing signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Purge,
    Exit,
}

/// Timing knobs for the lifecycle machinery.
///
/// These were process-wide globals in earlier incarnations of this design;
/// they are per-config here, with the historical values as defaults.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Interval of the "can we exit yet?" check.
    pub exit_check_interval: Duration,
    /// Upper bound of one `wait()` polling round.
    pub wait_timeout: Duration,
    /// Settling sleep after `wait()` observes the exit signal.
    pub settle_delay: Duration,
    /// Poll interval for client loops and `until_started()`.
    pub client_reset: Duration,
    /// Quiescence window after which a stream buffer resets its turn.
    pub turn_reset: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            exit_check_interval: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(120),
            settle_delay: Duration::from_secs(10),
            client_reset: Duration::from_millis(500),
            turn_reset: Duration::from_millis(500),
        }
    }
}

struct SignalChannels {
    internal_tx: Option<Sender<Signal>>,
    internal_rx: Option<Receiver<Signal>>,
    commands_tx: Option<Sender<Signal>>,
    commands_rx: Option<Receiver<Signal>>,
}

impl SignalChannels {
    fn closed() -> Self {
        SignalChannels {
            internal_tx: None,
            internal_rx: None,
            commands_tx: None,
            commands_rx: None,
        }
    }
}

/// Shared lifecycle state: running flag, counters, signal channels.
pub struct Lifecycle {
    running: AtomicBool,
    exited: AtomicBool,
    active_requests: AtomicI64,
    active_clients: AtomicI64,
    // The pipe node also counts outbound clients as work.
    clients_counted: bool,
    channels: Mutex<SignalChannels>,
    timeouts: Mutex<Timeouts>,
}

impl Lifecycle {
    pub fn new() -> Arc<Lifecycle> {
        Arc::new(Lifecycle {
            running: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            active_requests: AtomicI64::new(0),
            active_clients: AtomicI64::new(0),
            clients_counted: false,
            channels: Mutex::new(SignalChannels::closed()),
            timeouts: Mutex::new(Timeouts::default()),
        })
    }

    /// Lifecycle that also treats outbound clients as active work.
    pub fn with_clients() -> Arc<Lifecycle> {
        Arc::new(Lifecycle {
            running: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            active_requests: AtomicI64::new(0),
            active_clients: AtomicI64::new(0),
            clients_counted: true,
            channels: Mutex::new(SignalChannels::closed()),
            timeouts: Mutex::new(Timeouts::default()),
        })
    }

    pub fn set_timeouts(&self, timeouts: Timeouts) {
        *self.timeouts.lock().unwrap() = timeouts;
    }

    pub fn timeouts(&self) -> Timeouts {
        *self.timeouts.lock().unwrap()
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Active work remains. Servers count requests; the pipe node counts
    /// requests or outbound clients.
    pub fn working(&self) -> bool {
        let requests = self.active_requests.load(Ordering::SeqCst) > 0;
        if self.clients_counted {
            requests || self.active_clients.load(Ordering::SeqCst) > 0
        } else {
            requests
        }
    }

    /// Opens fresh signal channels ahead of a start.
    pub fn open_channels(&self) {
        let (internal_tx, internal_rx) = channel();
        let (commands_tx, commands_rx) = channel();
        *self.channels.lock().unwrap() = SignalChannels {
            internal_tx: Some(internal_tx),
            internal_rx: Some(internal_rx),
            commands_tx: Some(commands_tx),
            commands_rx: Some(commands_rx),
        };
        self.exited.store(false, Ordering::SeqCst);
    }

    pub fn register_request(&self) {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
    }

    pub fn deregister_request(&self) {
        let left = self.active_requests.fetch_sub(1, Ordering::SeqCst) - 1;
        if left <= 0 && !self.running() && !self.working() {
            self.post_exit();
        }
    }

    pub fn register_client(&self) {
        self.active_clients.fetch_add(1, Ordering::SeqCst);
    }

    pub fn deregister_client(&self) {
        let left = self.active_clients.fetch_sub(1, Ordering::SeqCst) - 1;
        if left <= 0 && !self.running() && !self.working() {
            self.post_exit();
        }
    }

    /// Forces the counters to zero. Used by the brute-force close fallback
    /// when a listener refuses to shut down gracefully.
    pub fn zero_counters(&self) {
        self.active_requests.store(0, Ordering::SeqCst);
        self.active_clients.store(0, Ordering::SeqCst);
    }

    pub fn post_shutdown(&self) {
        let channels = self.channels.lock().unwrap();
        if let Some(tx) = &channels.internal_tx {
            let _ = tx.send(Signal::Shutdown);
        }
    }

    /// Posts `Exit` exactly once per lifecycle round.
    pub fn post_exit(&self) -> bool {
        if self.exited.swap(true, Ordering::SeqCst) {
            return false;
        }
        let channels = self.channels.lock().unwrap();
        if let Some(tx) = &channels.internal_tx {
            let _ = tx.send(Signal::Exit);
        }
        true
    }

    /// Idle check: posts `Exit` when the server is stopped and drained.
    pub fn check_exit(&self) -> bool {
        if !self.running() && !self.working() {
            self.post_exit();
            return true;
        }
        false
    }

    /// Drops the signal channels once the exit signal went out.
    pub fn evacuate(&self) {
        *self.channels.lock().unwrap() = SignalChannels::closed();
    }

    /// Spawns the periodic exit check. `on_exit` runs once, right after the
    /// exit signal was posted, and is where the owner tears down channels.
    pub fn spawn_exit_check(self: &Arc<Self>, on_exit: impl FnOnce() + Send + 'static) {
        let lifecycle = Arc::clone(self);
        let interval = lifecycle.timeouts().exit_check_interval;
        may::go!(move || {
            loop {
                coroutine::sleep(interval);
                if lifecycle.check_exit() {
                    on_exit();
                    lifecycle.evacuate();
                    return;
                }
            }
        });
    }

    /// Blocks until the server has shut down and drained, then sleeps the
    /// settling delay. Forwards `Purge` on the command channel when the
    /// shutdown signal comes through. Always returns eventually: each round
    /// is bounded by `wait_timeout`, and a dropped channel counts as exit.
    pub fn wait(&self) {
        debug!("waiting for server shutdown");
        let timeouts = self.timeouts();
        let rx = self.channels.lock().unwrap().internal_rx.take();
        match rx {
            Some(rx) => {
                'wait: while self.running() || self.working() {
                    let deadline = Instant::now() + timeouts.wait_timeout;
                    loop {
                        match rx.try_recv() {
                            Ok(Signal::Shutdown) => {
                                let channels = self.channels.lock().unwrap();
                                if let Some(tx) = &channels.commands_tx {
                                    let _ = tx.send(Signal::Purge);
                                }
                            }
                            Ok(Signal::Exit) | Err(TryRecvError::Disconnected) => break 'wait,
                            Ok(Signal::Purge) => {}
                            Err(TryRecvError::Empty) => {
                                if Instant::now() >= deadline {
                                    continue 'wait;
                                }
                                coroutine::sleep(Duration::from_millis(100));
                            }
                        }
                    }
                }
            }
            None => {
                while self.running() || self.working() {
                    coroutine::sleep(timeouts.client_reset);
                }
            }
        }
        warn!("server shutdown in progress, exiting");
        coroutine::sleep(timeouts.settle_delay);
    }

    /// Receiver for the outward command channel (`Purge` notifications).
    pub fn take_command_receiver(&self) -> Option<Receiver<Signal>> {
        self.channels.lock().unwrap().commands_rx.take()
    }
}

/// Formats a bind address; an empty host binds every interface.
pub(crate) fn bind_address(host: &str, port: u16) -> String {
    if host.is_empty() {
        format!("0.0.0.0:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Address to dial when waking a listener blocked in accept. Unspecified
/// bind addresses are reachable via loopback only.
pub(crate) fn wake_address(addr: std::net::SocketAddr) -> std::net::SocketAddr {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    if addr.ip().is_unspecified() {
        let loopback = match addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        std::net::SocketAddr::new(loopback, addr.port())
    } else {
        addr
    }
}

/// Coroutine stack size from `NETFABRIC_STACK_SIZE` (decimal or `0x`-hex),
/// defaulting to 64 KiB.
pub fn stack_size_from_env() -> usize {
    match env::var("NETFABRIC_STACK_SIZE") {
        Ok(val) => {
            if let Some(hex) = val.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).unwrap_or(0x10000)
            } else {
                val.parse().unwrap_or(0x10000)
            }
        }
        Err(_) => 0x10000,
    }
}

/// Applies the environment stack size to the global coroutine config.
pub fn configure_from_env() {
    may::config().set_stack_size(stack_size_from_env());
}
