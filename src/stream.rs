//! Connection plumbing: the [`NetStream`] abstraction over plain and TLS
//! sockets, the shared connection handle, and the [`StreamBuffer`] that
//! decouples the socket reader from handler-level decoders.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use may::coroutine;
use may::net::TcpStream;
use tracing::{debug, error};

/// Poll interval applied to enrolled connections so reads release the
/// connection lock between quanta.
const READ_POLL: Duration = Duration::from_millis(50);

/// Retry backoff after an empty or failed read quantum.
const READ_RETRY: Duration = Duration::from_micros(250);

/// Poll interval of [`StreamBuffer::wait`].
const WAIT_POLL: Duration = Duration::from_millis(250);

/// A duplex byte stream with socket-style timeout control.
///
/// Implemented by plain `may` TCP streams and by rustls-wrapped streams so
/// servers, clients and the pipe node handle both uniformly.
pub trait NetStream: Read + Write + Send {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl NetStream for TcpStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

impl NetStream for rustls::StreamOwned<rustls::ServerConnection, TcpStream> {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(dur)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.sock.peer_addr()
    }
}

impl NetStream for rustls::StreamOwned<rustls::ClientConnection, TcpStream> {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(dur)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.sock.peer_addr()
    }
}

/// Boxed connection, plain or TLS.
pub type Conn = Box<dyn NetStream>;

/// Shared handle over one connection.
///
/// The enrolled reader coroutine and any number of handler writers hold
/// clones. Reads are taken with a short timeout so the lock is released
/// between quanta and writers never starve.
#[derive(Clone)]
pub struct SharedConn {
    inner: Arc<Mutex<Conn>>,
}

impl SharedConn {
    pub fn new(conn: Conn) -> SharedConn {
        SharedConn {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Conn> {
        self.inner.lock().unwrap()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.lock().peer_addr().ok()
    }

    pub fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.lock().set_read_timeout(dur)
    }

    pub fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut conn = self.lock();
        conn.write_all(data)?;
        conn.flush()
    }
}

impl Write for SharedConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

struct BufferState {
    queue: Mutex<VecDeque<u8>>,
    open: AtomicBool,
    reading: AtomicBool,
}

/// Duplex buffer between a live connection and handler-level decoders.
///
/// [`enroll`](StreamBuffer::enroll) spawns a detached reader that appends
/// socket bytes to the internal queue; handlers drain it through `Read`.
/// After each non-empty read quantum the reader sleeps the turn-reset window
/// and then clears the queue, so one logical request's bytes never leak into
/// the next turn. [`end_turn`](StreamBuffer::end_turn) clears the queue
/// explicitly for callers that manage the boundary themselves.
#[derive(Clone)]
pub struct StreamBuffer {
    state: Arc<BufferState>,
    turn_reset: Duration,
}

impl StreamBuffer {
    pub fn new(turn_reset: Duration) -> StreamBuffer {
        StreamBuffer {
            state: Arc::new(BufferState {
                queue: Mutex::new(VecDeque::new()),
                open: AtomicBool::new(false),
                reading: AtomicBool::new(false),
            }),
            turn_reset,
        }
    }

    /// The buffer accepts reads and its reader loop is live.
    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    /// First bytes have arrived from the enrolled connection.
    pub fn is_reading(&self) -> bool {
        self.state.reading.load(Ordering::SeqCst)
    }

    /// Blocks until data has started arriving, or the buffer is closed.
    pub fn wait(&self) {
        while self.is_open() && !self.is_reading() {
            coroutine::sleep(WAIT_POLL);
        }
    }

    /// Discards any buffered bytes, ending the current turn.
    pub fn end_turn(&self) {
        self.state.queue.lock().unwrap().clear();
    }

    /// Stops the reader loop and resets the queue.
    pub fn close(&self) {
        self.state.open.store(false, Ordering::SeqCst);
        self.state.reading.store(false, Ordering::SeqCst);
        self.end_turn();
    }

    /// Starts a detached reader pumping bytes from `conn` into the queue.
    pub fn enroll(&self, conn: SharedConn) {
        if let Err(err) = conn.set_read_timeout(Some(READ_POLL)) {
            error!(error = %err, "failed to arm read timeout on enrolled connection");
        }
        self.state.open.store(true, Ordering::SeqCst);
        self.state.reading.store(false, Ordering::SeqCst);
        let buffer = self.clone();
        may::go!(move || buffer.read_from(conn));
    }

    fn read_from(&self, conn: SharedConn) {
        let mut scratch = [0u8; 4096];
        debug!("stream reader started");
        while self.is_open() {
            let mut turn_bytes = 0usize;
            let mut failed = false;
            loop {
                if !self.is_open() {
                    break;
                }
                let read = { conn.lock().read(&mut scratch) };
                match read {
                    Ok(0) => {
                        failed = true;
                        break;
                    }
                    Ok(n) => {
                        let mut queue = self.state.queue.lock().unwrap();
                        queue.extend(&scratch[..n]);
                        turn_bytes += n;
                        self.state.reading.store(true, Ordering::SeqCst);
                    }
                    Err(err)
                        if err.kind() == io::ErrorKind::WouldBlock
                            || err.kind() == io::ErrorKind::TimedOut =>
                    {
                        break;
                    }
                    Err(_) => {
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                coroutine::sleep(READ_RETRY);
                continue;
            }
            if turn_bytes > 0 {
                coroutine::sleep(self.turn_reset);
                self.end_turn();
            } else {
                coroutine::sleep(READ_RETRY);
            }
        }
        debug!("stream reader stopped");
    }
}

impl Default for StreamBuffer {
    fn default() -> StreamBuffer {
        StreamBuffer::new(Duration::from_millis(500))
    }
}

impl Read for StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.state.queue.lock().unwrap();
        let n = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for StreamBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut queue = self.state.queue.lock().unwrap();
        queue.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
