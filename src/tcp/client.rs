use std::io::{self, Read};
use std::time::{Duration, Instant};

use may::coroutine;
use may::net::TcpStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use super::TcpClientConfig;
use crate::encoding;
use crate::error::Error;
use crate::stream::NetStream;
use crate::tls;

/// Idle window after which a socket read is considered drained.
const READ_IDLE: Duration = Duration::from_millis(500);

/// Pause between decode attempts in [`TcpClient::read_remote`].
const READ_RETRY: Duration = Duration::from_secs(2);

/// Client for TCP request/response servers.
///
/// Dials plain or TLS per the configuration, writes marshaled requests and
/// reads idle-delimited responses with the configured encoding.
#[derive(Default)]
pub struct TcpClient {
    config: Option<TcpClientConfig>,
    conn: Option<Box<dyn NetStream>>,
}

impl TcpClient {
    pub fn new() -> TcpClient {
        TcpClient::default()
    }

    /// Dials the configured endpoint, closing any previous connection.
    /// Applies the configured deadline to reads and writes.
    pub fn connect(&mut self, config: TcpClientConfig) -> Result<(), Error> {
        if self.is_open() {
            self.close()?;
        }
        if config.network.is_empty() || config.host.is_empty() || config.port == 0 {
            error!("invalid network, server and/or port values");
            return Err(Error::InvalidConfig(
                "invalid network, server and/or port values".to_string(),
            ));
        }
        let address = format!("{}:{}", config.host, config.port);
        let sock = TcpStream::connect(&address)?;
        if let Some(timeout) = config.timeout {
            sock.set_read_timeout(Some(timeout))?;
            sock.set_write_timeout(Some(timeout))?;
        }
        let conn: Box<dyn NetStream> = match &config.tls {
            Some(recipe) => tls::client_stream(recipe.build_client()?, &config.host, sock)?,
            None => Box::new(sock),
        };
        debug!(address = %address, "connected");
        self.config = Some(config);
        self.conn = Some(conn);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Drops the connection. Errs when there is nothing to close.
    pub fn close(&mut self) -> Result<(), Error> {
        match self.conn.take() {
            Some(conn) => {
                drop(conn);
                Ok(())
            }
            None => {
                error!("connection is already closed");
                Err(Error::NotConnected)
            }
        }
    }

    fn encoding(&self) -> encoding::Encoding {
        self.config
            .as_ref()
            .map(|c| c.encoding)
            .unwrap_or(encoding::Encoding::Json)
    }

    /// Writes `body` and sleeps `wait_before_read` so the server can take
    /// the turn.
    pub fn send(&mut self, body: &[u8], wait_before_read: Duration) -> Result<(), Error> {
        let conn = self.conn.as_mut().ok_or(Error::NotConnected)?;
        debug!("sending data to server");
        conn.write_all(body)?;
        conn.flush()?;
        coroutine::sleep(wait_before_read);
        Ok(())
    }

    /// Writes `body`, waits, then reads the response and decodes it with
    /// the configured encoding.
    pub fn request<T: DeserializeOwned>(
        &mut self,
        body: &[u8],
        wait_before_read: Duration,
    ) -> Result<T, Error> {
        self.send(body, wait_before_read)?;
        self.read_and_parse()
    }

    /// Marshals `request` with the configured encoding and sends it.
    pub fn encode<Req: Serialize>(
        &mut self,
        request: &Req,
        wait_before_read: Duration,
    ) -> Result<(), Error> {
        let data = encoding::marshal(self.encoding(), request)?;
        self.send(&data, wait_before_read)
    }

    /// Marshals `request`, sends it, and decodes the response.
    pub fn encode_request<Req, Resp>(
        &mut self,
        request: &Req,
        wait_before_read: Duration,
    ) -> Result<Resp, Error>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let data = encoding::marshal(self.encoding(), request)?;
        self.request(&data, wait_before_read)
    }

    /// Polls the connection until a response decodes, retrying every two
    /// seconds. A zero `timeout` polls forever; otherwise the deadline
    /// yields the last decode error.
    pub fn read_remote<T: DeserializeOwned>(&mut self, timeout: Duration) -> Result<T, Error> {
        if self.conn.is_none() {
            error!("client is not connected to a server socket");
            return Err(Error::NotConnected);
        }
        let start = Instant::now();
        let mut last_err = Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "no response before deadline",
        ));
        loop {
            match self.read_and_parse() {
                Ok(value) => return Ok(value),
                Err(err) => last_err = err,
            }
            if !timeout.is_zero() && start.elapsed() >= timeout {
                return Err(last_err);
            }
            coroutine::sleep(READ_RETRY);
        }
    }

    /// Reads until the connection goes idle, then decodes.
    fn read_and_parse<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        let conn = self.conn.as_mut().ok_or(Error::NotConnected)?;
        let data = read_until_idle(conn.as_mut())?;
        encoding::unmarshal(self.encoding(), &data)
    }
}

/// Drains whatever the peer has written, treating an idle window as the
/// response boundary.
fn read_until_idle(conn: &mut dyn NetStream) -> Result<Vec<u8>, Error> {
    conn.set_read_timeout(Some(READ_IDLE))?;
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match conn.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(err) => return Err(Error::Io(err)),
        }
    }
    Ok(out)
}
