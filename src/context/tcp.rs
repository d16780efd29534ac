use std::io::Read;
use std::net::SocketAddr;
use std::time::Duration;

use may::coroutine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::cache::{Cache, SharedCache};
use crate::encoding::{self, Encoding};
use crate::error::Error;
use crate::stream::{SharedConn, StreamBuffer};

/// Poll interval while draining a request turn.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Consecutive empty drains after which a non-empty turn counts as complete.
const QUIET_ROUNDS: u32 = 3;

/// Call context for one TCP action invocation.
///
/// The reader is the connection's stream buffer; the writer is the shared
/// connection handle. Both encodings come from the server configuration,
/// not from content negotiation.
pub struct TcpContext {
    /// Fresh UUIDv4, generated at construction.
    pub id: Uuid,
    pub writer: SharedConn,
    pub reader: StreamBuffer,
    pub remote_addr: Option<SocketAddr>,
    pub request_encoding: Encoding,
    pub response_encoding: Encoding,
    /// Cache dropped at the end of this request.
    pub request_cache: Cache,
    /// Cache shared by every request of the owning handler.
    pub handler_cache: SharedCache,
    /// Cache shared across the whole server.
    pub server_cache: SharedCache,
}

impl TcpContext {
    pub(crate) fn new(
        writer: SharedConn,
        reader: StreamBuffer,
        server_encoding: Encoding,
        handler_cache: SharedCache,
        server_cache: SharedCache,
    ) -> TcpContext {
        let remote_addr = writer.peer_addr();
        TcpContext {
            id: Uuid::new_v4(),
            writer,
            reader,
            remote_addr,
            request_encoding: server_encoding,
            response_encoding: server_encoding,
            request_cache: Cache::new(),
            handler_cache,
            server_cache,
        }
    }

    /// Drains one request turn from the stream buffer.
    ///
    /// Waits for the first bytes, then reads until the buffer stays quiet
    /// for a few polls. The wire carries no framing; quiescence is the
    /// request delimiter.
    pub fn read_turn(&mut self) -> Result<Vec<u8>, Error> {
        self.reader.wait();
        let mut data = Vec::new();
        let mut quiet = 0u32;
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.reader.read(&mut chunk)?;
            if n > 0 {
                data.extend_from_slice(&chunk[..n]);
                quiet = 0;
                continue;
            }
            if !self.reader.is_open() {
                break;
            }
            if !data.is_empty() {
                quiet += 1;
                if quiet >= QUIET_ROUNDS {
                    break;
                }
            }
            coroutine::sleep(DRAIN_POLL);
        }
        Ok(data)
    }

    /// Reads the full request and decodes it with the server encoding.
    pub fn parse_request<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        let data = self.read_turn()?;
        encoding::unmarshal(self.request_encoding, &data)
    }

    /// Encodes `value` with the server encoding and writes it back on the
    /// connection.
    pub fn write_response<T: Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let data = encoding::marshal(self.response_encoding, value)?;
        self.writer.write_all(&data)?;
        Ok(())
    }
}
