use std::fmt;
use std::io;

/// Library-wide error type.
///
/// Lifecycle preconditions (`AlreadyRunning`, `AlreadyStopped`), registration
/// conflicts (`Duplicate`) and encoding failures (`UnknownEncoding`, `Codec`)
/// are distinct variants so callers can branch on them; transport failures
/// are surfaced verbatim as `Io`.
#[derive(Debug)]
pub enum Error {
    /// A mandatory configuration field is missing or invalid.
    InvalidConfig(String),
    /// The operation requires a stopped server but it is running.
    AlreadyRunning,
    /// The operation requires a running server but it is stopped.
    AlreadyStopped,
    /// A handler with the same path (HTTP) or name (TCP) is already registered.
    Duplicate(String),
    /// A client operation was attempted before a successful connect.
    NotConnected,
    /// The MIME type does not map to any codec.
    UnknownEncoding(String),
    /// An underlying marshal/unmarshal failure.
    Codec(String),
    /// A socket or file error.
    Io(io::Error),
    /// Body parsing was requested for a method that carries no body.
    InvalidMethod(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::AlreadyRunning => write!(f, "server is already running"),
            Error::AlreadyStopped => write!(f, "server is already stopped"),
            Error::Duplicate(name) => write!(f, "duplicate handler registration: {name}"),
            Error::NotConnected => write!(f, "client is not connected to a server socket"),
            Error::UnknownEncoding(mime) => {
                write!(f, "unable to discover an encoder for mime type: {mime}")
            }
            Error::Codec(msg) => write!(f, "codec error: {msg}"),
            Error::Io(err) => write!(f, "i/o error: {err}"),
            Error::InvalidMethod(method) => {
                write!(f, "invalid web method {method} for requesting body parsing")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
