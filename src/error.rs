//! Error types for the chat transport

use std::fmt;
use std::io;

/// Result type alias for chat transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Chat transport error types
///
/// Recoverable conditions (bad token, unauthenticated sender, storage
/// failure) are reported to the peer as `auth_error` / `error` events and
/// never surface here; everything in this enum ends the connection.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying socket
    Io(io::Error),
    /// Invalid WebSocket frame
    InvalidFrame(&'static str),
    /// Frame larger than the configured maximum
    FrameTooLarge,
    /// Invalid HTTP request during the upgrade
    InvalidHttp(&'static str),
    /// Upgrade handshake rejected
    HandshakeFailed(&'static str),
    /// Connection closed by the peer
    ConnectionClosed,
    /// Connection reset by peer
    ConnectionReset,
    /// Persistence adapter failure
    Storage(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            Error::FrameTooLarge => write!(f, "Frame too large"),
            Error::InvalidHttp(msg) => write!(f, "Invalid HTTP: {}", msg),
            Error::HandshakeFailed(msg) => write!(f, "Handshake failed: {}", msg),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::ConnectionReset => write!(f, "Connection reset by peer"),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl Error {
    /// True when the error only means the peer went away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::ConnectionClosed | Error::ConnectionReset)
    }
}
