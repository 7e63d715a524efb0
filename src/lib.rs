//! # chatsock: real-time chat transport over raw WebSocket framing
//!
//! A standalone chat server that accepts raw TCP connections, performs the
//! WebSocket upgrade handshake, and decodes/encodes RFC 6455 frames by hand
//! (no WebSocket library). Authenticated connections exchange a small JSON
//! protocol (`auth` / `message` / `typing` / `ping`) and chat events fan out
//! to every live, authenticated peer.
//!
//! ## Layers
//!
//! - [`frame`]: byte-exact frame codec (variable-length size fields,
//!   client-side masking, opcode dispatch)
//! - [`handshake`]: HTTP upgrade parsing and the 101 response
//! - [`connection`]: per-socket state machine over a retained inbound buffer
//! - [`registry`]: live-connection table and broadcaster
//! - [`router`]: application message dispatch
//! - [`auth`] / [`store`]: adapter contracts for token validation and
//!   message persistence
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatsock::{Config, server::ChatServer};
//! use chatsock::auth::StaticTokens;
//! use chatsock::store::MemoryStore;
//!
//! let config = Config::builder().port(8080).build();
//! let server = ChatServer::new(
//!     config,
//!     Arc::new(StaticTokens::new()),
//!     Arc::new(MemoryStore::new()),
//! );
//! server.run().await?;
//! ```

pub mod auth;
pub mod client;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod store;

pub use error::{Error, Result};
pub use frame::{Frame, OpCode};
pub use registry::{ConnectionId, Registry};

/// Largest payload that fits the 7-bit base length field
pub const SMALL_PAYLOAD_MAX: usize = 125;

/// Largest payload that fits the 16-bit extended length field
pub const MEDIUM_PAYLOAD_MAX: usize = 65535;

/// WebSocket GUID for handshake accept-key derivation (RFC 6455 §1.3)
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Configuration for the chat server
///
/// # Example
///
/// ```
/// use chatsock::Config;
///
/// let config = Config::builder()
///     .port(9000)
///     .max_frame_size(1024 * 1024)
///     .idle_timeout(60)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port to listen on (default: 8080, all interfaces)
    pub port: u16,
    /// Maximum accepted frame payload size (default: 16MB)
    pub max_frame_size: usize,
    /// Idle timeout in seconds (default: 0 = disabled)
    ///
    /// When set, a connection that receives no data within this window is
    /// closed and deregistered exactly like a peer-initiated close.
    pub idle_timeout: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            max_frame_size: 16 * 1024 * 1024,
            idle_timeout: 0,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for server configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the listening port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the maximum frame payload size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the idle timeout in seconds (0 to disable)
    pub fn idle_timeout(mut self, seconds: u32) -> Self {
        self.config.idle_timeout = seconds;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
