//! # Error Types
//!
//! Error handling for the connection protocol server.
//!
//! ## Error Categories
//! - **Malformed input**: truncated buffers, bad type tags, AEAD failures
//! - **Policy rejection**: replayed sequences, expired or reused tokens
//! - **Lifecycle errors**: key generation, transport bind, misuse of a stopped server
//! - **Configuration errors**: invalid or unreadable configuration
//!
//! Errors raised while reading an inbound datagram never leave
//! [`Server::process_packet`](crate::protocol::server::Server::process_packet);
//! they are logged and the datagram is dropped. Only lifecycle and
//! application-facing calls hand a [`ProtocolError`] back to the caller.
//!
//! ## Example Usage
//! ```rust
//! use netcode_server::core::cursor::Reader;
//! use netcode_server::error::{ProtocolError, Result};
//!
//! fn first_word(buf: &[u8]) -> Result<u32> {
//!     Reader::new(buf).read_u32()
//! }
//!
//! assert!(matches!(first_word(&[1, 2]), Err(ProtocolError::Truncated { .. })));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Token validation errors
    pub const ERR_TOKEN_SERVER_COUNT: &str = "server address count out of range";
    pub const ERR_TOKEN_ADDRESS_TYPE: &str = "unknown server address type";

    /// Lifecycle errors
    pub const ERR_TRANSPORT_CLOSED: &str = "Transport is closed";
    pub const ERR_TRANSPORT_NOT_BOUND: &str = "Transport is not bound";
    pub const ERR_ALREADY_RUNNING: &str = "Server is already running";

    /// Time errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
}

/// ProtocolError is the primary error type for all server operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Packet truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Output buffer too small: needed {needed} bytes, {remaining} remaining")]
    BufferOverflow { needed: usize, remaining: usize },

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Invalid packet structure")]
    InvalidPacket,

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Packet type {0} is not allowed")]
    DisallowedPacket(u8),

    #[error("Unsupported protocol version")]
    UnsupportedVersion,

    #[error("Protocol id mismatch: expected {expected:#x}, got {actual:#x}")]
    ProtocolMismatch { expected: u64, actual: u64 },

    #[error("Connect token expired at {0}")]
    TokenExpired(u64),

    #[error("Invalid connect token: {0}")]
    InvalidToken(&'static str),

    #[error("No packet key for sender")]
    MissingKey,

    #[error("Sequence {0} already received")]
    ReplayDetected(u64),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Server has not been initialized")]
    NotInitialized,

    #[error("Server is not running")]
    NotRunning,

    #[error("Client slot {0} is not connected")]
    ClientNotConnected(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
