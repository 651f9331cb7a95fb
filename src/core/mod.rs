//! # Core Protocol Components
//!
//! Low-level wire handling: binary cursors, token sealing and packet
//! framing.
//!
//! ## Components
//! - **Cursor**: bounds-checked little-endian reader and writer
//! - **Token**: private connect token and challenge token codecs
//! - **Packet**: the seven connection packet types and their AEAD envelope
//!
//! ## Security
//! - Maximum datagram size: 1300 bytes
//! - Every read is bounds-checked against the declared buffer
//! - Every encrypted body is authenticated before it is parsed

pub mod cursor;
pub mod packet;
pub mod token;
