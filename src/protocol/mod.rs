//! # Protocol Layer
//!
//! The handshake engine and the per-client replay window.
//!
//! ## Components
//! - **Server**: lifecycle, datagram entry point, tick driver, payload API
//! - **Handshake**: request/response admission and client promotion
//! - **Replay guard**: sliding sequence window for connected clients
//!
//! ## Security
//! - Connect tokens are single use
//! - Challenge nonces never repeat within a process
//! - Replayed or stale post-handshake packets are dropped before decryption

pub mod handshake;
pub mod replay_guard;
pub mod server;

#[cfg(test)]
mod tests;
