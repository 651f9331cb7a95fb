//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: ChaCha20-Poly1305 AEAD helpers and the zeroizing [`Key`](crypto::Key)
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Per-server observability counters
//! - **Time**: Unix timestamp sampling for the tick driver
//!
//! ## Security
//! - Keys come from the OS entropy source (getrandom)
//! - Key material is zeroed on drop (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;

pub use crypto::Key;
pub use metrics::{Metrics, MetricsSnapshot};
