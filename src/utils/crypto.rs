//! # AEAD Primitives
//!
//! ChaCha20-Poly1305 (IETF) helpers shared by the token and packet codecs.
//!
//! Every envelope in the protocol uses a 64-bit counter as its nonce, so
//! the 96-bit IETF nonce is built as `[0u8; 4] || counter_le`. Encryption
//! happens in place and the 16-byte tag is carried separately so callers
//! can lay it out wherever the wire format puts it.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key as AeadKey, Nonce, Tag};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ProtocolError, Result};

/// Number of bytes in a symmetric key.
pub const KEY_BYTES: usize = 32;

/// Number of bytes in an authentication tag.
pub const MAC_BYTES: usize = 16;

/// Number of bytes in an IETF ChaCha20-Poly1305 nonce.
pub const NONCE_BYTES: usize = 12;

/// A 256-bit symmetric key, wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; KEY_BYTES]);

impl Key {
    pub const fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh key from the operating system RNG.
    ///
    /// # Errors
    /// Returns `ProtocolError::KeyGeneration` if the system entropy source fails.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_BYTES];
        getrandom::fill(&mut bytes).map_err(|e| ProtocolError::KeyGeneration(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }

    /// True if every byte is zero (an unset key).
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

impl From<[u8; KEY_BYTES]> for Key {
    fn from(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }
}

/// Construct an AEAD nonce from a 64-bit counter.
///
/// ```
/// use netcode_server::utils::crypto::construct_nonce;
///
/// let nonce = construct_nonce(0x4746454443424140);
/// assert_eq!(&nonce[0..4], &[0, 0, 0, 0]);
/// assert_eq!(&nonce[4..12], &[0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47]);
/// ```
pub fn construct_nonce(counter: u64) -> [u8; NONCE_BYTES] {
    let mut nonce = [0u8; NONCE_BYTES];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encrypt `buffer` in place and return the detached tag.
pub fn seal_in_place(
    buffer: &mut [u8],
    aad: &[u8],
    counter: u64,
    key: &Key,
) -> Result<[u8; MAC_BYTES]> {
    let cipher = ChaCha20Poly1305::new(AeadKey::from_slice(key.as_bytes()));
    let nonce = construct_nonce(counter);
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buffer)
        .map_err(|_| ProtocolError::EncryptionFailure)?;

    let mut out = [0u8; MAC_BYTES];
    out.copy_from_slice(tag.as_slice());
    Ok(out)
}

/// Verify `tag` and decrypt `buffer` in place.
///
/// The tag is checked before any plaintext is produced; on failure the
/// buffer still holds the original ciphertext.
pub fn open_in_place(
    buffer: &mut [u8],
    aad: &[u8],
    tag: &[u8; MAC_BYTES],
    counter: u64,
    key: &Key,
) -> Result<()> {
    let cipher = ChaCha20Poly1305::new(AeadKey::from_slice(key.as_bytes()));
    let nonce = construct_nonce(counter);
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buffer, Tag::from_slice(tag))
        .map_err(|_| ProtocolError::DecryptionFailure)
}
