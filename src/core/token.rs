//! # Token Codec
//!
//! Serialization and authenticated encryption for the two tokens the
//! server handles:
//!
//! - the **private section of a connect token**, minted by the backend and
//!   sealed under the server private key with the token sequence as nonce;
//! - the **challenge token**, minted by the server per handshake attempt and
//!   sealed under the server's challenge key with the challenge sequence as
//!   nonce.
//!
//! Both tokens are fixed-size blocks whose last [`MAC_BYTES`] hold the
//! authentication tag. `write`/`read` work on plaintext blocks; the
//! `encrypt_*`/`decrypt_*` functions seal and open them in place.
//!
//! ## Private token layout (1024 bytes)
//! ```text
//! [client id u64] [server address count u32]
//! [server addresses: type u8, ip, port u16]...
//! [client->server key 32] [server->client key 32] [user data 256]
//! [zero padding] [tag 16]
//! ```
//!
//! ## Challenge token layout (300 bytes)
//! ```text
//! [client id u64] [user data 256] [zero padding] [tag 16]
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::config::VERSION_INFO;
use crate::core::cursor::{Reader, Writer};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{open_in_place, seal_in_place, Key, KEY_BYTES, MAC_BYTES};

/// Size of the encrypted private section of a connect token.
pub const CONNECT_TOKEN_PRIVATE_BYTES: usize = 1024;

/// Size of an encrypted challenge token.
pub const CHALLENGE_TOKEN_BYTES: usize = 300;

/// Size of the opaque user data blob carried by both tokens.
pub const USER_DATA_BYTES: usize = 256;

/// Maximum number of server addresses in a token whitelist.
pub const MAX_SERVERS_PER_CONNECT: usize = 32;

const ADDRESS_IPV4: u8 = 1;
const ADDRESS_IPV6: u8 = 2;

const PRIVATE_AD_BYTES: usize = VERSION_INFO.len() + 8 + 8;

/// Single-use identifier of a connect token: the tag of its private section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenFingerprint(pub [u8; MAC_BYTES]);

impl TokenFingerprint {
    /// Fingerprint of a private section as received on the wire.
    pub fn of(encrypted: &[u8; CONNECT_TOKEN_PRIVATE_BYTES]) -> Self {
        let mut tag = [0u8; MAC_BYTES];
        tag.copy_from_slice(&encrypted[CONNECT_TOKEN_PRIVATE_BYTES - MAC_BYTES..]);
        Self(tag)
    }
}

/// Decrypted private section of a connect token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateConnectToken {
    pub client_id: u64,
    /// Servers this token may be presented to.
    pub server_addresses: Vec<SocketAddr>,
    /// Key the client encrypts with; the server decrypts with it.
    pub client_to_server_key: Key,
    /// Key the server encrypts with.
    pub server_to_client_key: Key,
    pub user_data: [u8; USER_DATA_BYTES],
}

impl PrivateConnectToken {
    /// Serialize into a plaintext block. The tag region is left zeroed.
    pub fn write(&self, out: &mut [u8; CONNECT_TOKEN_PRIVATE_BYTES]) -> Result<()> {
        let count = self.server_addresses.len();
        if count == 0 || count > MAX_SERVERS_PER_CONNECT {
            return Err(ProtocolError::InvalidToken(constants::ERR_TOKEN_SERVER_COUNT));
        }

        let mut w = Writer::new(&mut out[..CONNECT_TOKEN_PRIVATE_BYTES - MAC_BYTES]);
        w.write_u64(self.client_id)?;
        w.write_u32(count as u32)?;
        for addr in &self.server_addresses {
            write_address(&mut w, addr)?;
        }
        w.write_bytes(self.client_to_server_key.as_bytes())?;
        w.write_bytes(self.server_to_client_key.as_bytes())?;
        w.write_bytes(&self.user_data)?;
        let padding = w.remaining();
        w.write_zeros(padding)?;

        out[CONNECT_TOKEN_PRIVATE_BYTES - MAC_BYTES..].fill(0);
        Ok(())
    }

    /// Parse a decrypted block.
    pub fn read(buf: &[u8; CONNECT_TOKEN_PRIVATE_BYTES]) -> Result<Self> {
        let mut r = Reader::new(&buf[..CONNECT_TOKEN_PRIVATE_BYTES - MAC_BYTES]);
        let client_id = r.read_u64()?;

        let count = r.read_u32()? as usize;
        if count == 0 || count > MAX_SERVERS_PER_CONNECT {
            return Err(ProtocolError::InvalidToken(constants::ERR_TOKEN_SERVER_COUNT));
        }
        let mut server_addresses = Vec::with_capacity(count);
        for _ in 0..count {
            server_addresses.push(read_address(&mut r)?);
        }

        let client_to_server_key = Key::from_bytes(r.read_array::<KEY_BYTES>()?);
        let server_to_client_key = Key::from_bytes(r.read_array::<KEY_BYTES>()?);
        let user_data = r.read_array::<USER_DATA_BYTES>()?;

        Ok(Self {
            client_id,
            server_addresses,
            client_to_server_key,
            server_to_client_key,
            user_data,
        })
    }

    /// True if `addr` is on this token's server whitelist.
    pub fn authorizes(&self, addr: &SocketAddr) -> bool {
        self.server_addresses.iter().any(|a| a == addr)
    }
}

fn write_address(w: &mut Writer<'_>, addr: &SocketAddr) -> Result<()> {
    match addr.ip() {
        IpAddr::V4(ip) => {
            w.write_u8(ADDRESS_IPV4)?;
            w.write_bytes(&ip.octets())?;
        }
        IpAddr::V6(ip) => {
            w.write_u8(ADDRESS_IPV6)?;
            for segment in ip.segments() {
                w.write_u16(segment)?;
            }
        }
    }
    w.write_u16(addr.port())
}

fn read_address(r: &mut Reader<'_>) -> Result<SocketAddr> {
    let ip = match r.read_u8()? {
        ADDRESS_IPV4 => IpAddr::V4(Ipv4Addr::from(r.read_array::<4>()?)),
        ADDRESS_IPV6 => {
            let mut segments = [0u16; 8];
            for segment in segments.iter_mut() {
                *segment = r.read_u16()?;
            }
            IpAddr::V6(Ipv6Addr::from(segments))
        }
        _ => return Err(ProtocolError::InvalidToken(constants::ERR_TOKEN_ADDRESS_TYPE)),
    };
    Ok(SocketAddr::new(ip, r.read_u16()?))
}

fn private_associated_data(protocol_id: u64, expire_timestamp: u64) -> [u8; PRIVATE_AD_BYTES] {
    let mut ad = [0u8; PRIVATE_AD_BYTES];
    ad[..VERSION_INFO.len()].copy_from_slice(VERSION_INFO);
    ad[VERSION_INFO.len()..VERSION_INFO.len() + 8].copy_from_slice(&protocol_id.to_le_bytes());
    ad[VERSION_INFO.len() + 8..].copy_from_slice(&expire_timestamp.to_le_bytes());
    ad
}

fn split_tag<const N: usize>(buf: &mut [u8; N]) -> (&mut [u8], [u8; MAC_BYTES]) {
    let (body, tag) = buf.split_at_mut(N - MAC_BYTES);
    let mut out = [0u8; MAC_BYTES];
    out.copy_from_slice(tag);
    (body, out)
}

/// Seal a plaintext private token block in place.
///
/// The protocol id and expire timestamp are bound as associated data, the
/// token sequence is the nonce.
pub fn encrypt_private_token(
    buf: &mut [u8; CONNECT_TOKEN_PRIVATE_BYTES],
    protocol_id: u64,
    expire_timestamp: u64,
    sequence: u64,
    key: &Key,
) -> Result<()> {
    let ad = private_associated_data(protocol_id, expire_timestamp);
    let tag = seal_in_place(
        &mut buf[..CONNECT_TOKEN_PRIVATE_BYTES - MAC_BYTES],
        &ad,
        sequence,
        key,
    )?;
    buf[CONNECT_TOKEN_PRIVATE_BYTES - MAC_BYTES..].copy_from_slice(&tag);
    Ok(())
}

/// Open a sealed private token block in place.
///
/// # Errors
/// `ProtocolError::DecryptionFailure` if the tag does not verify under the
/// given key, sequence, protocol id and expire timestamp.
pub fn decrypt_private_token(
    buf: &mut [u8; CONNECT_TOKEN_PRIVATE_BYTES],
    protocol_id: u64,
    expire_timestamp: u64,
    sequence: u64,
    key: &Key,
) -> Result<()> {
    let ad = private_associated_data(protocol_id, expire_timestamp);
    let (body, tag) = split_tag(buf);
    open_in_place(body, &ad, &tag, sequence, key)
}

/// Server-minted proof that a client received a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeToken {
    pub client_id: u64,
    pub user_data: [u8; USER_DATA_BYTES],
}

impl ChallengeToken {
    pub fn new(client_id: u64, user_data: [u8; USER_DATA_BYTES]) -> Self {
        Self { client_id, user_data }
    }

    pub fn write(&self, out: &mut [u8; CHALLENGE_TOKEN_BYTES]) -> Result<()> {
        let mut w = Writer::new(&mut out[..CHALLENGE_TOKEN_BYTES - MAC_BYTES]);
        w.write_u64(self.client_id)?;
        w.write_bytes(&self.user_data)?;
        let padding = w.remaining();
        w.write_zeros(padding)?;
        out[CHALLENGE_TOKEN_BYTES - MAC_BYTES..].fill(0);
        Ok(())
    }

    pub fn read(buf: &[u8; CHALLENGE_TOKEN_BYTES]) -> Result<Self> {
        let mut r = Reader::new(&buf[..CHALLENGE_TOKEN_BYTES - MAC_BYTES]);
        Ok(Self {
            client_id: r.read_u64()?,
            user_data: r.read_array::<USER_DATA_BYTES>()?,
        })
    }
}

/// Seal a plaintext challenge token block in place under `sequence`.
pub fn encrypt_challenge_token(
    buf: &mut [u8; CHALLENGE_TOKEN_BYTES],
    sequence: u64,
    key: &Key,
) -> Result<()> {
    let tag = seal_in_place(&mut buf[..CHALLENGE_TOKEN_BYTES - MAC_BYTES], &[], sequence, key)?;
    buf[CHALLENGE_TOKEN_BYTES - MAC_BYTES..].copy_from_slice(&tag);
    Ok(())
}

/// Open a sealed challenge token block in place.
///
/// # Errors
/// `ProtocolError::DecryptionFailure` on a wrong key, a wrong sequence or any
/// tampering with the block.
pub fn decrypt_challenge_token(
    buf: &mut [u8; CHALLENGE_TOKEN_BYTES],
    sequence: u64,
    key: &Key,
) -> Result<()> {
    let (body, tag) = split_tag(buf);
    open_in_place(body, &[], &tag, sequence, key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_token() -> PrivateConnectToken {
        let mut user_data = [0u8; USER_DATA_BYTES];
        for (i, b) in user_data.iter_mut().enumerate() {
            *b = i as u8;
        }
        PrivateConnectToken {
            client_id: 0x1122334455667788,
            server_addresses: vec![
                "127.0.0.1:40000".parse().unwrap(),
                "[::1]:40001".parse().unwrap(),
            ],
            client_to_server_key: Key::from_bytes([1u8; KEY_BYTES]),
            server_to_client_key: Key::from_bytes([2u8; KEY_BYTES]),
            user_data,
        }
    }

    #[test]
    fn test_private_token_seal_open() {
        let key = Key::generate().unwrap();
        let token = sample_token();
        let mut buf = [0u8; CONNECT_TOKEN_PRIVATE_BYTES];
        token.write(&mut buf).unwrap();
        encrypt_private_token(&mut buf, 0xABCD, 1_000, 9, &key).unwrap();

        let fingerprint = TokenFingerprint::of(&buf);
        assert_ne!(fingerprint.0, [0u8; MAC_BYTES]);

        decrypt_private_token(&mut buf, 0xABCD, 1_000, 9, &key).unwrap();
        let decoded = PrivateConnectToken::read(&buf).unwrap();
        assert_eq!(decoded, token);
        assert!(decoded.authorizes(&"[::1]:40001".parse().unwrap()));
        assert!(!decoded.authorizes(&"127.0.0.1:40001".parse().unwrap()));
    }

    #[test]
    fn test_private_token_bound_to_associated_data() {
        let key = Key::generate().unwrap();
        let mut buf = [0u8; CONNECT_TOKEN_PRIVATE_BYTES];
        sample_token().write(&mut buf).unwrap();
        encrypt_private_token(&mut buf, 0xABCD, 1_000, 9, &key).unwrap();

        let sealed = buf;
        assert!(decrypt_private_token(&mut buf, 0xABCE, 1_000, 9, &key).is_err());
        assert!(decrypt_private_token(&mut buf, 0xABCD, 1_001, 9, &key).is_err());
        assert!(decrypt_private_token(&mut buf, 0xABCD, 1_000, 10, &key).is_err());
        assert_eq!(buf, sealed);
    }

    #[test]
    fn test_private_token_rejects_bad_address_count() {
        let mut token = sample_token();
        token.server_addresses.clear();
        let mut buf = [0u8; CONNECT_TOKEN_PRIVATE_BYTES];
        assert!(matches!(token.write(&mut buf), Err(ProtocolError::InvalidToken(_))));

        // count field claims more servers than allowed
        buf[8..12].copy_from_slice(&(MAX_SERVERS_PER_CONNECT as u32 + 1).to_le_bytes());
        assert!(PrivateConnectToken::read(&buf).is_err());
    }

    #[test]
    fn test_private_token_rejects_unknown_address_type() {
        let mut buf = [0u8; CONNECT_TOKEN_PRIVATE_BYTES];
        sample_token().write(&mut buf).unwrap();
        buf[12] = 9;
        assert!(matches!(
            PrivateConnectToken::read(&buf),
            Err(ProtocolError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_challenge_token_seal_open() {
        let key = Key::generate().unwrap();
        let token = ChallengeToken::new(42, [7u8; USER_DATA_BYTES]);
        let mut buf = [0u8; CHALLENGE_TOKEN_BYTES];
        token.write(&mut buf).unwrap();
        encrypt_challenge_token(&mut buf, 0x1122334455667799, &key).unwrap();

        let mut wrong_seq = buf;
        assert!(matches!(
            decrypt_challenge_token(&mut wrong_seq, 0x1122334455667798, &key),
            Err(ProtocolError::DecryptionFailure)
        ));

        decrypt_challenge_token(&mut buf, 0x1122334455667799, &key).unwrap();
        assert_eq!(ChallengeToken::read(&buf).unwrap(), token);
    }
}
