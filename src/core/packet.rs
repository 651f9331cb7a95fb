//! # Packet Codec
//!
//! Encoding and decoding of the seven connection packet types.
//!
//! ## Wire Format
//! ```text
//! Request:   [0u8] [VERSION_INFO 13] [protocol id u64] [expire u64]
//!            [token sequence u64] [encrypted private token 1024]
//! Encrypted: [prefix u8] [sequence 1..=8 bytes] [ciphertext] [tag 16]
//!            prefix = kind | (sequence byte count << 4)
//! ```
//!
//! Encrypted packets are sealed with ChaCha20-Poly1305; the associated data
//! is `VERSION_INFO || protocol id || prefix`, so a packet from another
//! protocol, another version or with an altered type byte fails to open.
//!
//! ## Security
//! - The type tag is checked against the caller's allow-list before anything
//!   else is parsed
//! - Every body length is validated before decryption
//! - The replay guard is consulted before decryption and advanced only once
//!   the packet authenticates

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::config::{MAX_PACKET_BYTES, MAX_PAYLOAD_BYTES, VERSION_INFO};
use crate::core::cursor::{Reader, Writer};
use crate::core::token::{CHALLENGE_TOKEN_BYTES, CONNECT_TOKEN_PRIVATE_BYTES};
use crate::error::{ProtocolError, Result};
use crate::protocol::replay_guard::ReplayGuard;
use crate::utils::crypto::{open_in_place, seal_in_place, Key, MAC_BYTES};

/// Size of a connection request on the wire.
pub const REQUEST_PACKET_BYTES: usize = 1 + VERSION_INFO.len() + 8 + 8 + 8 + CONNECT_TOKEN_PRIVATE_BYTES;

const CHALLENGE_BODY_BYTES: usize = 8 + CHALLENGE_TOKEN_BYTES;
const KEEP_ALIVE_BODY_BYTES: usize = 4 + 4;
const PACKET_AD_BYTES: usize = VERSION_INFO.len() + 8 + 1;

/// Packet type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Request = 0,
    Denied = 1,
    Challenge = 2,
    Response = 3,
    KeepAlive = 4,
    Payload = 5,
    Disconnect = 6,
}

impl PacketKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Allow-list bit for this packet type.
    pub fn flag(self) -> AllowedPackets {
        AllowedPackets::from_bits_retain(1 << self.as_u8())
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Request => "connection request",
            Self::Denied => "connection denied",
            Self::Challenge => "connection challenge",
            Self::Response => "connection response",
            Self::KeepAlive => "connection keep-alive",
            Self::Payload => "connection payload",
            Self::Disconnect => "connection disconnect",
        }
    }

    /// Packet types whose sequence numbers are tracked by the replay guard.
    pub fn is_replay_protected(self) -> bool {
        matches!(self, Self::KeepAlive | Self::Payload | Self::Disconnect)
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Request,
            1 => Self::Denied,
            2 => Self::Challenge,
            3 => Self::Response,
            4 => Self::KeepAlive,
            5 => Self::Payload,
            6 => Self::Disconnect,
            other => return Err(ProtocolError::UnknownPacketType(other)),
        })
    }
}

bitflags! {
    /// Set of packet types a decoder will accept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct AllowedPackets: u8 {
        const REQUEST = 1 << 0;
        const DENIED = 1 << 1;
        const CHALLENGE = 1 << 2;
        const RESPONSE = 1 << 3;
        const KEEP_ALIVE = 1 << 4;
        const PAYLOAD = 1 << 5;
        const DISCONNECT = 1 << 6;
    }
}

impl AllowedPackets {
    /// The packet types a server receives from clients.
    pub const fn server_default() -> Self {
        Self::REQUEST
            .union(Self::RESPONSE)
            .union(Self::KEEP_ALIVE)
            .union(Self::PAYLOAD)
            .union(Self::DISCONNECT)
    }

    pub fn permits(self, kind: PacketKind) -> bool {
        self.contains(kind.flag())
    }
}

impl Default for AllowedPackets {
    fn default() -> Self {
        Self::server_default()
    }
}

/// Unencrypted envelope of a connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    pub protocol_id: u64,
    pub expire_timestamp: u64,
    /// Nonce the private token was sealed with.
    pub token_sequence: u64,
    /// Sealed private section of the connect token.
    pub private_data: Box<[u8; CONNECT_TOKEN_PRIVATE_BYTES]>,
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Request(RequestPacket),
    Denied,
    Challenge {
        challenge_sequence: u64,
        token: [u8; CHALLENGE_TOKEN_BYTES],
    },
    Response {
        challenge_sequence: u64,
        token: [u8; CHALLENGE_TOKEN_BYTES],
    },
    KeepAlive {
        client_index: u32,
        max_clients: u32,
    },
    Payload(Vec<u8>),
    Disconnect,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Request(_) => PacketKind::Request,
            Self::Denied => PacketKind::Denied,
            Self::Challenge { .. } => PacketKind::Challenge,
            Self::Response { .. } => PacketKind::Response,
            Self::KeepAlive { .. } => PacketKind::KeepAlive,
            Self::Payload(_) => PacketKind::Payload,
            Self::Disconnect => PacketKind::Disconnect,
        }
    }
}

/// Inputs the decoder needs beyond the datagram itself.
pub struct DecodeContext<'a> {
    pub protocol_id: u64,
    /// Current unix time in seconds, for request expiry.
    pub current_timestamp: u64,
    pub allowed: AllowedPackets,
    /// Key the sender encrypts with, if the sender is known.
    pub read_key: Option<&'a Key>,
    /// Present only for connected clients.
    pub replay_guard: Option<&'a mut ReplayGuard>,
}

/// Minimum number of bytes needed to hold `sequence`.
pub fn sequence_bytes(sequence: u64) -> usize {
    (((64 - sequence.leading_zeros()) as usize + 7) / 8).max(1)
}

fn associated_data(protocol_id: u64, prefix: u8) -> [u8; PACKET_AD_BYTES] {
    let mut ad = [0u8; PACKET_AD_BYTES];
    ad[..VERSION_INFO.len()].copy_from_slice(VERSION_INFO);
    ad[VERSION_INFO.len()..VERSION_INFO.len() + 8].copy_from_slice(&protocol_id.to_le_bytes());
    ad[PACKET_AD_BYTES - 1] = prefix;
    ad
}

/// Decode one datagram.
///
/// # Errors
/// Any structural, policy or authentication failure. Callers on the receive
/// path treat every error as "drop the datagram".
pub fn decode(buf: &[u8], ctx: DecodeContext<'_>) -> Result<Packet> {
    if buf.len() > MAX_PACKET_BYTES {
        return Err(ProtocolError::OversizedPacket(buf.len()));
    }

    let mut r = Reader::new(buf);
    let prefix = r.read_u8()?;
    let kind = PacketKind::try_from(prefix & 0x0F)?;
    if !ctx.allowed.permits(kind) {
        return Err(ProtocolError::DisallowedPacket(kind.as_u8()));
    }

    if kind == PacketKind::Request {
        if prefix != 0 {
            return Err(ProtocolError::InvalidPacket);
        }
        return decode_request(buf, &ctx).map(Packet::Request);
    }

    let seq_len = (prefix >> 4) as usize;
    if !(1..=8).contains(&seq_len) {
        return Err(ProtocolError::InvalidPacket);
    }
    let sequence = r.read_uint(seq_len)?;

    if kind.is_replay_protected() {
        if let Some(guard) = ctx.replay_guard.as_deref() {
            if guard.already_received(sequence) {
                return Err(ProtocolError::ReplayDetected(sequence));
            }
        }
    }

    let sealed = r.rest();
    if sealed.len() < MAC_BYTES {
        return Err(ProtocolError::Truncated {
            needed: MAC_BYTES,
            remaining: sealed.len(),
        });
    }
    let body_len = sealed.len() - MAC_BYTES;
    let length_ok = match kind {
        PacketKind::Denied | PacketKind::Disconnect => body_len == 0,
        PacketKind::Challenge | PacketKind::Response => body_len == CHALLENGE_BODY_BYTES,
        PacketKind::KeepAlive => body_len == KEEP_ALIVE_BODY_BYTES,
        PacketKind::Payload => (1..=MAX_PAYLOAD_BYTES).contains(&body_len),
        PacketKind::Request => false,
    };
    if !length_ok {
        return Err(ProtocolError::InvalidPacket);
    }

    let key = ctx.read_key.ok_or(ProtocolError::MissingKey)?;

    let mut body = [0u8; MAX_PACKET_BYTES];
    let body = &mut body[..body_len];
    body.copy_from_slice(&sealed[..body_len]);
    let mut tag = [0u8; MAC_BYTES];
    tag.copy_from_slice(&sealed[body_len..]);

    let ad = associated_data(ctx.protocol_id, prefix);
    open_in_place(body, &ad, &tag, sequence, key)?;

    if kind.is_replay_protected() {
        if let Some(guard) = ctx.replay_guard {
            guard.advance(sequence);
        }
    }

    let mut r = Reader::new(body);
    let packet = match kind {
        PacketKind::Denied => Packet::Denied,
        PacketKind::Disconnect => Packet::Disconnect,
        PacketKind::Challenge => Packet::Challenge {
            challenge_sequence: r.read_u64()?,
            token: r.read_array::<CHALLENGE_TOKEN_BYTES>()?,
        },
        PacketKind::Response => Packet::Response {
            challenge_sequence: r.read_u64()?,
            token: r.read_array::<CHALLENGE_TOKEN_BYTES>()?,
        },
        PacketKind::KeepAlive => Packet::KeepAlive {
            client_index: r.read_u32()?,
            max_clients: r.read_u32()?,
        },
        PacketKind::Payload => Packet::Payload(body.to_vec()),
        PacketKind::Request => return Err(ProtocolError::InvalidPacket),
    };
    Ok(packet)
}

fn decode_request(buf: &[u8], ctx: &DecodeContext<'_>) -> Result<RequestPacket> {
    if buf.len() != REQUEST_PACKET_BYTES {
        return Err(ProtocolError::InvalidPacket);
    }

    let mut r = Reader::new(&buf[1..]);
    if r.read_bytes(VERSION_INFO.len())? != VERSION_INFO {
        return Err(ProtocolError::UnsupportedVersion);
    }

    let protocol_id = r.read_u64()?;
    if protocol_id != ctx.protocol_id {
        return Err(ProtocolError::ProtocolMismatch {
            expected: ctx.protocol_id,
            actual: protocol_id,
        });
    }

    let expire_timestamp = r.read_u64()?;
    if expire_timestamp <= ctx.current_timestamp {
        return Err(ProtocolError::TokenExpired(expire_timestamp));
    }

    let token_sequence = r.read_u64()?;
    let private_data = Box::new(r.read_array::<CONNECT_TOKEN_PRIVATE_BYTES>()?);

    Ok(RequestPacket {
        protocol_id,
        expire_timestamp,
        token_sequence,
        private_data,
    })
}

/// Encode `packet` into `out`, returning the number of bytes written.
///
/// Requests are written in the clear and ignore `sequence` and `key`; all
/// other packets are sealed with `key` using `sequence` as the nonce.
pub fn encode(
    packet: &Packet,
    sequence: u64,
    key: &Key,
    protocol_id: u64,
    out: &mut [u8],
) -> Result<usize> {
    let kind = packet.kind();
    let mut w = Writer::new(out);

    if let Packet::Request(request) = packet {
        w.write_u8(kind.as_u8())?;
        w.write_bytes(VERSION_INFO)?;
        w.write_u64(request.protocol_id)?;
        w.write_u64(request.expire_timestamp)?;
        w.write_u64(request.token_sequence)?;
        w.write_bytes(&request.private_data[..])?;
        return Ok(w.position());
    }

    let seq_len = sequence_bytes(sequence);
    let prefix = kind.as_u8() | ((seq_len as u8) << 4);
    w.write_u8(prefix)?;
    w.write_uint(sequence, seq_len)?;

    let body_len = match packet {
        Packet::Denied | Packet::Disconnect => 0,
        Packet::Challenge { .. } | Packet::Response { .. } => CHALLENGE_BODY_BYTES,
        Packet::KeepAlive { .. } => KEEP_ALIVE_BODY_BYTES,
        Packet::Payload(data) => {
            if data.is_empty() {
                return Err(ProtocolError::InvalidPacket);
            }
            if data.len() > MAX_PAYLOAD_BYTES {
                return Err(ProtocolError::OversizedPacket(data.len()));
            }
            data.len()
        }
        Packet::Request(_) => return Err(ProtocolError::InvalidPacket),
    };

    let body = w.reserve(body_len)?;
    let mut bw = Writer::new(&mut body[..]);
    match packet {
        Packet::Challenge {
            challenge_sequence,
            token,
        }
        | Packet::Response {
            challenge_sequence,
            token,
        } => {
            bw.write_u64(*challenge_sequence)?;
            bw.write_bytes(token)?;
        }
        Packet::KeepAlive {
            client_index,
            max_clients,
        } => {
            bw.write_u32(*client_index)?;
            bw.write_u32(*max_clients)?;
        }
        Packet::Payload(data) => bw.write_bytes(data)?,
        Packet::Denied | Packet::Disconnect | Packet::Request(_) => {}
    }

    let ad = associated_data(protocol_id, prefix);
    let tag = seal_in_place(body, &ad, sequence, key)?;
    w.write_bytes(&tag)?;
    Ok(w.position())
}
