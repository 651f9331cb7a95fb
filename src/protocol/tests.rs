// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;

use crate::config::{NetworkConfig, MAX_PACKET_BYTES};
use crate::core::packet::{decode, encode, AllowedPackets, DecodeContext, Packet, RequestPacket};
use crate::core::token::{
    encrypt_private_token, PrivateConnectToken, CONNECT_TOKEN_PRIVATE_BYTES, USER_DATA_BYTES,
};
use crate::protocol::server::{Server, GLOBAL_SEQUENCE_START};
use crate::transport::memory::MemoryTransport;
use crate::utils::crypto::Key;
use crate::utils::time::unix_timestamp;

const PROTOCOL_ID: u64 = 0xFEED;
const SERVER: &str = "127.0.0.1:40000";

fn server() -> Server<MemoryTransport> {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = SERVER.to_string();
        c.server.protocol_id = PROTOCOL_ID;
        c.server.private_key = Key::from_bytes([3; 32]);
        c.server.max_clients = 4;
    });
    let mut server = Server::new(&config, MemoryTransport::new()).unwrap();
    server.init().unwrap();
    server.start().unwrap();
    server
}

fn request(client_id: u64, token_sequence: u64) -> Vec<u8> {
    let token = PrivateConnectToken {
        client_id,
        server_addresses: vec![SERVER.parse().unwrap()],
        client_to_server_key: Key::from_bytes([client_id as u8; 32]),
        server_to_client_key: Key::from_bytes([client_id as u8 ^ 0xFF; 32]),
        user_data: [0; USER_DATA_BYTES],
    };
    let expire_timestamp = unix_timestamp().unwrap() + 60;
    let mut private_data = Box::new([0u8; CONNECT_TOKEN_PRIVATE_BYTES]);
    token.write(&mut private_data).unwrap();
    encrypt_private_token(
        &mut private_data,
        PROTOCOL_ID,
        expire_timestamp,
        token_sequence,
        &Key::from_bytes([3; 32]),
    )
    .unwrap();

    let packet = Packet::Request(RequestPacket {
        protocol_id: PROTOCOL_ID,
        expire_timestamp,
        token_sequence,
        private_data,
    });
    let mut out = [0u8; MAX_PACKET_BYTES];
    let n = encode(&packet, 0, &Key::from_bytes([0; 32]), PROTOCOL_ID, &mut out).unwrap();
    out[..n].to_vec()
}

fn read_challenge(bytes: &[u8], client_id: u64) -> u64 {
    let key = Key::from_bytes([client_id as u8 ^ 0xFF; 32]);
    let ctx = DecodeContext {
        protocol_id: PROTOCOL_ID,
        current_timestamp: 0,
        allowed: AllowedPackets::all(),
        read_key: Some(&key),
        replay_guard: None,
    };
    match decode(bytes, ctx).unwrap() {
        Packet::Challenge {
            challenge_sequence, ..
        } => challenge_sequence,
        other => panic!("expected challenge, got {other:?}"),
    }
}

#[test]
fn test_challenge_uses_global_sequence_space() {
    let mut server = server();
    let from: SocketAddr = "127.0.0.1:50001".parse().unwrap();
    server.process_packet(&request(1, 1), from);

    let sent = server.transport_mut().drain();
    assert_eq!(sent.len(), 1);
    let bytes = &sent[0].data;
    // eight sequence bytes, top bit set
    assert_eq!(bytes[0] >> 4, 8);
    assert_eq!(&bytes[1..9], &GLOBAL_SEQUENCE_START.to_le_bytes());
    assert_eq!(server.global_sequence(), GLOBAL_SEQUENCE_START + 1);
}

#[test]
fn test_challenge_sequences_strictly_increase() {
    let mut server = server();
    let mut previous = None;
    for client_id in 1..=4u64 {
        let from: SocketAddr = format!("127.0.0.1:{}", 50000 + client_id).parse().unwrap();
        server.process_packet(&request(client_id, client_id), from);
        let sent = server.transport_mut().drain();
        assert_eq!(sent.len(), 1);
        let sequence = read_challenge(&sent[0].data, client_id);
        if let Some(prev) = previous {
            assert!(sequence > prev);
        }
        previous = Some(sequence);
    }
    assert_eq!(server.challenge_sequence(), 4);
}

#[test]
fn test_stopped_server_ignores_traffic() {
    let mut server = server();
    server.stop();
    server.process_packet(&request(1, 1), "127.0.0.1:50001".parse().unwrap());
    assert!(server.transport().sent().is_empty());
    assert_eq!(server.metrics().snapshot().packets_received, 0);
}

#[test]
fn test_servers_do_not_share_counters() {
    let mut a = server();
    let b = server();
    a.process_packet(&request(1, 1), "127.0.0.1:50001".parse().unwrap());
    assert_eq!(a.challenge_sequence(), 1);
    assert_eq!(b.challenge_sequence(), 0);
    assert_eq!(b.global_sequence(), GLOBAL_SEQUENCE_START);
}
