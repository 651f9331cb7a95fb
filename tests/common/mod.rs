//! Shared helpers for integration tests.
//!
//! `TestClient` plays both the token-issuing backend and the client side of
//! the handshake against a `Server<MemoryTransport>`.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;

use netcode_server::config::{NetworkConfig, MAX_PACKET_BYTES};
use netcode_server::core::packet::{decode, encode, AllowedPackets, DecodeContext, Packet, RequestPacket};
use netcode_server::core::token::{
    encrypt_private_token, PrivateConnectToken, CHALLENGE_TOKEN_BYTES, CONNECT_TOKEN_PRIVATE_BYTES,
    USER_DATA_BYTES,
};
use netcode_server::protocol::server::Server;
use netcode_server::transport::memory::MemoryTransport;
use netcode_server::utils::crypto::Key;
use netcode_server::utils::time::unix_timestamp;

pub const PROTOCOL_ID: u64 = 0x0102_0304_0506_0708;
pub const PRIVATE_KEY: [u8; 32] = [0x42; 32];
pub const SERVER_ADDRESS: &str = "127.0.0.1:40000";

pub fn config(max_clients: usize) -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.server.address = SERVER_ADDRESS.to_string();
        c.server.protocol_id = PROTOCOL_ID;
        c.server.private_key = Key::from_bytes(PRIVATE_KEY);
        c.server.max_clients = max_clients;
    })
}

pub fn started_server_with(config: &NetworkConfig) -> Server<MemoryTransport> {
    let mut server = Server::new(config, MemoryTransport::new()).expect("server");
    server.init().expect("init");
    server.start().expect("start");
    server
}

pub fn started_server(max_clients: usize) -> Server<MemoryTransport> {
    started_server_with(&config(max_clients))
}

pub struct TestClient {
    pub client_id: u64,
    pub address: SocketAddr,
    pub client_to_server_key: Key,
    pub server_to_client_key: Key,
    pub user_data: [u8; USER_DATA_BYTES],
    pub server_addresses: Vec<SocketAddr>,
    pub expire_timestamp: u64,
    pub token_sequence: u64,
    pub sequence: u64,
}

impl TestClient {
    pub fn new(client_id: u64, port: u16) -> Self {
        let mut user_data = [0u8; USER_DATA_BYTES];
        user_data[..8].copy_from_slice(&client_id.to_le_bytes());
        Self {
            client_id,
            address: SocketAddr::from(([127, 0, 0, 1], port)),
            client_to_server_key: Key::generate().unwrap(),
            server_to_client_key: Key::generate().unwrap(),
            user_data,
            server_addresses: vec![SERVER_ADDRESS.parse().unwrap()],
            expire_timestamp: unix_timestamp().unwrap() + 60,
            token_sequence: client_id,
            sequence: 0,
        }
    }

    /// A connection request sealed with `key` instead of the server's.
    pub fn request_sealed_with(&self, key: &Key) -> Vec<u8> {
        let token = PrivateConnectToken {
            client_id: self.client_id,
            server_addresses: self.server_addresses.clone(),
            client_to_server_key: self.client_to_server_key.clone(),
            server_to_client_key: self.server_to_client_key.clone(),
            user_data: self.user_data,
        };
        let mut private_data = Box::new([0u8; CONNECT_TOKEN_PRIVATE_BYTES]);
        token.write(&mut private_data).unwrap();
        encrypt_private_token(
            &mut private_data,
            PROTOCOL_ID,
            self.expire_timestamp,
            self.token_sequence,
            key,
        )
        .unwrap();

        let packet = Packet::Request(RequestPacket {
            protocol_id: PROTOCOL_ID,
            expire_timestamp: self.expire_timestamp,
            token_sequence: self.token_sequence,
            private_data,
        });
        let mut out = [0u8; MAX_PACKET_BYTES];
        let n = encode(&packet, 0, key, PROTOCOL_ID, &mut out).unwrap();
        out[..n].to_vec()
    }

    pub fn request(&self) -> Vec<u8> {
        self.request_sealed_with(&Key::from_bytes(PRIVATE_KEY))
    }

    /// Decode a server-to-client datagram.
    pub fn read(&self, data: &[u8]) -> Packet {
        let ctx = DecodeContext {
            protocol_id: PROTOCOL_ID,
            current_timestamp: 0,
            allowed: AllowedPackets::all(),
            read_key: Some(&self.server_to_client_key),
            replay_guard: None,
        };
        decode(data, ctx).expect("server packet decodes")
    }

    fn seal(&mut self, packet: &Packet) -> Vec<u8> {
        let sequence = self.sequence;
        self.sequence += 1;
        self.seal_at(packet, sequence)
    }

    /// Seal `packet` with an explicit sequence, leaving the counter alone.
    pub fn seal_at(&self, packet: &Packet, sequence: u64) -> Vec<u8> {
        let mut out = [0u8; MAX_PACKET_BYTES];
        let n = encode(packet, sequence, &self.client_to_server_key, PROTOCOL_ID, &mut out).unwrap();
        out[..n].to_vec()
    }

    pub fn response(&mut self, challenge_sequence: u64, token: [u8; CHALLENGE_TOKEN_BYTES]) -> Vec<u8> {
        self.seal(&Packet::Response {
            challenge_sequence,
            token,
        })
    }

    pub fn keep_alive(&mut self) -> Vec<u8> {
        self.seal(&Packet::KeepAlive {
            client_index: 0,
            max_clients: 0,
        })
    }

    pub fn payload(&mut self, data: &[u8]) -> Vec<u8> {
        self.seal(&Packet::Payload(data.to_vec()))
    }

    pub fn disconnect(&mut self) -> Vec<u8> {
        self.seal(&Packet::Disconnect)
    }
}

/// Send the request, expect exactly one challenge back.
pub fn request_challenge(
    server: &mut Server<MemoryTransport>,
    client: &TestClient,
) -> (u64, [u8; CHALLENGE_TOKEN_BYTES]) {
    server.process_packet(&client.request(), client.address);
    let sent = server.transport_mut().drain();
    assert_eq!(sent.len(), 1, "expected exactly one challenge");
    assert_eq!(sent[0].to, client.address);
    match client.read(&sent[0].data) {
        Packet::Challenge {
            challenge_sequence,
            token,
        } => (challenge_sequence, token),
        other => panic!("expected challenge, got {other:?}"),
    }
}

/// Run the full handshake and return the client's slot index.
pub fn handshake(server: &mut Server<MemoryTransport>, client: &mut TestClient) -> usize {
    let (challenge_sequence, token) = request_challenge(server, client);
    let response = client.response(challenge_sequence, token);
    server.process_packet(&response, client.address);

    let sent = server.transport_mut().drain();
    assert_eq!(sent.len(), 1, "expected the connect keep-alive");
    match client.read(&sent[0].data) {
        Packet::KeepAlive { client_index, .. } => client_index as usize,
        other => panic!("expected keep-alive, got {other:?}"),
    }
}
