#![no_main]

use libfuzzer_sys::fuzz_target;
use netcode_server::core::packet::{decode, AllowedPackets, DecodeContext};
use netcode_server::protocol::replay_guard::ReplayGuard;
use netcode_server::utils::crypto::Key;

fuzz_target!(|data: &[u8]| {
    // Fuzz the inbound decoder as a connected client would reach it
    let key = Key::from_bytes([0x42; 32]);
    let mut guard = ReplayGuard::new();
    let ctx = DecodeContext {
        protocol_id: 0x1122_3344_5566_7788,
        current_timestamp: 0,
        allowed: AllowedPackets::all(),
        read_key: Some(&key),
        replay_guard: Some(&mut guard),
    };
    let _ = decode(data, ctx);

    // And as an unknown sender with no key
    let ctx = DecodeContext {
        protocol_id: 0x1122_3344_5566_7788,
        current_timestamp: 0,
        allowed: AllowedPackets::server_default(),
        read_key: None,
        replay_guard: None,
    };
    let _ = decode(data, ctx);
});
