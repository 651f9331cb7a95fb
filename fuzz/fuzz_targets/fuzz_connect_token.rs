#![no_main]

use libfuzzer_sys::fuzz_target;
use netcode_server::core::token::{
    ChallengeToken, PrivateConnectToken, CHALLENGE_TOKEN_BYTES, CONNECT_TOKEN_PRIVATE_BYTES,
};

fuzz_target!(|data: &[u8]| {
    // Fuzz plaintext token parsing
    let mut private = [0u8; CONNECT_TOKEN_PRIVATE_BYTES];
    let n = data.len().min(CONNECT_TOKEN_PRIVATE_BYTES);
    private[..n].copy_from_slice(&data[..n]);
    if let Ok(token) = PrivateConnectToken::read(&private) {
        let mut out = [0u8; CONNECT_TOKEN_PRIVATE_BYTES];
        let _ = token.write(&mut out);
    }

    let mut challenge = [0u8; CHALLENGE_TOKEN_BYTES];
    let n = data.len().min(CHALLENGE_TOKEN_BYTES);
    challenge[..n].copy_from_slice(&data[..n]);
    let _ = ChallengeToken::read(&challenge);
});
