//! Connection request and response processing.
//!
//! Every check drops the packet on failure. Only two paths ever reply: an
//! accepted request gets a challenge, and a valid response that finds the
//! server full gets a denial. A full server on the request path stays
//! silent.

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::core::packet::{Packet, RequestPacket};
use crate::core::token::{
    decrypt_challenge_token, decrypt_private_token, encrypt_challenge_token, ChallengeToken,
    PrivateConnectToken, TokenFingerprint, CHALLENGE_TOKEN_BYTES,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::server::{Server, ServerEvent};
use crate::transport::Transport;

impl<T: Transport> Server<T> {
    pub(super) fn process_connection_request(&mut self, request: &RequestPacket, from: SocketAddr) {
        self.metrics.request_received();

        let mut private = *request.private_data;
        let fingerprint = TokenFingerprint::of(&private);
        if let Err(e) = decrypt_private_token(
            &mut private,
            self.protocol_id,
            request.expire_timestamp,
            request.token_sequence,
            &self.private_key,
        ) {
            debug!(%from, error = %e, "Server ignored connection request. Failed to decrypt connect token");
            self.metrics.malformed_dropped();
            return;
        }
        let token = match PrivateConnectToken::read(&private) {
            Ok(token) => token,
            Err(e) => {
                debug!(%from, error = %e, "Server ignored connection request. Failed to read connect token");
                self.metrics.malformed_dropped();
                return;
            }
        };

        if !token.authorizes(&self.public_address) {
            debug!(%from, "Server ignored connection request. Server address not in connect token whitelist");
            self.metrics.policy_dropped();
            return;
        }

        if self.sessions.find_slot_by_address(&from).is_some() {
            debug!(%from, "Server ignored connection request. A client with this address is already connected");
            self.metrics.policy_dropped();
            return;
        }

        if self.sessions.find_slot_by_client_id(token.client_id).is_some() {
            debug!(%from, client_id = token.client_id, "Server ignored connection request. A client with this id is already connected");
            self.metrics.policy_dropped();
            return;
        }

        if !self.sessions.find_or_create_pending(
            fingerprint,
            from,
            self.time,
            request.expire_timestamp,
            self.timestamp,
        ) {
            debug!(%from, "Server ignored connection request. Connect token has already been used");
            self.metrics.policy_dropped();
            return;
        }

        if self.sessions.connected_count() >= self.max_clients {
            debug!(%from, "Server ignored connection request. Server is full");
            self.metrics.capacity_dropped();
            return;
        }

        let expire_at = self.time + self.timeouts.connect;
        if !self.sessions.add_pending_mapping(&token, from, self.time, expire_at) {
            warn!(%from, "Server ignored connection request. Failed to add pending mapping");
            self.metrics.capacity_dropped();
            return;
        }

        if let Err(e) = self.send_challenge(&token, from) {
            warn!(%from, error = %e, "Server failed to send connection challenge");
        }
    }

    fn send_challenge(&mut self, token: &PrivateConnectToken, to: SocketAddr) -> Result<()> {
        let mut buf = [0u8; CHALLENGE_TOKEN_BYTES];
        ChallengeToken::new(token.client_id, token.user_data).write(&mut buf)?;

        // advanced before sealing; a failed seal still consumes the nonce
        let challenge_sequence = self.challenge_sequence;
        self.challenge_sequence += 1;

        let challenge_key = self.challenge_key.as_ref().ok_or(ProtocolError::NotInitialized)?;
        encrypt_challenge_token(&mut buf, challenge_sequence, challenge_key)?;

        let packet = Packet::Challenge {
            challenge_sequence,
            token: buf,
        };
        self.send_global_packet(&packet, &token.server_to_client_key, to)?;
        self.metrics.challenge_sent();
        debug!(%to, client_id = token.client_id, challenge_sequence, "Server sent connection challenge");
        Ok(())
    }

    pub(super) fn process_connection_response(
        &mut self,
        challenge_sequence: u64,
        mut token: [u8; CHALLENGE_TOKEN_BYTES],
        from: SocketAddr,
    ) {
        self.metrics.response_received();

        let Some(challenge_key) = self.challenge_key.as_ref() else {
            return;
        };
        if let Err(e) = decrypt_challenge_token(&mut token, challenge_sequence, challenge_key) {
            debug!(%from, error = %e, "Server ignored connection response. Failed to decrypt challenge token");
            self.metrics.malformed_dropped();
            return;
        }
        let challenge = match ChallengeToken::read(&token) {
            Ok(challenge) => challenge,
            Err(e) => {
                debug!(%from, error = %e, "Server ignored connection response. Failed to read challenge token");
                self.metrics.malformed_dropped();
                return;
            }
        };

        let Some(send_key) = self
            .sessions
            .find_pending_mapping(&from, self.time)
            .map(|m| m.send_key.clone())
        else {
            debug!(%from, "Server ignored connection response. No packet send key");
            self.metrics.policy_dropped();
            return;
        };

        if self.sessions.find_slot_by_address(&from).is_some() {
            debug!(%from, "Server ignored connection response. A client with this address is already connected");
            self.metrics.policy_dropped();
            return;
        }

        if self.sessions.find_slot_by_client_id(challenge.client_id).is_some() {
            debug!(%from, client_id = challenge.client_id, "Server ignored connection response. A client with this id is already connected");
            self.metrics.policy_dropped();
            return;
        }

        if self.sessions.connected_count() >= self.max_clients {
            info!(%from, "Server denied connection response. Server is full");
            match self.send_global_packet(&Packet::Denied, &send_key, from) {
                Ok(()) => self.metrics.denied_sent(),
                Err(e) => warn!(%from, error = %e, "Server failed to send connection denied"),
            }
            return;
        }

        self.connect_client(&challenge, from);
    }

    fn connect_client(&mut self, challenge: &ChallengeToken, from: SocketAddr) {
        let Some(index) = self.sessions.occupy_slot(challenge, from, self.time) else {
            warn!(%from, client_id = challenge.client_id, "Server failed to occupy a client slot");
            return;
        };

        self.metrics.connection_established();
        info!(
            client_id = challenge.client_id,
            %from,
            slot = index,
            "Server accepted client"
        );
        self.push_event(ServerEvent::ClientConnected {
            client_index: index,
            client_id: challenge.client_id,
            address: from,
        });

        if let Err(e) = self.send_keep_alive(index) {
            warn!(slot = index, error = %e, "Server failed to send connect keep-alive");
        }
    }
}
