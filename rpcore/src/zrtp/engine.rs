//! The ZRTP handshake state machine, free of I/O.
//!
//! [`ZrtpEngine::handle`] takes one received datagram and returns the next
//! datagram to send, if any. Roles share one transition table; a message
//! the role can legitimately see in another state is treated as a
//! retransmission and ignored, while a message the role can never receive
//! fails the handshake.

use crate::crypto::sha256;
use crate::types::Zid;
use crate::zrtp::error::{Result, ZrtpError};
use crate::zrtp::hash_chain::HashChain;
use crate::zrtp::key_agreement::{
    KeyAgreementType, LocalKeyPair, calculate_key_agreement, calculate_total_hash,
};
use crate::zrtp::master_secret::MasterSecret;
use crate::zrtp::packet::{
    CLIENT_ID_LENGTH, CommitPacket, ConfirmPacket, DhPacket, HandshakePacket, HelloPacket,
    MessageType, conf2_ack, hello_ack, is_zrtp_datagram,
};
use crate::zrtp::retained::{RetainedSecrets, RetainedSecretsCalculator};
use crate::zrtp::sas::calculate_sas;
use log::{debug, info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Historical client id that supports EC25 without advertising it.
const EC25_CAPABLE_LEGACY_CLIENT: &str = "RedPhone 019    ";

/// Cache expiry value meaning "retain forever".
pub const CACHE_FOREVER: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    ExpectingHello,
    ExpectingHelloAck,
    ExpectingCommit,
    ExpectingDh1,
    ExpectingDh2,
    ExpectingConfirmOne,
    ExpectingConfirmTwo,
    ExpectingConfirmAck,
    HandshakeComplete,
}

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Sent in Hello, space padded to 16 bytes.
    pub client_id: String,
    /// Preference ordered.
    pub key_agreements: Vec<KeyAgreementType>,
    /// How long the peer may retain the new secret, in seconds.
    pub cache_expiry_secs: u32,
    /// Peers (by client id) that get the all-zero Confirm IV encoding.
    /// Empty unless the operator opts in.
    pub legacy_zero_iv_client_ids: Vec<String>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            client_id: "RedPhone 024".to_string(),
            key_agreements: vec![KeyAgreementType::Ec25, KeyAgreementType::Dh3k],
            cache_expiry_secs: CACHE_FOREVER,
            legacy_zero_iv_client_ids: Vec::new(),
        }
    }
}

impl HandshakeConfig {
    fn client_id_bytes(&self) -> [u8; CLIENT_ID_LENGTH] {
        let mut id = [b' '; CLIENT_ID_LENGTH];
        for (slot, byte) in id.iter_mut().zip(self.client_id.bytes()) {
            *slot = byte;
        }
        id
    }

    fn is_legacy_zero_iv_peer(&self, client_id: &str) -> bool {
        self.legacy_zero_iv_client_ids
            .iter()
            .any(|legacy| legacy.trim_end() == client_id.trim_end())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The peer identified itself; retained secrets for it should be
    /// installed before the engine builds its DH packet.
    PeerHello { zid: Zid, client_id: String },
    Complete,
}

/// What to do after feeding the engine a datagram.
#[derive(Debug, Default)]
pub struct Step {
    pub outgoing: Option<Vec<u8>>,
    pub event: Option<EngineEvent>,
}

impl Step {
    fn none() -> Self {
        Self::default()
    }

    fn send(datagram: Vec<u8>) -> Self {
        Self {
            outgoing: Some(datagram),
            event: None,
        }
    }

    fn with_event(mut self, event: EngineEvent) -> Self {
        self.event = Some(event);
        self
    }
}

/// Result of a completed handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub master_secret: MasterSecret,
    pub sas: String,
    pub key_agreement: KeyAgreementType,
    pub peer_zid: Zid,
    pub peer_client_id: String,
    /// We held retained secrets for this peer before the call.
    pub had_retained_secrets: bool,
    /// One of them matched the peer's.
    pub continuity: bool,
    /// The peer reports having verified the SAS with us.
    pub peer_sas_verified: bool,
    /// Seconds the new retained secret may be kept: the smaller of both sides' values.
    pub cache_expiry_secs: u32,
}

pub struct ZrtpEngine {
    role: Role,
    state: HandshakeState,
    config: HandshakeConfig,
    zid: Zid,
    hash_chain: HashChain,
    local_hello: HelloPacket,
    foreign_hello: Option<HelloPacket>,
    commit: Option<CommitPacket>,
    local_dh: Option<DhPacket>,
    foreign_dh: Option<DhPacket>,
    key_pair: Option<LocalKeyPair>,
    key_agreement: Option<KeyAgreementType>,
    retained: RetainedSecretsCalculator,
    local_sas_verified: bool,
    master_secret: Option<MasterSecret>,
    continuity: bool,
    peer_sas_verified: bool,
    peer_cache_expiry: u32,
    last_sent: Option<HandshakePacket>,
    sequence: u16,
    ssrc: u32,
}

impl ZrtpEngine {
    pub fn new(role: Role, zid: Zid, config: HandshakeConfig) -> Self {
        let hash_chain = HashChain::generate();
        let local_hello = HelloPacket::new(
            &hash_chain,
            &zid,
            &config.client_id_bytes(),
            &config.key_agreements,
        );
        let mut rng = rand::rng();

        Self {
            role,
            state: HandshakeState::ExpectingHello,
            config,
            zid,
            hash_chain,
            local_hello,
            foreign_hello: None,
            commit: None,
            local_dh: None,
            foreign_dh: None,
            key_pair: None,
            key_agreement: None,
            retained: RetainedSecretsCalculator::new(role, RetainedSecrets::default()),
            local_sas_verified: false,
            master_secret: None,
            continuity: false,
            peer_sas_verified: false,
            peer_cache_expiry: CACHE_FOREVER,
            last_sent: None,
            sequence: (rng.next_u32() & 0x7fff) as u16,
            ssrc: rng.next_u32(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == HandshakeState::HandshakeComplete
    }

    pub fn zid(&self) -> &Zid {
        &self.zid
    }

    /// Installs what the store holds for the peer named in its Hello.
    ///
    /// Must happen before our DH packet is built; later calls are ignored.
    pub fn install_retained_secrets(&mut self, secrets: RetainedSecrets, sas_verified: bool) {
        if self.local_dh.is_some() {
            warn!("Retained secrets arrived after DH packet was built; ignoring");
            return;
        }
        self.retained = RetainedSecretsCalculator::new(self.role, secrets);
        self.local_sas_verified = sas_verified;
    }

    /// The responder opens with its Hello; the initiator waits for it.
    pub fn start(&mut self) -> Option<Vec<u8>> {
        match self.role {
            Role::Responder => {
                let hello = self.local_hello.packet().clone();
                Some(self.send(hello))
            }
            Role::Initiator => None,
        }
    }

    /// Re-encodes the last packet we sent, if the handshake is still open.
    pub fn retransmit(&mut self) -> Option<Vec<u8>> {
        if self.is_complete() {
            return None;
        }
        let packet = self.last_sent.clone()?;
        Some(self.encode(&packet))
    }

    /// The error to report when the overall negotiation timer fires.
    pub fn timeout_error(&self) -> ZrtpError {
        match (self.role, self.state) {
            (Role::Initiator, HandshakeState::ExpectingHello) => ZrtpError::RecipientUnavailable,
            (_, state) => ZrtpError::NegotiationFailed(format!("timed out in {:?}", state)),
        }
    }

    pub fn handle(&mut self, datagram: &[u8]) -> Result<Step> {
        if self.is_complete() {
            return Ok(Step::none());
        }

        if !is_zrtp_datagram(datagram) {
            // RFC 6189 section 4.6: the first SRTP packet implies Conf2ACK.
            if self.role == Role::Initiator && self.state == HandshakeState::ExpectingConfirmAck {
                info!("Media arrived before Conf2ACK; treating handshake as complete");
                return self.handle_conf2_ack();
            }
            debug!("Ignoring non-ZRTP datagram of {} bytes", datagram.len());
            return Ok(Step::none());
        }

        let packet = HandshakePacket::parse(datagram)?;
        let message_type = packet.message_type();
        debug!(
            "{:?} in {:?} received {}",
            self.role, self.state, message_type
        );

        use HandshakeState as S;
        use MessageType as M;

        match (self.role, self.state, message_type) {
            (Role::Initiator, S::ExpectingHello, M::Hello) => self.initiator_handle_hello(packet),
            (Role::Initiator, S::ExpectingHelloAck, M::HelloAck) => {
                self.initiator_handle_hello_ack()
            }
            (Role::Initiator, S::ExpectingDh1, M::DhPart1) => self.initiator_handle_dh(packet),
            (Role::Initiator, S::ExpectingConfirmOne, M::Confirm1) => {
                self.initiator_handle_confirm(packet)
            }
            (Role::Initiator, S::ExpectingConfirmAck, M::Conf2Ack) => self.handle_conf2_ack(),

            (Role::Responder, S::ExpectingHello, M::Hello) => self.responder_handle_hello(packet),
            (Role::Responder, S::ExpectingCommit, M::Commit) => {
                self.responder_handle_commit(packet)
            }
            (Role::Responder, S::ExpectingDh2, M::DhPart2) => self.responder_handle_dh(packet),
            (Role::Responder, S::ExpectingConfirmTwo, M::Confirm2) => {
                self.responder_handle_confirm(packet)
            }

            (
                Role::Initiator,
                _,
                M::Hello | M::HelloAck | M::DhPart1 | M::Confirm1 | M::Conf2Ack,
            )
            | (Role::Responder, _, M::Hello | M::HelloAck | M::Commit | M::DhPart2 | M::Confirm2) => {
                debug!("Ignoring retransmitted {} in {:?}", message_type, self.state);
                Ok(Step::none())
            }

            (Role::Initiator, _, M::Commit | M::DhPart2 | M::Confirm2)
            | (Role::Responder, _, M::DhPart1 | M::Confirm1 | M::Conf2Ack) => Err(
                ZrtpError::invalid(format!("{:?} received {}", self.role, message_type)),
            ),
        }
    }

    /// Consumes the engine once the handshake has completed.
    pub fn into_outcome(mut self) -> Result<HandshakeOutcome> {
        if !self.is_complete() {
            return Err(ZrtpError::Internal("handshake not complete"));
        }
        let master_secret = self
            .master_secret
            .take()
            .ok_or(ZrtpError::Internal("complete without master secret"))?;
        let foreign_hello = self
            .foreign_hello
            .as_ref()
            .ok_or(ZrtpError::Internal("complete without peer Hello"))?;
        let key_agreement = self
            .key_agreement
            .ok_or(ZrtpError::Internal("complete without key agreement"))?;

        Ok(HandshakeOutcome {
            sas: calculate_sas(master_secret.sas()),
            key_agreement,
            peer_zid: foreign_hello.zid(),
            peer_client_id: foreign_hello.client_id(),
            had_retained_secrets: !self.retained.secrets().is_empty(),
            continuity: self.continuity,
            peer_sas_verified: self.peer_sas_verified,
            cache_expiry_secs: self.config.cache_expiry_secs.min(self.peer_cache_expiry),
            master_secret,
        })
    }

    fn encode(&mut self, packet: &HandshakePacket) -> Vec<u8> {
        self.sequence = self.sequence.wrapping_add(1);
        packet.encode(self.sequence, self.ssrc)
    }

    /// Encodes a packet and remembers it for retransmission.
    fn send(&mut self, packet: HandshakePacket) -> Vec<u8> {
        let datagram = self.encode(&packet);
        debug!("{:?} sending {}", self.role, packet.message_type());
        self.last_sent = Some(packet);
        datagram
    }

    fn accept_hello(&mut self, packet: HandshakePacket) -> Result<EngineEvent> {
        let hello = HelloPacket::from_packet(packet)?;
        if !hello.has_supported_version() {
            return Err(ZrtpError::invalid(format!(
                "unsupported ZRTP version {:?}",
                String::from_utf8_lossy(hello.version())
            )));
        }
        let zid = hello.zid();
        if zid == self.zid {
            return Err(ZrtpError::invalid("peer ZID equals our own"));
        }
        let client_id = hello.client_id();
        info!(
            "Peer Hello from {:?} (zid {}), offers {:?}",
            client_id.trim_end(),
            zid,
            hello.key_agreements()
        );
        self.foreign_hello = Some(hello);
        Ok(EngineEvent::PeerHello { zid, client_id })
    }

    fn zero_iv_for_peer(&self) -> bool {
        self.foreign_hello
            .as_ref()
            .is_some_and(|hello| self.config.is_legacy_zero_iv_peer(&hello.client_id()))
    }

    /// Opens the peer's Confirm and checks its H0 against the DH packet it sent.
    fn verify_confirm(
        &mut self,
        packet: HandshakePacket,
        mac_key: &[u8],
        cipher_key: &[u8],
    ) -> Result<()> {
        let confirm = ConfirmPacket::from_packet(packet)?;
        if confirm.has_zero_iv() && !self.zero_iv_for_peer() {
            return Err(ZrtpError::invalid("zero IV Confirm from non-legacy peer"));
        }
        let contents = confirm.open(mac_key, cipher_key)?;

        let foreign_dh = self
            .foreign_dh
            .as_ref()
            .ok_or(ZrtpError::Internal("Confirm before peer DH packet"))?;
        foreign_dh.verify_mac(&contents.preimage)?;

        self.peer_sas_verified = contents.sas_verified;
        self.peer_cache_expiry = contents.cache_expiry;
        Ok(())
    }

    fn build_confirm(
        &self,
        message_type: MessageType,
        mac_key: &[u8],
        cipher_key: &[u8],
    ) -> Result<HandshakePacket> {
        let confirm = ConfirmPacket::new(
            message_type,
            mac_key,
            cipher_key,
            &self.hash_chain,
            self.local_sas_verified && self.continuity,
            self.config.cache_expiry_secs,
            self.zero_iv_for_peer(),
        )?;
        Ok(confirm.packet().clone())
    }

    fn log_continuity(&self) {
        if self.continuity {
            info!("Retained secret matched; call continues a prior relationship");
        } else if !self.retained.secrets().is_empty() {
            warn!("Retained secrets held for this peer but none matched; possible MITM");
        }
    }

    fn negotiate_key_agreement(&self, hello: &HelloPacket) -> KeyAgreementType {
        let legacy_ec25 = hello.client_id() == EC25_CAPABLE_LEGACY_CLIENT;
        self.config
            .key_agreements
            .iter()
            .copied()
            .find(|ka| hello.offers(*ka) || (legacy_ec25 && *ka == KeyAgreementType::Ec25))
            .unwrap_or(KeyAgreementType::Dh3k)
    }

    fn initiator_handle_hello(&mut self, packet: HandshakePacket) -> Result<Step> {
        let event = self.accept_hello(packet)?;
        self.state = HandshakeState::ExpectingHelloAck;
        let hello = self.local_hello.packet().clone();
        Ok(Step::send(self.send(hello)).with_event(event))
    }

    fn initiator_handle_hello_ack(&mut self) -> Result<Step> {
        let foreign_hello = self
            .foreign_hello
            .as_ref()
            .ok_or(ZrtpError::Internal("HelloACK before peer Hello"))?;

        let key_agreement = self.negotiate_key_agreement(foreign_hello);
        info!("Negotiated key agreement {}", key_agreement);

        let key_pair = LocalKeyPair::generate(key_agreement);
        let (rs1_id, rs2_id) = self.retained.local_ids();
        let local_dh = DhPacket::new(
            MessageType::DhPart2,
            &self.hash_chain,
            &key_pair,
            rs1_id,
            rs2_id,
        );
        let commit = CommitPacket::new(
            &self.hash_chain,
            foreign_hello.message_bytes(),
            &local_dh,
            &self.zid,
            key_agreement,
        );

        let commit_packet = commit.packet().clone();
        self.key_agreement = Some(key_agreement);
        self.key_pair = Some(key_pair);
        self.local_dh = Some(local_dh);
        self.commit = Some(commit);
        self.state = HandshakeState::ExpectingDh1;
        Ok(Step::send(self.send(commit_packet)))
    }

    fn initiator_handle_dh(&mut self, packet: HandshakePacket) -> Result<Step> {
        let key_agreement = self
            .key_agreement
            .ok_or(ZrtpError::Internal("DHPart1 before key agreement"))?;
        let foreign_dh = DhPacket::from_packet(packet, key_agreement)?;

        let foreign_hello = self
            .foreign_hello
            .as_ref()
            .ok_or(ZrtpError::Internal("DHPart1 before peer Hello"))?;
        let h2 = sha256(foreign_dh.h1());
        foreign_hello.verify_mac(&h2)?;

        let (commit, local_dh, key_pair) = match (&self.commit, &self.local_dh, &self.key_pair) {
            (Some(c), Some(d), Some(k)) => (c, d, k),
            _ => return Err(ZrtpError::Internal("DHPart1 before Commit")),
        };

        let dh_result = calculate_key_agreement(key_pair, foreign_dh.public_value())?;
        let total_hash = calculate_total_hash(foreign_hello, commit, &foreign_dh, local_dh);

        let s1 = self
            .retained
            .get_s1(foreign_dh.rs1_id(), foreign_dh.rs2_id());
        self.continuity = s1.is_some();
        let master_secret =
            MasterSecret::new(&dh_result, &total_hash, &self.zid, &foreign_hello.zid(), s1);
        self.log_continuity();

        let dh_packet = local_dh.packet().clone();
        self.master_secret = Some(master_secret);
        self.foreign_dh = Some(foreign_dh);
        self.state = HandshakeState::ExpectingConfirmOne;
        Ok(Step::send(self.send(dh_packet)))
    }

    fn initiator_handle_confirm(&mut self, packet: HandshakePacket) -> Result<Step> {
        let (responder_mac, responder_zrtp, initiator_mac, initiator_zrtp) = {
            let secret = self
                .master_secret
                .as_ref()
                .ok_or(ZrtpError::Internal("Confirm1 before master secret"))?;
            (
                secret.responder_mac_key().to_vec(),
                secret.responder_zrtp_key().to_vec(),
                secret.initiator_mac_key().to_vec(),
                secret.initiator_zrtp_key().to_vec(),
            )
        };

        self.verify_confirm(packet, &responder_mac, &responder_zrtp)?;
        let confirm = self.build_confirm(MessageType::Confirm2, &initiator_mac, &initiator_zrtp)?;

        self.state = HandshakeState::ExpectingConfirmAck;
        Ok(Step::send(self.send(confirm)))
    }

    fn handle_conf2_ack(&mut self) -> Result<Step> {
        self.state = HandshakeState::HandshakeComplete;
        info!("ZRTP handshake complete ({:?})", self.role);
        Ok(Step::none().with_event(EngineEvent::Complete))
    }

    fn responder_handle_hello(&mut self, packet: HandshakePacket) -> Result<Step> {
        let event = self.accept_hello(packet)?;
        self.state = HandshakeState::ExpectingCommit;
        Ok(Step::send(self.send(hello_ack())).with_event(event))
    }

    fn responder_handle_commit(&mut self, packet: HandshakePacket) -> Result<Step> {
        let commit = CommitPacket::from_packet(packet)?;
        commit.check_algorithms()?;

        let key_agreement = commit.key_agreement()?;
        if !self.config.key_agreements.contains(&key_agreement) {
            return Err(ZrtpError::invalid(format!(
                "Commit chose {} which we did not offer",
                key_agreement
            )));
        }

        let foreign_hello = self
            .foreign_hello
            .as_ref()
            .ok_or(ZrtpError::Internal("Commit before peer Hello"))?;
        if commit.zid() != foreign_hello.zid() {
            return Err(ZrtpError::invalid("Commit ZID differs from Hello ZID"));
        }
        foreign_hello.verify_mac(commit.h2())?;

        let key_pair = LocalKeyPair::generate(key_agreement);
        let (rs1_id, rs2_id) = self.retained.local_ids();
        let local_dh = DhPacket::new(
            MessageType::DhPart1,
            &self.hash_chain,
            &key_pair,
            rs1_id,
            rs2_id,
        );

        let dh_packet = local_dh.packet().clone();
        self.key_agreement = Some(key_agreement);
        self.key_pair = Some(key_pair);
        self.local_dh = Some(local_dh);
        self.commit = Some(commit);
        self.state = HandshakeState::ExpectingDh2;
        Ok(Step::send(self.send(dh_packet)))
    }

    fn responder_handle_dh(&mut self, packet: HandshakePacket) -> Result<Step> {
        let key_agreement = self
            .key_agreement
            .ok_or(ZrtpError::Internal("DHPart2 before Commit"))?;
        let foreign_dh = DhPacket::from_packet(packet, key_agreement)?;

        let (commit, local_dh, key_pair, foreign_hello) = match (
            &self.commit,
            &self.local_dh,
            &self.key_pair,
            &self.foreign_hello,
        ) {
            (Some(c), Some(d), Some(k), Some(h)) => (c, d, k, h),
            _ => return Err(ZrtpError::Internal("DHPart2 before Commit")),
        };

        commit.verify_mac(foreign_dh.h1())?;
        commit.verify_hvi(&foreign_dh, self.local_hello.message_bytes())?;

        let dh_result = calculate_key_agreement(key_pair, foreign_dh.public_value())?;
        let total_hash = calculate_total_hash(&self.local_hello, commit, local_dh, &foreign_dh);

        let s1 = self
            .retained
            .get_s1(foreign_dh.rs1_id(), foreign_dh.rs2_id());
        self.continuity = s1.is_some();
        let master_secret =
            MasterSecret::new(&dh_result, &total_hash, &foreign_hello.zid(), &self.zid, s1);
        self.log_continuity();

        let confirm = self.build_confirm(
            MessageType::Confirm1,
            master_secret.responder_mac_key(),
            master_secret.responder_zrtp_key(),
        )?;

        self.master_secret = Some(master_secret);
        self.foreign_dh = Some(foreign_dh);
        self.state = HandshakeState::ExpectingConfirmTwo;
        Ok(Step::send(self.send(confirm)))
    }

    fn responder_handle_confirm(&mut self, packet: HandshakePacket) -> Result<Step> {
        let (initiator_mac, initiator_zrtp) = {
            let secret = self
                .master_secret
                .as_ref()
                .ok_or(ZrtpError::Internal("Confirm2 before master secret"))?;
            (
                secret.initiator_mac_key().to_vec(),
                secret.initiator_zrtp_key().to_vec(),
            )
        };

        self.verify_confirm(packet, &initiator_mac, &initiator_zrtp)?;

        self.state = HandshakeState::HandshakeComplete;
        info!("ZRTP handshake complete ({:?})", self.role);
        Ok(Step::send(self.send(conf2_ack())).with_event(EngineEvent::Complete))
    }
}

impl std::fmt::Debug for ZrtpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZrtpEngine")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("zid", &self.zid)
            .field("key_agreement", &self.key_agreement)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn make_engine(role: Role, zid_byte: u8, config: HandshakeConfig) -> ZrtpEngine {
        ZrtpEngine::new(role, Zid::from([zid_byte; 12]), config)
    }

    fn make_pair(config: HandshakeConfig) -> (ZrtpEngine, ZrtpEngine) {
        (
            make_engine(Role::Initiator, 1, config.clone()),
            make_engine(Role::Responder, 2, config),
        )
    }

    /// Shuttles datagrams until both sides stop sending. Returns the number delivered.
    fn run(initiator: &mut ZrtpEngine, responder: &mut ZrtpEngine) -> Result<usize> {
        run_with(initiator, responder, |_, datagram| datagram)
    }

    fn run_with(
        initiator: &mut ZrtpEngine,
        responder: &mut ZrtpEngine,
        mut tamper: impl FnMut(usize, Vec<u8>) -> Vec<u8>,
    ) -> Result<usize> {
        let mut to_initiator: VecDeque<Vec<u8>> = responder.start().into_iter().collect();
        let mut to_responder: VecDeque<Vec<u8>> = VecDeque::new();
        let mut delivered = 0;

        loop {
            if let Some(datagram) = to_initiator.pop_front() {
                let datagram = tamper(delivered, datagram);
                delivered += 1;
                if let Some(out) = initiator.handle(&datagram)?.outgoing {
                    to_responder.push_back(out);
                }
            } else if let Some(datagram) = to_responder.pop_front() {
                let datagram = tamper(delivered, datagram);
                delivered += 1;
                if let Some(out) = responder.handle(&datagram)?.outgoing {
                    to_initiator.push_back(out);
                }
            } else {
                return Ok(delivered);
            }
        }
    }

    fn complete(config: HandshakeConfig) -> (HandshakeOutcome, HandshakeOutcome) {
        let (mut initiator, mut responder) = make_pair(config);
        run(&mut initiator, &mut responder).unwrap();
        assert!(initiator.is_complete());
        assert!(responder.is_complete());
        (
            initiator.into_outcome().unwrap(),
            responder.into_outcome().unwrap(),
        )
    }

    #[test]
    fn test_hello_with_other_version_is_rejected() {
        let (mut initiator, mut responder) = make_pair(HandshakeConfig::default());
        let hello = responder.start().unwrap();
        let mut packet = HandshakePacket::parse(&hello).unwrap();
        packet
            .field_mut(crate::zrtp::packet::MESSAGE_BASE + 12, 4)
            .copy_from_slice(b"1.20");
        let datagram = packet.encode(packet.sequence(), packet.ssrc());

        let err = initiator.handle(&datagram).unwrap_err();
        assert!(
            matches!(&err, ZrtpError::InvalidPacket(msg) if msg.contains("1.20")),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_ec25_handshake_agrees_on_keys_and_sas() {
        let (i, r) = complete(HandshakeConfig::default());
        assert_eq!(i.key_agreement, KeyAgreementType::Ec25);
        assert_eq!(i.sas, r.sas);
        assert_eq!(i.sas.len(), 4);
        assert_eq!(
            i.master_secret.initiator_srtp_key(),
            r.master_secret.initiator_srtp_key()
        );
        assert_eq!(
            i.master_secret.responder_srtp_salt(),
            r.master_secret.responder_srtp_salt()
        );
        assert_eq!(i.peer_zid, Zid::from([2u8; 12]));
        assert_eq!(r.peer_zid, Zid::from([1u8; 12]));
        assert!(!i.continuity && !i.had_retained_secrets);
    }

    #[test]
    fn test_dh3k_handshake_exchanges_every_message() {
        let config = HandshakeConfig {
            key_agreements: vec![KeyAgreementType::Dh3k],
            ..Default::default()
        };
        let (mut initiator, mut responder) = make_pair(config);
        let mut seen = Vec::new();
        run_with(&mut initiator, &mut responder, |_, datagram| {
            seen.push(HandshakePacket::parse(&datagram).unwrap().message_type());
            datagram
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![
                MessageType::Hello,
                MessageType::Hello,
                MessageType::HelloAck,
                MessageType::Commit,
                MessageType::DhPart1,
                MessageType::DhPart2,
                MessageType::Confirm1,
                MessageType::Confirm2,
                MessageType::Conf2Ack,
            ]
        );

        let i = initiator.into_outcome().unwrap();
        let r = responder.into_outcome().unwrap();
        assert_eq!(i.key_agreement, KeyAgreementType::Dh3k);
        assert_eq!(
            i.master_secret.initiator_srtp_key(),
            r.master_secret.initiator_srtp_key()
        );
        assert_eq!(i.sas, r.sas);
    }

    #[test]
    fn test_retained_secret_continuity_across_calls() {
        let (first_i, first_r) = complete(HandshakeConfig::default());
        assert_eq!(
            first_i.master_secret.retained_secret(),
            first_r.master_secret.retained_secret()
        );
        let rs1 = first_i.master_secret.retained_secret().to_vec();

        let (mut initiator, mut responder) = make_pair(HandshakeConfig::default());
        initiator.install_retained_secrets(RetainedSecrets::new(Some(rs1.clone()), None), true);
        responder.install_retained_secrets(RetainedSecrets::new(Some(rs1), None), true);
        run(&mut initiator, &mut responder).unwrap();

        let i = initiator.into_outcome().unwrap();
        let r = responder.into_outcome().unwrap();
        assert!(i.continuity && r.continuity);
        assert!(i.peer_sas_verified && r.peer_sas_verified);
        assert_eq!(i.sas, r.sas);
    }

    #[test]
    fn test_mismatched_retained_secret_is_reported() {
        let (mut initiator, mut responder) = make_pair(HandshakeConfig::default());
        initiator.install_retained_secrets(RetainedSecrets::new(Some(vec![1; 32]), None), true);
        responder.install_retained_secrets(RetainedSecrets::new(Some(vec![2; 32]), None), true);
        run(&mut initiator, &mut responder).unwrap();

        let i = initiator.into_outcome().unwrap();
        assert!(i.had_retained_secrets);
        assert!(!i.continuity);
        // Without continuity the verified flag is not asserted to the peer.
        assert!(!i.peer_sas_verified);
    }

    #[test]
    fn test_bit_flip_in_any_message_fails_handshake() {
        for target in 0..9 {
            let (mut initiator, mut responder) = make_pair(HandshakeConfig::default());
            let result = run_with(&mut initiator, &mut responder, |n, mut datagram| {
                if n == target {
                    let last = datagram.len() - 5;
                    datagram[last] ^= 0x04;
                }
                datagram
            });
            assert!(
                matches!(result, Err(ZrtpError::InvalidPacket(_))),
                "corrupting message {target} gave {result:?}"
            );
            assert!(!initiator.is_complete() || !responder.is_complete());
        }
    }

    #[test]
    fn test_forged_mac_with_valid_crc_is_rejected() {
        // Recompute the CRC so only the MAC check can catch the change.
        let (mut initiator, mut responder) = make_pair(HandshakeConfig::default());
        let result = run_with(&mut initiator, &mut responder, |n, datagram| {
            if n != 4 {
                return datagram;
            }
            let packet = HandshakePacket::parse(&datagram).unwrap();
            let mut forged = DhPacket::from_packet(packet, KeyAgreementType::Ec25)
                .unwrap()
                .packet()
                .clone();
            forged.field_mut(crate::zrtp::packet::MESSAGE_BASE + 44, 1)[0] ^= 0xff;
            forged.encode(9, 9)
        });
        assert!(matches!(result, Err(ZrtpError::InvalidPacket(_))));
    }

    #[test]
    fn test_retransmitted_hello_is_ignored() {
        let (mut initiator, mut responder) = make_pair(HandshakeConfig::default());
        let responder_hello = responder.start().unwrap();
        let initiator_hello = initiator.handle(&responder_hello).unwrap().outgoing.unwrap();

        let step = responder.handle(&initiator_hello).unwrap();
        assert!(matches!(step.event, Some(EngineEvent::PeerHello { .. })));
        assert_eq!(responder.state(), HandshakeState::ExpectingCommit);

        let again = responder.handle(&initiator_hello).unwrap();
        assert!(again.outgoing.is_none());
        assert_eq!(responder.state(), HandshakeState::ExpectingCommit);

        // The retransmit timer re-sends HelloACK.
        let resent = responder.retransmit().unwrap();
        assert_eq!(
            HandshakePacket::parse(&resent).unwrap().message_type(),
            MessageType::HelloAck
        );
    }

    #[test]
    fn test_message_illegal_for_role_is_rejected() {
        let mut initiator = make_engine(Role::Initiator, 1, HandshakeConfig::default());
        let mut other = make_engine(Role::Initiator, 3, HandshakeConfig::default());
        let responder_like = make_engine(Role::Responder, 2, HandshakeConfig::default());

        let hello = responder_like.local_hello.packet().encode(1, 1);
        assert!(other.handle(&hello).unwrap().outgoing.is_some());
        let commit = other
            .handle(&hello_ack().encode(2, 2))
            .unwrap()
            .outgoing
            .unwrap();

        assert!(matches!(
            initiator.handle(&commit),
            Err(ZrtpError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_timeout_errors_depend_on_progress() {
        let mut initiator = make_engine(Role::Initiator, 1, HandshakeConfig::default());
        assert!(matches!(
            initiator.timeout_error(),
            ZrtpError::RecipientUnavailable
        ));

        let mut responder = make_engine(Role::Responder, 2, HandshakeConfig::default());
        assert!(matches!(
            responder.timeout_error(),
            ZrtpError::NegotiationFailed(_)
        ));

        let hello = responder.start().unwrap();
        initiator.handle(&hello).unwrap();
        assert!(matches!(
            initiator.timeout_error(),
            ZrtpError::NegotiationFailed(_)
        ));
    }

    #[test]
    fn test_media_packet_completes_initiator_waiting_for_conf2_ack() {
        let (mut initiator, mut responder) = make_pair(HandshakeConfig::default());
        // Drop Conf2ACK (the ninth message).
        let _ = run_with(&mut initiator, &mut responder, |n, datagram| {
            if n == 8 {
                vec![0x80, 0x00, 0x00, 0x01]
            } else {
                datagram
            }
        });
        assert!(responder.is_complete());
        assert!(initiator.is_complete());
    }

    #[test]
    fn test_negotiation_prefers_local_order_among_offers() {
        let initiator_config = HandshakeConfig::default();
        let responder_config = HandshakeConfig {
            key_agreements: vec![KeyAgreementType::Dh3k],
            ..Default::default()
        };
        let mut initiator = make_engine(Role::Initiator, 1, initiator_config);
        let mut responder = make_engine(Role::Responder, 2, responder_config);
        run(&mut initiator, &mut responder).unwrap();
        assert_eq!(
            initiator.into_outcome().unwrap().key_agreement,
            KeyAgreementType::Dh3k
        );
    }

    #[test]
    fn test_legacy_client_id_implies_ec25() {
        let legacy = HandshakeConfig {
            client_id: EC25_CAPABLE_LEGACY_CLIENT.to_string(),
            key_agreements: vec![],
            ..Default::default()
        };
        let mut responder = make_engine(Role::Responder, 2, legacy);
        let initiator = make_engine(Role::Initiator, 1, HandshakeConfig::default());
        let hello = HelloPacket::from_packet(
            HandshakePacket::parse(&responder.start().unwrap()).unwrap(),
        )
        .unwrap();
        assert!(hello.key_agreements().is_empty());
        assert_eq!(
            initiator.negotiate_key_agreement(&hello),
            KeyAgreementType::Ec25
        );
    }

    #[test]
    fn test_zero_iv_requires_opt_in_on_both_sides() {
        let opted_in = HandshakeConfig {
            legacy_zero_iv_client_ids: vec!["RedPhone 024".to_string()],
            ..Default::default()
        };
        let (mut initiator, mut responder) = make_pair(opted_in.clone());
        run(&mut initiator, &mut responder).unwrap();
        assert!(initiator.is_complete() && responder.is_complete());

        // Only the initiator treats its peer as legacy; the responder refuses the zero IV.
        let mut initiator = make_engine(Role::Initiator, 1, opted_in);
        let mut responder = make_engine(Role::Responder, 2, HandshakeConfig::default());
        let err = run(&mut initiator, &mut responder).unwrap_err();
        assert!(err.to_string().contains("zero IV"));
    }

    #[test]
    fn test_own_zid_is_rejected() {
        let mut initiator = make_engine(Role::Initiator, 7, HandshakeConfig::default());
        let mut responder = make_engine(Role::Responder, 7, HandshakeConfig::default());
        let hello = responder.start().unwrap();
        assert!(initiator.handle(&hello).is_err());
    }

    #[test]
    fn test_client_id_is_padded() {
        let config = HandshakeConfig::default();
        assert_eq!(&config.client_id_bytes(), b"RedPhone 024    ");
    }
}
