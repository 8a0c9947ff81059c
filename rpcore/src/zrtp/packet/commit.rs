use super::{DhPacket, HandshakePacket, MESSAGE_BASE, MessageType};
use crate::crypto::{ct_eq, sha256_parts};
use crate::types::Zid;
use crate::zrtp::error::{Result, ZrtpError};
use crate::zrtp::hash_chain::HashChain;
use crate::zrtp::key_agreement::KeyAgreementType;

const H2_OFFSET: usize = MESSAGE_BASE + 12;
const ZID_OFFSET: usize = MESSAGE_BASE + 44;
const HASH_OFFSET: usize = MESSAGE_BASE + 56;
const CIPHER_OFFSET: usize = MESSAGE_BASE + 60;
const AUTH_OFFSET: usize = MESSAGE_BASE + 64;
const KEY_AGREEMENT_OFFSET: usize = MESSAGE_BASE + 68;
const SAS_OFFSET: usize = MESSAGE_BASE + 72;
const HVI_OFFSET: usize = MESSAGE_BASE + 76;
const MAC_OFFSET: usize = MESSAGE_BASE + 108;
const COMMIT_LENGTH: usize = 116;

const HASH_TYPE: &[u8; 4] = b"S256";
const CIPHER_TYPE: &[u8; 4] = b"AES1";
const AUTH_TYPE: &[u8; 4] = b"HS80";
const SAS_TYPE: &[u8; 4] = b"B32 ";

/// Commit: the initiator's H2, its ZID, the negotiated algorithms and
/// `hvi = SHA256(DHPart2 || responder Hello)`. MAC keyed by H1.
#[derive(Debug, Clone)]
pub struct CommitPacket {
    packet: HandshakePacket,
}

impl CommitPacket {
    pub fn new(
        hash_chain: &HashChain,
        foreign_hello: &[u8],
        dh_part_two: &DhPacket,
        zid: &Zid,
        key_agreement: KeyAgreementType,
    ) -> Self {
        let mut packet = HandshakePacket::new(MessageType::Commit, COMMIT_LENGTH);
        packet.field_mut(H2_OFFSET, 32).copy_from_slice(hash_chain.h2());
        packet.field_mut(ZID_OFFSET, Zid::LENGTH).copy_from_slice(zid.as_bytes());
        packet.field_mut(HASH_OFFSET, 4).copy_from_slice(HASH_TYPE);
        packet.field_mut(CIPHER_OFFSET, 4).copy_from_slice(CIPHER_TYPE);
        packet.field_mut(AUTH_OFFSET, 4).copy_from_slice(AUTH_TYPE);
        packet
            .field_mut(KEY_AGREEMENT_OFFSET, 4)
            .copy_from_slice(key_agreement.tag());
        packet.field_mut(SAS_OFFSET, 4).copy_from_slice(SAS_TYPE);

        let hvi = calculate_hvi(dh_part_two.message_bytes(), foreign_hello);
        packet.field_mut(HVI_OFFSET, 32).copy_from_slice(&hvi);
        packet.set_mac(hash_chain.h1(), MAC_OFFSET, MAC_OFFSET - MESSAGE_BASE);

        Self { packet }
    }

    pub fn from_packet(packet: HandshakePacket) -> Result<Self> {
        packet.require_type(&[MessageType::Commit])?;
        packet.require_message_length(COMMIT_LENGTH)?;
        Ok(Self { packet })
    }

    pub fn packet(&self) -> &HandshakePacket {
        &self.packet
    }

    pub fn message_bytes(&self) -> &[u8] {
        self.packet.message_bytes()
    }

    pub fn h2(&self) -> &[u8] {
        self.packet.field(H2_OFFSET, 32)
    }

    pub fn zid(&self) -> Zid {
        let mut zid = [0u8; Zid::LENGTH];
        zid.copy_from_slice(self.packet.field(ZID_OFFSET, Zid::LENGTH));
        Zid::from(zid)
    }

    pub fn key_agreement(&self) -> Result<KeyAgreementType> {
        let tag = self.packet.field(KEY_AGREEMENT_OFFSET, 4);
        KeyAgreementType::from_tag(tag).ok_or_else(|| {
            ZrtpError::UnsupportedKeyAgreement(String::from_utf8_lossy(tag).into_owned())
        })
    }

    /// Only the single algorithm suite we implement is accepted.
    pub fn check_algorithms(&self) -> Result<()> {
        let expected = [
            (HASH_OFFSET, HASH_TYPE),
            (CIPHER_OFFSET, CIPHER_TYPE),
            (AUTH_OFFSET, AUTH_TYPE),
            (SAS_OFFSET, SAS_TYPE),
        ];
        for (offset, value) in expected {
            if self.packet.field(offset, 4) != value {
                return Err(ZrtpError::invalid(format!(
                    "Commit names unsupported algorithm {:?}",
                    String::from_utf8_lossy(self.packet.field(offset, 4))
                )));
            }
        }
        Ok(())
    }

    pub fn hvi(&self) -> &[u8] {
        self.packet.field(HVI_OFFSET, 32)
    }

    /// Verifies the MAC with the H1 disclosed in DHPart2.
    pub fn verify_mac(&self, h1: &[u8]) -> Result<()> {
        self.packet
            .verify_mac(h1, MAC_OFFSET, MAC_OFFSET - MESSAGE_BASE, self.h2())
    }

    /// Checks that the received DHPart2 is the one this Commit bound to.
    pub fn verify_hvi(&self, dh_part_two: &DhPacket, local_hello: &[u8]) -> Result<()> {
        let hvi = calculate_hvi(dh_part_two.message_bytes(), local_hello);
        if !ct_eq(&hvi, self.hvi()) {
            return Err(ZrtpError::invalid("DHPart2 does not match Commit hvi"));
        }
        Ok(())
    }
}

fn calculate_hvi(dh_part_two: &[u8], responder_hello: &[u8]) -> [u8; 32] {
    sha256_parts(&[dh_part_two, responder_hello])
}
