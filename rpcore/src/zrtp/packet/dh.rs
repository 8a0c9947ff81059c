use super::{HandshakePacket, MESSAGE_BASE, MessageType};
use crate::zrtp::error::{Result, ZrtpError};
use crate::zrtp::hash_chain::HashChain;
use crate::zrtp::key_agreement::{KeyAgreementType, LocalKeyPair};
use rand::RngCore;

pub const SECRET_ID_LENGTH: usize = 8;

const H1_OFFSET: usize = MESSAGE_BASE + 12;
const RS1_ID_OFFSET: usize = MESSAGE_BASE + 44;
const RS2_ID_OFFSET: usize = MESSAGE_BASE + 52;
const AUX_ID_OFFSET: usize = MESSAGE_BASE + 60;
const PBX_ID_OFFSET: usize = MESSAGE_BASE + 68;
const PV_OFFSET: usize = MESSAGE_BASE + 76;
const BASE_LENGTH: usize = 84;

/// DHPart1 (responder) or DHPart2 (initiator).
///
/// Carries H1, the retained secret identifiers and the public value. The MAC
/// is keyed by H0, which is only disclosed inside the sender's Confirm.
#[derive(Debug, Clone)]
pub struct DhPacket {
    packet: HandshakePacket,
    key_agreement: KeyAgreementType,
}

impl DhPacket {
    pub fn new(
        message_type: MessageType,
        hash_chain: &HashChain,
        key_pair: &LocalKeyPair,
        rs1_id: [u8; SECRET_ID_LENGTH],
        rs2_id: [u8; SECRET_ID_LENGTH],
    ) -> Self {
        debug_assert!(matches!(
            message_type,
            MessageType::DhPart1 | MessageType::DhPart2
        ));
        let key_agreement = key_pair.key_agreement_type();
        let public_value = key_pair.public_value();

        let mut packet = HandshakePacket::new(message_type, BASE_LENGTH + public_value.len());
        packet.field_mut(H1_OFFSET, 32).copy_from_slice(hash_chain.h1());
        packet
            .field_mut(RS1_ID_OFFSET, SECRET_ID_LENGTH)
            .copy_from_slice(&rs1_id);
        packet
            .field_mut(RS2_ID_OFFSET, SECRET_ID_LENGTH)
            .copy_from_slice(&rs2_id);

        // No auxiliary or PBX secrets are ever shared, so these never match.
        let mut rng = rand::rng();
        rng.fill_bytes(packet.field_mut(AUX_ID_OFFSET, SECRET_ID_LENGTH));
        rng.fill_bytes(packet.field_mut(PBX_ID_OFFSET, SECRET_ID_LENGTH));

        packet
            .field_mut(PV_OFFSET, public_value.len())
            .copy_from_slice(&public_value);

        let mac_offset = PV_OFFSET + public_value.len();
        packet.set_mac(hash_chain.h0(), mac_offset, mac_offset - MESSAGE_BASE);

        Self {
            packet,
            key_agreement,
        }
    }

    /// Interprets a received DHPart1/DHPart2 under the negotiated key agreement.
    pub fn from_packet(packet: HandshakePacket, key_agreement: KeyAgreementType) -> Result<Self> {
        packet.require_type(&[MessageType::DhPart1, MessageType::DhPart2])?;
        packet.require_message_length(BASE_LENGTH + key_agreement.public_value_length())?;
        Ok(Self {
            packet,
            key_agreement,
        })
    }

    fn mac_offset(&self) -> usize {
        PV_OFFSET + self.key_agreement.public_value_length()
    }

    pub fn packet(&self) -> &HandshakePacket {
        &self.packet
    }

    pub fn message_bytes(&self) -> &[u8] {
        self.packet.message_bytes()
    }

    pub fn key_agreement(&self) -> KeyAgreementType {
        self.key_agreement
    }

    pub fn h1(&self) -> &[u8] {
        self.packet.field(H1_OFFSET, 32)
    }

    pub fn rs1_id(&self) -> &[u8] {
        self.packet.field(RS1_ID_OFFSET, SECRET_ID_LENGTH)
    }

    pub fn rs2_id(&self) -> &[u8] {
        self.packet.field(RS2_ID_OFFSET, SECRET_ID_LENGTH)
    }

    pub fn public_value(&self) -> &[u8] {
        self.packet
            .field(PV_OFFSET, self.key_agreement.public_value_length())
    }

    /// Verifies the MAC with the sender's H0, recovered from its Confirm.
    pub fn verify_mac(&self, h0: &[u8]) -> Result<()> {
        let mac_offset = self.mac_offset();
        self.packet
            .verify_mac(h0, mac_offset, mac_offset - MESSAGE_BASE, self.h1())
            .map_err(|e| match e {
                ZrtpError::InvalidPacket(msg) => {
                    ZrtpError::InvalidPacket(format!("{msg} (peer hash chain mismatch)"))
                }
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(ka: KeyAgreementType) {
        let chain = HashChain::generate();
        let keys = LocalKeyPair::generate(ka);
        let pv = keys.public_value();
        let dh = DhPacket::new(MessageType::DhPart1, &chain, &keys, [0xaa; 8], [0xbb; 8]);

        let wire = dh.packet().encode(2, 2);
        let expected_length = match ka {
            KeyAgreementType::Dh3k => 468,
            KeyAgreementType::Ec25 => 148,
        };
        assert_eq!(wire.len(), expected_length + 16);

        let parsed = DhPacket::from_packet(HandshakePacket::parse(&wire).unwrap(), ka).unwrap();
        assert_eq!(parsed.h1(), chain.h1());
        assert_eq!(parsed.rs1_id(), &[0xaa; 8]);
        assert_eq!(parsed.rs2_id(), &[0xbb; 8]);
        assert_eq!(parsed.public_value(), pv.as_slice());
        parsed.verify_mac(chain.h0()).unwrap();
        assert!(parsed.verify_mac(chain.h1()).is_err());
    }

    #[test]
    fn test_dh3k_packet_fields() {
        round_trip(KeyAgreementType::Dh3k);
    }

    #[test]
    fn test_ec25_packet_fields() {
        round_trip(KeyAgreementType::Ec25);
    }

    #[test]
    fn test_short_packet_for_negotiated_type_is_rejected() {
        let chain = HashChain::generate();
        let keys = LocalKeyPair::generate(KeyAgreementType::Ec25);
        let dh = DhPacket::new(MessageType::DhPart2, &chain, &keys, [0; 8], [0; 8]);
        assert!(DhPacket::from_packet(dh.packet().clone(), KeyAgreementType::Dh3k).is_err());
    }
}
