use super::{HandshakePacket, MAC_LENGTH, MESSAGE_BASE, MessageType};
use crate::types::Zid;
use crate::zrtp::error::{Result, ZrtpError};
use crate::zrtp::hash_chain::HashChain;
use crate::zrtp::key_agreement::KeyAgreementType;

pub const VERSION: &[u8; 4] = b"1.10";
pub const CLIENT_ID_LENGTH: usize = 16;

const VERSION_OFFSET: usize = MESSAGE_BASE + 12;
const CLIENT_ID_OFFSET: usize = MESSAGE_BASE + 16;
const H3_OFFSET: usize = MESSAGE_BASE + 32;
const ZID_OFFSET: usize = MESSAGE_BASE + 64;
const FLAGS_OFFSET: usize = MESSAGE_BASE + 76;
const ALGORITHMS_OFFSET: usize = MESSAGE_BASE + 80;
const BASE_LENGTH: usize = 88;
const MAX_ALGORITHMS_PER_KIND: usize = 7;

/// Algorithm block counts from the flags word, in wire order.
#[derive(Debug, Clone, Copy, Default)]
struct AlgorithmCounts {
    hash: usize,
    cipher: usize,
    auth: usize,
    key_agreement: usize,
    sas: usize,
}

impl AlgorithmCounts {
    fn from_flags(flags: u32) -> Self {
        let nibble = |shift: u32| ((flags >> shift) & 0x0f) as usize;
        Self {
            hash: nibble(16),
            cipher: nibble(12),
            auth: nibble(8),
            key_agreement: nibble(4),
            sas: nibble(0),
        }
    }

    fn to_flags(self) -> u32 {
        ((self.hash as u32) << 16)
            | ((self.cipher as u32) << 12)
            | ((self.auth as u32) << 8)
            | ((self.key_agreement as u32) << 4)
            | self.sas as u32
    }

    fn total(&self) -> usize {
        self.hash + self.cipher + self.auth + self.key_agreement + self.sas
    }
}

/// Hello: version, client id, H3 commitment, ZID and the offered key agreements.
/// MAC keyed by H2.
#[derive(Debug, Clone)]
pub struct HelloPacket {
    packet: HandshakePacket,
    counts: AlgorithmCounts,
}

impl HelloPacket {
    pub fn new(
        hash_chain: &HashChain,
        zid: &Zid,
        client_id: &[u8; CLIENT_ID_LENGTH],
        key_agreements: &[KeyAgreementType],
    ) -> Self {
        let counts = AlgorithmCounts {
            key_agreement: key_agreements.len().min(MAX_ALGORITHMS_PER_KIND),
            ..Default::default()
        };
        let message_length = BASE_LENGTH + 4 * counts.total();
        let mut packet = HandshakePacket::new(MessageType::Hello, message_length);

        packet.field_mut(VERSION_OFFSET, 4).copy_from_slice(VERSION);
        packet
            .field_mut(CLIENT_ID_OFFSET, CLIENT_ID_LENGTH)
            .copy_from_slice(client_id);
        packet.field_mut(H3_OFFSET, 32).copy_from_slice(hash_chain.h3());
        packet.field_mut(ZID_OFFSET, Zid::LENGTH).copy_from_slice(zid.as_bytes());
        packet.write_u32_at(FLAGS_OFFSET, counts.to_flags());

        for (i, ka) in key_agreements.iter().take(counts.key_agreement).enumerate() {
            packet
                .field_mut(ALGORITHMS_OFFSET + 4 * i, 4)
                .copy_from_slice(ka.tag());
        }

        let mut hello = Self { packet, counts };
        let mac_offset = hello.mac_offset();
        hello
            .packet
            .set_mac(hash_chain.h2(), mac_offset, mac_offset - MESSAGE_BASE);
        hello
    }

    pub fn from_packet(packet: HandshakePacket) -> Result<Self> {
        packet.require_type(&[MessageType::Hello])?;
        packet.require_message_length(BASE_LENGTH)?;

        let counts = AlgorithmCounts::from_flags(packet.read_u32_at(FLAGS_OFFSET));
        packet.require_message_length(BASE_LENGTH + 4 * counts.total())?;

        Ok(Self { packet, counts })
    }

    fn mac_offset(&self) -> usize {
        ALGORITHMS_OFFSET + 4 * self.counts.total()
    }

    pub fn packet(&self) -> &HandshakePacket {
        &self.packet
    }

    pub fn message_bytes(&self) -> &[u8] {
        self.packet.message_bytes()
    }

    pub fn version(&self) -> &[u8] {
        self.packet.field(VERSION_OFFSET, 4)
    }

    pub fn has_supported_version(&self) -> bool {
        self.version() == VERSION
    }

    /// The peer's client id, e.g. `"RedPhone 019    "`.
    pub fn client_id(&self) -> String {
        String::from_utf8_lossy(self.packet.field(CLIENT_ID_OFFSET, CLIENT_ID_LENGTH)).into_owned()
    }

    pub fn h3(&self) -> &[u8] {
        self.packet.field(H3_OFFSET, 32)
    }

    pub fn zid(&self) -> Zid {
        let mut zid = [0u8; Zid::LENGTH];
        zid.copy_from_slice(self.packet.field(ZID_OFFSET, Zid::LENGTH));
        Zid::from(zid)
    }

    /// Raw 4-byte key agreement tags in the order the sender listed them.
    pub fn key_agreement_tags(&self) -> Vec<[u8; 4]> {
        let start = ALGORITHMS_OFFSET + 4 * (self.counts.hash + self.counts.cipher + self.counts.auth);
        (0..self.counts.key_agreement)
            .map(|i| {
                let mut tag = [0u8; 4];
                tag.copy_from_slice(self.packet.field(start + 4 * i, 4));
                tag
            })
            .collect()
    }

    pub fn key_agreements(&self) -> Vec<KeyAgreementType> {
        self.key_agreement_tags()
            .iter()
            .filter_map(|tag| KeyAgreementType::from_tag(tag))
            .collect()
    }

    pub fn offers(&self, ka: KeyAgreementType) -> bool {
        self.key_agreements().contains(&ka)
    }

    /// Verifies the MAC with the H2 disclosed later by Commit or DHPart1.
    pub fn verify_mac(&self, h2: &[u8]) -> Result<()> {
        let mac_offset = self.mac_offset();
        if mac_offset + MAC_LENGTH > MESSAGE_BASE + self.packet.message_length() {
            return Err(ZrtpError::invalid("Hello MAC outside message"));
        }
        self.packet
            .verify_mac(h2, mac_offset, mac_offset - MESSAGE_BASE, self.h3())
    }
}
