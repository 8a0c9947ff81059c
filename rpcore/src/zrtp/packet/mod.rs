//! ZRTP wire framing.
//!
//! Every datagram is `header(12) | message | crc(4)`. The header carries the
//! 0x10 prefix, a sequence number, the `ZRTP` magic cookie and the SSRC. The
//! message starts at [`MESSAGE_BASE`] with the 0x505a preamble, a length in
//! 32-bit words and an 8-byte ASCII type. Typed packets define their field
//! offsets as absolute positions in the datagram.

mod ack;
mod commit;
mod confirm;
mod dh;
mod hello;

pub use ack::{conf2_ack, hello_ack};
pub use commit::CommitPacket;
pub use confirm::{ConfirmContents, ConfirmPacket};
pub use dh::{DhPacket, SECRET_ID_LENGTH};
pub use hello::{CLIENT_ID_LENGTH, HelloPacket};

use crate::crypto::{ct_eq, hmac_sha256, sha256};
use crate::zrtp::error::{Result, ZrtpError};

pub const MESSAGE_BASE: usize = 12;
pub const MAC_LENGTH: usize = 8;

const PREFIX_OFFSET: usize = 0;
const PREFIX_VALUE: u8 = 0x10;
const SEQUENCE_OFFSET: usize = 2;
const COOKIE_OFFSET: usize = 4;
const COOKIE_VALUE: u32 = 0x5a52_5450;
const SSRC_OFFSET: usize = 8;

const PREAMBLE_OFFSET: usize = MESSAGE_BASE;
const PREAMBLE_VALUE: u16 = 0x505a;
const LENGTH_OFFSET: usize = MESSAGE_BASE + 2;
const TYPE_OFFSET: usize = MESSAGE_BASE + 4;
const TYPE_LENGTH: usize = 8;

const CRC_LENGTH: usize = 4;
const HEADERS_AND_FOOTER_LENGTH: usize = MESSAGE_BASE + CRC_LENGTH;
const MIN_MESSAGE_LENGTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    HelloAck,
    Commit,
    DhPart1,
    DhPart2,
    Confirm1,
    Confirm2,
    Conf2Ack,
}

impl MessageType {
    pub fn as_bytes(&self) -> &'static [u8; TYPE_LENGTH] {
        match self {
            MessageType::Hello => b"Hello   ",
            MessageType::HelloAck => b"HelloACK",
            MessageType::Commit => b"Commit  ",
            MessageType::DhPart1 => b"DHPart1 ",
            MessageType::DhPart2 => b"DHPart2 ",
            MessageType::Confirm1 => b"Confirm1",
            MessageType::Confirm2 => b"Confirm2",
            MessageType::Conf2Ack => b"Conf2ACK",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        [
            MessageType::Hello,
            MessageType::HelloAck,
            MessageType::Commit,
            MessageType::DhPart1,
            MessageType::DhPart2,
            MessageType::Confirm1,
            MessageType::Confirm2,
            MessageType::Conf2Ack,
        ]
        .into_iter()
        .find(|t| t.as_bytes().as_slice() == bytes)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(String::from_utf8_lossy(self.as_bytes()).trim_end())
    }
}

/// Returns true if the datagram carries the ZRTP prefix and magic cookie.
///
/// Anything else arriving on the media port is SRTP.
pub fn is_zrtp_datagram(datagram: &[u8]) -> bool {
    datagram.len() >= SSRC_OFFSET
        && datagram[PREFIX_OFFSET] == PREFIX_VALUE
        && read_u32(datagram, COOKIE_OFFSET) == COOKIE_VALUE
}

/// An owned, explicitly sized ZRTP datagram.
#[derive(Clone)]
pub struct HandshakePacket {
    data: Vec<u8>,
    message_type: MessageType,
}

impl HandshakePacket {
    /// Allocates a zero-filled packet whose message section is `message_length` bytes.
    pub fn new(message_type: MessageType, message_length: usize) -> Self {
        debug_assert!(message_length % 4 == 0 && message_length >= MIN_MESSAGE_LENGTH);

        let mut data = vec![0u8; message_length + HEADERS_AND_FOOTER_LENGTH];
        data[PREFIX_OFFSET] = PREFIX_VALUE;
        write_u32(&mut data, COOKIE_OFFSET, COOKIE_VALUE);
        write_u16(&mut data, PREAMBLE_OFFSET, PREAMBLE_VALUE);
        write_u16(&mut data, LENGTH_OFFSET, (message_length / 4) as u16);
        data[TYPE_OFFSET..TYPE_OFFSET + TYPE_LENGTH].copy_from_slice(message_type.as_bytes());

        Self { data, message_type }
    }

    /// Validates an inbound datagram.
    ///
    /// Header bounds and the CRC are checked before any field is read, and the
    /// declared message length must fit inside the datagram.
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        if datagram.len() < MIN_MESSAGE_LENGTH + HEADERS_AND_FOOTER_LENGTH {
            return Err(ZrtpError::invalid("packet shorter than ZRTP headers"));
        }
        if !is_zrtp_datagram(datagram) {
            return Err(ZrtpError::invalid("missing ZRTP prefix or cookie"));
        }

        let crc_offset = datagram.len() - CRC_LENGTH;
        if crc32fast::hash(&datagram[..crc_offset]) != read_u32(datagram, crc_offset) {
            return Err(ZrtpError::invalid("bad CRC"));
        }

        if read_u16(datagram, PREAMBLE_OFFSET) != PREAMBLE_VALUE {
            return Err(ZrtpError::invalid("bad message preamble"));
        }

        let message_length = read_u16(datagram, LENGTH_OFFSET) as usize * 4;
        if message_length < MIN_MESSAGE_LENGTH {
            return Err(ZrtpError::invalid("declared length shorter than message header"));
        }
        if MESSAGE_BASE + message_length + CRC_LENGTH > datagram.len() {
            return Err(ZrtpError::invalid(
                "declared length longer than length of packet",
            ));
        }

        let type_bytes = &datagram[TYPE_OFFSET..TYPE_OFFSET + TYPE_LENGTH];
        let message_type = MessageType::from_bytes(type_bytes).ok_or_else(|| {
            ZrtpError::invalid(format!(
                "unknown message type {:?}",
                String::from_utf8_lossy(type_bytes)
            ))
        })?;

        Ok(Self {
            data: datagram.to_vec(),
            message_type,
        })
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn message_length(&self) -> usize {
        read_u16(&self.data, LENGTH_OFFSET) as usize * 4
    }

    /// The canonical message encoding, used for Commit's hvi and the total hash.
    pub fn message_bytes(&self) -> &[u8] {
        &self.data[MESSAGE_BASE..MESSAGE_BASE + self.message_length()]
    }

    pub fn sequence(&self) -> u16 {
        read_u16(&self.data, SEQUENCE_OFFSET)
    }

    pub fn ssrc(&self) -> u32 {
        read_u32(&self.data, SSRC_OFFSET)
    }

    /// Frames the packet for the wire with the given sequence number and SSRC.
    pub fn encode(&self, sequence: u16, ssrc: u32) -> Vec<u8> {
        let mut out = self.data.clone();
        write_u16(&mut out, SEQUENCE_OFFSET, sequence);
        write_u32(&mut out, SSRC_OFFSET, ssrc);
        let crc_offset = out.len() - CRC_LENGTH;
        let crc = crc32fast::hash(&out[..crc_offset]);
        write_u32(&mut out, crc_offset, crc);
        out
    }

    pub fn verify_crc(&self) -> bool {
        let crc_offset = self.data.len() - CRC_LENGTH;
        crc32fast::hash(&self.data[..crc_offset]) == read_u32(&self.data, crc_offset)
    }

    pub(crate) fn require_message_length(&self, minimum: usize) -> Result<()> {
        if self.message_length() < minimum {
            return Err(ZrtpError::invalid(format!(
                "{} message too short: {} < {}",
                self.message_type,
                self.message_length(),
                minimum
            )));
        }
        Ok(())
    }

    pub(crate) fn require_type(&self, expected: &[MessageType]) -> Result<()> {
        if !expected.contains(&self.message_type) {
            return Err(ZrtpError::invalid(format!(
                "expected {:?}, got {}",
                expected, self.message_type
            )));
        }
        Ok(())
    }

    pub(crate) fn field(&self, offset: usize, length: usize) -> &[u8] {
        &self.data[offset..offset + length]
    }

    pub(crate) fn field_mut(&mut self, offset: usize, length: usize) -> &mut [u8] {
        &mut self.data[offset..offset + length]
    }

    pub(crate) fn read_u32_at(&self, offset: usize) -> u32 {
        read_u32(&self.data, offset)
    }

    pub(crate) fn write_u32_at(&mut self, offset: usize, value: u32) {
        write_u32(&mut self.data, offset, value);
    }

    fn calculate_mac(&self, key: &[u8], covered_length: usize) -> [u8; 32] {
        hmac_sha256(key, &[&self.data[MESSAGE_BASE..MESSAGE_BASE + covered_length]])
    }

    /// Writes the truncated HMAC of `[MESSAGE_BASE, MESSAGE_BASE + covered_length)` at `mac_offset`.
    pub(crate) fn set_mac(&mut self, key: &[u8], mac_offset: usize, covered_length: usize) {
        let digest = self.calculate_mac(key, covered_length);
        self.data[mac_offset..mac_offset + MAC_LENGTH].copy_from_slice(&digest[..MAC_LENGTH]);
    }

    /// Checks the truncated HMAC and that `key` is the pre-image of `committed_hash`.
    pub(crate) fn verify_mac(
        &self,
        key: &[u8],
        mac_offset: usize,
        covered_length: usize,
        committed_hash: &[u8],
    ) -> Result<()> {
        let digest = self.calculate_mac(key, covered_length);
        if !ct_eq(&digest[..MAC_LENGTH], self.field(mac_offset, MAC_LENGTH)) {
            return Err(ZrtpError::invalid(format!("bad {} MAC", self.message_type)));
        }
        if !ct_eq(&sha256(key), committed_hash) {
            return Err(ZrtpError::invalid(format!(
                "{} MAC key is not the pre-image of its commitment",
                self.message_type
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandshakePacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakePacket")
            .field("type", &self.message_type)
            .field("message_length", &self.message_length())
            .finish()
    }
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}
