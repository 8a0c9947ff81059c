use super::{HandshakePacket, MAC_LENGTH, MESSAGE_BASE, MessageType};
use crate::crypto::{aes_128_cfb_decrypt, aes_128_cfb_encrypt, ct_eq, hmac_sha256};
use crate::zrtp::error::{Result, ZrtpError};
use crate::zrtp::hash_chain::HashChain;
use rand::RngCore;

const CONFIRM_MAC_OFFSET: usize = MESSAGE_BASE + 12;
const IV_OFFSET: usize = MESSAGE_BASE + 20;
const IV_LENGTH: usize = 16;
const PREIMAGE_OFFSET: usize = MESSAGE_BASE + 36;
const FLAGS_OFFSET: usize = MESSAGE_BASE + 68;
const CACHE_EXPIRY_OFFSET: usize = MESSAGE_BASE + 72;
const ENCRYPTED_LENGTH: usize = 40;
const CONFIRM_LENGTH: usize = 76;

const FLAG_SAS_VERIFIED: u32 = 0x04;

/// Confirm1/Confirm2.
///
/// `H0 | flags | cache expiry` is encrypted with AES-128-CFB under the
/// sender's ZRTP key, and the confirm MAC covers that ciphertext.
#[derive(Debug, Clone)]
pub struct ConfirmPacket {
    packet: HandshakePacket,
}

/// The decrypted and authenticated body of a Confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmContents {
    pub preimage: [u8; 32],
    pub sas_verified: bool,
    pub cache_expiry: u32,
}

impl ConfirmPacket {
    /// `zero_iv` reproduces the historical RedPhone encoding that sent an all-zero IV.
    pub fn new(
        message_type: MessageType,
        mac_key: &[u8],
        cipher_key: &[u8],
        hash_chain: &HashChain,
        sas_verified: bool,
        cache_expiry: u32,
        zero_iv: bool,
    ) -> Result<Self> {
        debug_assert!(matches!(
            message_type,
            MessageType::Confirm1 | MessageType::Confirm2
        ));
        let mut packet = HandshakePacket::new(message_type, CONFIRM_LENGTH);

        if !zero_iv {
            rand::rng().fill_bytes(packet.field_mut(IV_OFFSET, IV_LENGTH));
        }
        packet
            .field_mut(PREIMAGE_OFFSET, 32)
            .copy_from_slice(hash_chain.h0());
        packet.write_u32_at(
            FLAGS_OFFSET,
            if sas_verified { FLAG_SAS_VERIFIED } else { 0 },
        );
        packet.write_u32_at(CACHE_EXPIRY_OFFSET, cache_expiry);

        let iv = packet.field(IV_OFFSET, IV_LENGTH).to_vec();
        aes_128_cfb_encrypt(
            cipher_key,
            &iv,
            packet.field_mut(PREIMAGE_OFFSET, ENCRYPTED_LENGTH),
        )
        .map_err(|_| ZrtpError::Internal("ZRTP key has the wrong length"))?;

        let mac = hmac_sha256(mac_key, &[packet.field(PREIMAGE_OFFSET, ENCRYPTED_LENGTH)]);
        packet
            .field_mut(CONFIRM_MAC_OFFSET, MAC_LENGTH)
            .copy_from_slice(&mac[..MAC_LENGTH]);

        Ok(Self { packet })
    }

    pub fn from_packet(packet: HandshakePacket) -> Result<Self> {
        packet.require_type(&[MessageType::Confirm1, MessageType::Confirm2])?;
        packet.require_message_length(CONFIRM_LENGTH)?;
        Ok(Self { packet })
    }

    pub fn packet(&self) -> &HandshakePacket {
        &self.packet
    }

    pub fn has_zero_iv(&self) -> bool {
        self.packet.field(IV_OFFSET, IV_LENGTH).iter().all(|b| *b == 0)
    }

    /// Authenticates the ciphertext, then decrypts it.
    pub fn open(&self, mac_key: &[u8], cipher_key: &[u8]) -> Result<ConfirmContents> {
        let ciphertext = self.packet.field(PREIMAGE_OFFSET, ENCRYPTED_LENGTH);
        let mac = hmac_sha256(mac_key, &[ciphertext]);
        if !ct_eq(
            &mac[..MAC_LENGTH],
            self.packet.field(CONFIRM_MAC_OFFSET, MAC_LENGTH),
        ) {
            return Err(ZrtpError::invalid(format!(
                "bad {} confirm MAC",
                self.packet.message_type()
            )));
        }

        let mut plaintext = [0u8; ENCRYPTED_LENGTH];
        plaintext.copy_from_slice(ciphertext);
        aes_128_cfb_decrypt(
            cipher_key,
            self.packet.field(IV_OFFSET, IV_LENGTH),
            &mut plaintext,
        )
        .map_err(|_| ZrtpError::Internal("ZRTP key has the wrong length"))?;

        let mut preimage = [0u8; 32];
        preimage.copy_from_slice(&plaintext[..32]);
        let flags = u32::from_be_bytes([plaintext[32], plaintext[33], plaintext[34], plaintext[35]]);
        let cache_expiry =
            u32::from_be_bytes([plaintext[36], plaintext[37], plaintext[38], plaintext[39]]);

        Ok(ConfirmContents {
            preimage,
            sas_verified: flags & FLAG_SAS_VERIFIED != 0,
            cache_expiry,
        })
    }
}
