mod dh3k;
mod ec25;

pub use dh3k::Dh3kKeyPair;
pub use ec25::Ec25KeyPair;

use crate::crypto::sha256_parts;
use crate::zrtp::error::Result;
use crate::zrtp::packet::{CommitPacket, DhPacket, HelloPacket};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAgreementType {
    /// 3072-bit MODP group (RFC 3526).
    Dh3k,
    /// NIST P-256 ECDH.
    Ec25,
}

impl KeyAgreementType {
    pub fn tag(&self) -> &'static [u8; 4] {
        match self {
            KeyAgreementType::Dh3k => b"DH3k",
            KeyAgreementType::Ec25 => b"EC25",
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"DH3k" | b"DH3K" => Some(KeyAgreementType::Dh3k),
            b"EC25" => Some(KeyAgreementType::Ec25),
            _ => None,
        }
    }

    pub fn public_value_length(&self) -> usize {
        match self {
            KeyAgreementType::Dh3k => dh3k::PUBLIC_VALUE_LENGTH,
            KeyAgreementType::Ec25 => ec25::PUBLIC_VALUE_LENGTH,
        }
    }
}

impl std::fmt::Display for KeyAgreementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.tag()))
    }
}

/// Ephemeral key pair for one handshake.
pub enum LocalKeyPair {
    Dh3k(Dh3kKeyPair),
    Ec25(Ec25KeyPair),
}

impl LocalKeyPair {
    pub fn generate(key_agreement: KeyAgreementType) -> Self {
        match key_agreement {
            KeyAgreementType::Dh3k => LocalKeyPair::Dh3k(Dh3kKeyPair::generate()),
            KeyAgreementType::Ec25 => LocalKeyPair::Ec25(Ec25KeyPair::generate()),
        }
    }

    pub fn key_agreement_type(&self) -> KeyAgreementType {
        match self {
            LocalKeyPair::Dh3k(_) => KeyAgreementType::Dh3k,
            LocalKeyPair::Ec25(_) => KeyAgreementType::Ec25,
        }
    }

    /// The public value as carried in DHPart1/DHPart2.
    pub fn public_value(&self) -> Vec<u8> {
        match self {
            LocalKeyPair::Dh3k(pair) => pair.public_value(),
            LocalKeyPair::Ec25(pair) => pair.public_value(),
        }
    }
}

impl std::fmt::Debug for LocalKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyPair")
            .field("type", &self.key_agreement_type())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Computes the raw DH result: `pv^x mod p` for DH3K, the shared x-coordinate for EC25.
pub fn calculate_key_agreement(
    local: &LocalKeyPair,
    peer_public_value: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    match local {
        LocalKeyPair::Dh3k(pair) => pair.agree(peer_public_value),
        LocalKeyPair::Ec25(pair) => pair.agree(peer_public_value),
    }
}

/// `SHA256(Hello(responder) || Commit || DHPart1 || DHPart2)`.
pub fn calculate_total_hash(
    responder_hello: &HelloPacket,
    commit: &CommitPacket,
    dh_part_one: &DhPacket,
    dh_part_two: &DhPacket,
) -> [u8; 32] {
    sha256_parts(&[
        responder_hello.message_bytes(),
        commit.message_bytes(),
        dh_part_one.message_bytes(),
        dh_part_two.message_bytes(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        for ka in [KeyAgreementType::Dh3k, KeyAgreementType::Ec25] {
            assert_eq!(KeyAgreementType::from_tag(ka.tag()), Some(ka));
        }
        assert_eq!(
            KeyAgreementType::from_tag(b"DH3K"),
            Some(KeyAgreementType::Dh3k)
        );
        assert_eq!(KeyAgreementType::from_tag(b"DH2k"), None);
        assert_eq!(KeyAgreementType::Ec25.to_string(), "EC25");
    }

    #[test]
    fn test_both_sides_agree() {
        for ka in [KeyAgreementType::Dh3k, KeyAgreementType::Ec25] {
            let alice = LocalKeyPair::generate(ka);
            let bob = LocalKeyPair::generate(ka);
            assert_eq!(alice.public_value().len(), ka.public_value_length());

            let a = calculate_key_agreement(&alice, &bob.public_value()).unwrap();
            let b = calculate_key_agreement(&bob, &alice.public_value()).unwrap();
            assert_eq!(*a, *b);
        }
    }
}
