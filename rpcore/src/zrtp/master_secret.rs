use crate::crypto::{hmac_sha256, sha256_parts};
use crate::types::Zid;
use crate::zrtp::engine::Role;
use zeroize::{Zeroize, ZeroizeOnDrop};

const KDF_STRING: &[u8] = b"ZRTP-HMAC-KDF";

const SRTP_KEY_LENGTH: usize = 16;
const SRTP_SALT_LENGTH: usize = 14;
const MAC_KEY_LENGTH: usize = 32;
const ZRTP_KEY_LENGTH: usize = 16;
const SAS_HASH_LENGTH: usize = 32;
const RETAINED_SECRET_LENGTH: usize = 32;

/// Keys for one media direction.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DirectionalKeys {
    pub srtp_key: Vec<u8>,
    pub srtp_salt: Vec<u8>,
    pub mac_key: Vec<u8>,
}

/// Keys handed to the media layer, oriented for one side of the call.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaKeys {
    /// Protects what we send.
    pub local: DirectionalKeys,
    /// Protects what the peer sends.
    pub remote: DirectionalKeys,
}

impl std::fmt::Debug for MediaKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaKeys")
            .field("local", &"[REDACTED]")
            .field("remote", &"[REDACTED]")
            .finish()
    }
}

/// Session keys derived from s0 (RFC 6189 section 4.5).
///
/// Created once per successful handshake and never persisted. The next
/// retained secret is carried here until the call writes it to the store.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret {
    initiator_srtp_key: Vec<u8>,
    responder_srtp_key: Vec<u8>,
    initiator_srtp_salt: Vec<u8>,
    responder_srtp_salt: Vec<u8>,
    initiator_mac_key: Vec<u8>,
    responder_mac_key: Vec<u8>,
    initiator_zrtp_key: Vec<u8>,
    responder_zrtp_key: Vec<u8>,
    sas: Vec<u8>,
    retained_secret: Vec<u8>,
}

impl MasterSecret {
    /// `s1` is the retained secret both parties matched, if any.
    pub fn new(
        dh_result: &[u8],
        total_hash: &[u8; 32],
        initiator_zid: &Zid,
        responder_zid: &Zid,
        s1: Option<&[u8]>,
    ) -> Self {
        let mut s0 = calculate_s0(dh_result, total_hash, initiator_zid, responder_zid, s1);

        let mut context = Vec::with_capacity(Zid::LENGTH * 2 + total_hash.len());
        context.extend_from_slice(initiator_zid.as_bytes());
        context.extend_from_slice(responder_zid.as_bytes());
        context.extend_from_slice(total_hash);

        let derive = |label: &str, length: usize| kdf(&s0, label.as_bytes(), &context, length);

        let secret = Self {
            initiator_srtp_key: derive("Initiator SRTP master key", SRTP_KEY_LENGTH),
            responder_srtp_key: derive("Responder SRTP master key", SRTP_KEY_LENGTH),
            initiator_srtp_salt: derive("Initiator SRTP master salt", SRTP_SALT_LENGTH),
            responder_srtp_salt: derive("Responder SRTP master salt", SRTP_SALT_LENGTH),
            initiator_mac_key: derive("Initiator HMAC key", MAC_KEY_LENGTH),
            responder_mac_key: derive("Responder HMAC key", MAC_KEY_LENGTH),
            initiator_zrtp_key: derive("Initiator ZRTP key", ZRTP_KEY_LENGTH),
            responder_zrtp_key: derive("Responder ZRTP key", ZRTP_KEY_LENGTH),
            sas: derive("SAS", SAS_HASH_LENGTH),
            retained_secret: derive("retained secret", RETAINED_SECRET_LENGTH),
        };
        s0.zeroize();
        secret
    }

    pub fn initiator_srtp_key(&self) -> &[u8] {
        &self.initiator_srtp_key
    }

    pub fn responder_srtp_key(&self) -> &[u8] {
        &self.responder_srtp_key
    }

    pub fn initiator_srtp_salt(&self) -> &[u8] {
        &self.initiator_srtp_salt
    }

    pub fn responder_srtp_salt(&self) -> &[u8] {
        &self.responder_srtp_salt
    }

    pub fn initiator_mac_key(&self) -> &[u8] {
        &self.initiator_mac_key
    }

    pub fn responder_mac_key(&self) -> &[u8] {
        &self.responder_mac_key
    }

    pub fn initiator_zrtp_key(&self) -> &[u8] {
        &self.initiator_zrtp_key
    }

    pub fn responder_zrtp_key(&self) -> &[u8] {
        &self.responder_zrtp_key
    }

    /// The SAS hash; render with [`crate::zrtp::sas::calculate_sas`].
    pub fn sas(&self) -> &[u8] {
        &self.sas
    }

    pub fn retained_secret(&self) -> &[u8] {
        &self.retained_secret
    }

    pub fn media_keys(&self, role: Role) -> MediaKeys {
        let initiator = DirectionalKeys {
            srtp_key: self.initiator_srtp_key.clone(),
            srtp_salt: self.initiator_srtp_salt.clone(),
            mac_key: self.initiator_mac_key.clone(),
        };
        let responder = DirectionalKeys {
            srtp_key: self.responder_srtp_key.clone(),
            srtp_salt: self.responder_srtp_salt.clone(),
            mac_key: self.responder_mac_key.clone(),
        };
        match role {
            Role::Initiator => MediaKeys {
                local: initiator,
                remote: responder,
            },
            Role::Responder => MediaKeys {
                local: responder,
                remote: initiator,
            },
        }
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret")
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

fn length_prefixed(secret: Option<&[u8]>) -> (Vec<u8>, &[u8]) {
    let secret = secret.unwrap_or(&[]);
    ((secret.len() as u32).to_be_bytes().to_vec(), secret)
}

/// `s0 = SHA256(1 | DHResult | "ZRTP-HMAC-KDF" | ZIDi | ZIDr | total_hash | len(s1) | s1 | len(s2) | s2 | len(s3) | s3)`
///
/// No auxiliary or PBX secret is ever shared, so s2 and s3 are empty.
fn calculate_s0(
    dh_result: &[u8],
    total_hash: &[u8; 32],
    initiator_zid: &Zid,
    responder_zid: &Zid,
    s1: Option<&[u8]>,
) -> [u8; 32] {
    let (s1_len, s1) = length_prefixed(s1);
    let (s2_len, s2) = length_prefixed(None);
    let (s3_len, s3) = length_prefixed(None);

    sha256_parts(&[
        &1u32.to_be_bytes(),
        dh_result,
        KDF_STRING,
        initiator_zid.as_bytes(),
        responder_zid.as_bytes(),
        total_hash,
        &s1_len,
        s1,
        &s2_len,
        s2,
        &s3_len,
        s3,
    ])
}

/// `KDF(KI, Label, Context, L) = HMAC(KI, i | Label | 0x00 | Context | L)` truncated to L.
fn kdf(key: &[u8], label: &[u8], context: &[u8], length: usize) -> Vec<u8> {
    let bits = (length as u32 * 8).to_be_bytes();
    let digest = hmac_sha256(key, &[&1u32.to_be_bytes(), label, &[0u8], context, &bits]);
    digest[..length].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_secret(dh: &[u8], s1: Option<&[u8]>) -> MasterSecret {
        MasterSecret::new(
            dh,
            &[7u8; 32],
            &Zid::from([1u8; 12]),
            &Zid::from([2u8; 12]),
            s1,
        )
    }

    #[test]
    fn test_key_lengths() {
        let secret = make_secret(b"dh result", None);
        assert_eq!(secret.initiator_srtp_key().len(), 16);
        assert_eq!(secret.responder_srtp_salt().len(), 14);
        assert_eq!(secret.initiator_mac_key().len(), 32);
        assert_eq!(secret.responder_zrtp_key().len(), 16);
        assert_eq!(secret.sas().len(), 32);
        assert_eq!(secret.retained_secret().len(), 32);
    }

    #[test]
    fn test_directions_differ() {
        let secret = make_secret(b"dh result", None);
        assert_ne!(secret.initiator_srtp_key(), secret.responder_srtp_key());
        assert_ne!(secret.initiator_zrtp_key(), secret.responder_zrtp_key());
    }

    #[test]
    fn test_derivation_is_deterministic_and_binds_inputs() {
        let a = make_secret(b"dh result", Some(&b"rs1"[..]));
        let b = make_secret(b"dh result", Some(&b"rs1"[..]));
        assert_eq!(a.initiator_srtp_key(), b.initiator_srtp_key());
        assert_eq!(a.sas(), b.sas());

        let without_rs = make_secret(b"dh result", None);
        assert_ne!(a.sas(), without_rs.sas());
        let other_dh = make_secret(b"dh resulT", Some(&b"rs1"[..]));
        assert_ne!(a.initiator_srtp_key(), other_dh.initiator_srtp_key());
    }

    #[test]
    fn test_media_keys_are_mirrored() {
        let secret = make_secret(b"dh result", None);
        let initiator = secret.media_keys(Role::Initiator);
        let responder = secret.media_keys(Role::Responder);
        assert!(initiator.local == responder.remote);
        assert!(initiator.remote == responder.local);
        assert_eq!(initiator.local.srtp_key, secret.initiator_srtp_key());
    }
}
