//! Retained secret continuity (RFC 6189 section 4.3).

use crate::crypto::{ct_eq, hmac_sha256};
use crate::zrtp::engine::Role;
use crate::zrtp::packet::SECRET_ID_LENGTH;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

const INITIATOR_LABEL: &[u8] = b"Initiator";
const RESPONDER_LABEL: &[u8] = b"Responder";

/// The two most recent secrets negotiated with a peer. `rs2` is the one
/// displaced when `rs1` was last refreshed.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RetainedSecrets {
    rs1: Option<Vec<u8>>,
    rs2: Option<Vec<u8>>,
}

impl RetainedSecrets {
    pub fn new(rs1: Option<Vec<u8>>, rs2: Option<Vec<u8>>) -> Self {
        Self { rs1, rs2 }
    }

    pub fn rs1(&self) -> Option<&[u8]> {
        self.rs1.as_deref()
    }

    pub fn rs2(&self) -> Option<&[u8]> {
        self.rs2.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.rs1.is_none() && self.rs2.is_none()
    }
}

impl std::fmt::Debug for RetainedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetainedSecrets")
            .field("rs1", &self.rs1.as_ref().map(|_| "[REDACTED]"))
            .field("rs2", &self.rs2.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn label(role: Role) -> &'static [u8] {
    match role {
        Role::Initiator => INITIATOR_LABEL,
        Role::Responder => RESPONDER_LABEL,
    }
}

/// `HMAC-SHA256(secret, role)` truncated to 8 bytes.
pub fn secret_id(secret: &[u8], role: Role) -> [u8; SECRET_ID_LENGTH] {
    let digest = hmac_sha256(secret, &[label(role)]);
    let mut id = [0u8; SECRET_ID_LENGTH];
    id.copy_from_slice(&digest[..SECRET_ID_LENGTH]);
    id
}

fn random_id() -> [u8; SECRET_ID_LENGTH] {
    let mut id = [0u8; SECRET_ID_LENGTH];
    rand::rng().fill_bytes(&mut id);
    id
}

/// Matches the peer's advertised retained secret IDs against our own secrets.
pub struct RetainedSecretsCalculator {
    role: Role,
    secrets: RetainedSecrets,
    rs1_id: [u8; SECRET_ID_LENGTH],
    rs2_id: [u8; SECRET_ID_LENGTH],
}

impl RetainedSecretsCalculator {
    pub fn new(role: Role, secrets: RetainedSecrets) -> Self {
        let rs1_id = secrets.rs1().map_or_else(random_id, |s| secret_id(s, role));
        let rs2_id = secrets.rs2().map_or_else(random_id, |s| secret_id(s, role));
        Self {
            role,
            secrets,
            rs1_id,
            rs2_id,
        }
    }

    /// IDs to place in our DH packet; random where no secret exists.
    pub fn local_ids(&self) -> ([u8; SECRET_ID_LENGTH], [u8; SECRET_ID_LENGTH]) {
        (self.rs1_id, self.rs2_id)
    }

    pub fn secrets(&self) -> &RetainedSecrets {
        &self.secrets
    }

    /// Returns the shared retained secret, if the peer holds one of ours.
    pub fn get_s1(&self, received_rs1_id: &[u8], received_rs2_id: &[u8]) -> Option<&[u8]> {
        let peer = self.role.peer();
        let expected = [
            self.secrets.rs1().map(|s| (secret_id(s, peer), s)),
            self.secrets.rs2().map(|s| (secret_id(s, peer), s)),
        ];
        let received = [received_rs1_id, received_rs2_id];

        // (local, received) comparison order differs per role.
        let order: [(usize, usize); 4] = match self.role {
            Role::Initiator => [(0, 0), (0, 1), (1, 0), (1, 1)],
            Role::Responder => [(0, 0), (1, 0), (0, 1), (1, 1)],
        };

        order.into_iter().find_map(|(local, remote)| {
            expected[local]
                .as_ref()
                .filter(|(id, _)| ct_eq(id, received[remote]))
                .map(|(_, secret)| *secret)
        })
    }

    pub fn has_continuity(&self, received_rs1_id: &[u8], received_rs2_id: &[u8]) -> bool {
        self.get_s1(received_rs1_id, received_rs2_id).is_some()
    }
}
