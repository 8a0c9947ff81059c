use crate::zrtp::error::{Result, ZrtpError};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::RngCore;
use zeroize::Zeroizing;

pub(super) const PUBLIC_VALUE_LENGTH: usize = 64;
const UNCOMPRESSED_TAG: u8 = 0x04;

pub struct Ec25KeyPair {
    secret: SecretKey,
}

impl Ec25KeyPair {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        loop {
            let mut candidate = Zeroizing::new([0u8; 32]);
            rng.fill_bytes(candidate.as_mut());
            // Rejects zero and values at or above the group order.
            if let Ok(secret) = SecretKey::from_slice(candidate.as_ref()) {
                return Self { secret };
            }
        }
    }

    /// Uncompressed `x || y` without the SEC1 tag byte.
    pub fn public_value(&self) -> Vec<u8> {
        let point = self.secret.public_key().to_encoded_point(false);
        point.as_bytes()[1..].to_vec()
    }

    pub fn agree(&self, peer_public_value: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if peer_public_value.len() != PUBLIC_VALUE_LENGTH {
            return Err(ZrtpError::invalid(format!(
                "EC25 public value has {} bytes",
                peer_public_value.len()
            )));
        }

        let mut sec1 = Vec::with_capacity(PUBLIC_VALUE_LENGTH + 1);
        sec1.push(UNCOMPRESSED_TAG);
        sec1.extend_from_slice(peer_public_value);
        let peer = PublicKey::from_sec1_bytes(&sec1)
            .map_err(|_| ZrtpError::invalid("EC25 public value is not on the curve"))?;

        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_point_off_curve() {
        let pair = Ec25KeyPair::generate();
        let mut bogus = pair.public_value();
        bogus[63] ^= 0x01;
        assert!(pair.agree(&bogus).is_err());
    }

    #[test]
    fn test_shared_secret_is_x_coordinate_length() {
        let a = Ec25KeyPair::generate();
        let b = Ec25KeyPair::generate();
        assert_eq!(a.agree(&b.public_value()).unwrap().len(), 32);
    }
}
