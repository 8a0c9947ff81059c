use crate::zrtp::error::{Result, ZrtpError};
use num_bigint::BigUint;
use rand::RngCore;
use std::sync::LazyLock;
use zeroize::Zeroizing;

pub(super) const PUBLIC_VALUE_LENGTH: usize = 384;
const EXPONENT_LENGTH: usize = 32;

// RFC 3526 section 4.
const MODP_3072_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);

static PRIME: LazyLock<BigUint> = LazyLock::new(|| {
    BigUint::parse_bytes(MODP_3072_PRIME.as_bytes(), 16).expect("MODP prime is valid hex")
});

fn prime() -> &'static BigUint {
    &PRIME
}

pub struct Dh3kKeyPair {
    exponent: Zeroizing<[u8; EXPONENT_LENGTH]>,
    public: BigUint,
}

impl Dh3kKeyPair {
    pub fn generate() -> Self {
        let mut exponent = Zeroizing::new([0u8; EXPONENT_LENGTH]);
        rand::rng().fill_bytes(exponent.as_mut());

        let x = BigUint::from_bytes_be(exponent.as_ref());
        let public = BigUint::from(2u32).modpow(&x, prime());
        Self { exponent, public }
    }

    pub fn public_value(&self) -> Vec<u8> {
        left_pad(&self.public.to_bytes_be())
    }

    pub fn agree(&self, peer_public_value: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if peer_public_value.len() != PUBLIC_VALUE_LENGTH {
            return Err(ZrtpError::invalid(format!(
                "DH3K public value has {} bytes",
                peer_public_value.len()
            )));
        }

        let p = prime();
        let one = BigUint::from(1u32);
        let y = BigUint::from_bytes_be(peer_public_value);
        let p_minus_one = p - &one;
        if y <= one || y >= p_minus_one {
            return Err(ZrtpError::invalid("degenerate DH3K public value"));
        }

        let x = BigUint::from_bytes_be(self.exponent.as_ref());
        let result = y.modpow(&x, p);
        Ok(Zeroizing::new(left_pad(&result.to_bytes_be())))
    }
}

fn left_pad(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; PUBLIC_VALUE_LENGTH.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prime_is_3072_bits() {
        assert_eq!(prime().bits(), 3072);
    }

    #[test]
    fn test_rejects_degenerate_values() {
        let pair = Dh3kKeyPair::generate();
        let p = prime();

        let mut one = vec![0u8; PUBLIC_VALUE_LENGTH];
        one[PUBLIC_VALUE_LENGTH - 1] = 1;
        assert!(pair.agree(&one).is_err());
        assert!(pair.agree(&vec![0u8; PUBLIC_VALUE_LENGTH]).is_err());

        let p_minus_one = left_pad(&(p - BigUint::from(1u32)).to_bytes_be());
        assert!(pair.agree(&p_minus_one).is_err());
        assert!(pair.agree(&[0xff; PUBLIC_VALUE_LENGTH]).is_err());
        assert!(pair.agree(&[2u8; 10]).is_err());
    }
}
