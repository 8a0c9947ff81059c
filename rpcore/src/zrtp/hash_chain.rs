use crate::crypto::sha256;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Four chained pre-images with `Hn = SHA256(Hn-1)`.
///
/// H3 is published in Hello, and each lower image is disclosed later as the
/// MAC key of the previous message, so a receiver can authenticate a packet
/// retroactively. H0 stays secret until it travels encrypted in Confirm.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HashChain {
    h0: [u8; 32],
    h1: [u8; 32],
    h2: [u8; 32],
    h3: [u8; 32],
}

impl HashChain {
    pub fn generate() -> Self {
        let mut h0 = [0u8; 32];
        rand::rng().fill_bytes(&mut h0);
        Self::from_h0(h0)
    }

    pub fn from_h0(h0: [u8; 32]) -> Self {
        let h1 = sha256(&h0);
        let h2 = sha256(&h1);
        let h3 = sha256(&h2);
        Self { h0, h1, h2, h3 }
    }

    pub fn h0(&self) -> &[u8; 32] {
        &self.h0
    }

    pub fn h1(&self) -> &[u8; 32] {
        &self.h1
    }

    pub fn h2(&self) -> &[u8; 32] {
        &self.h2
    }

    pub fn h3(&self) -> &[u8; 32] {
        &self.h3
    }
}

impl std::fmt::Debug for HashChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashChain")
            .field("h0", &"[REDACTED]")
            .field("h3", &hex::encode(self.h3))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_image_hashes_to_the_next() {
        let chain = HashChain::generate();
        assert_eq!(&sha256(chain.h0()), chain.h1());
        assert_eq!(&sha256(chain.h1()), chain.h2());
        assert_eq!(&sha256(chain.h2()), chain.h3());
    }

    #[test]
    fn test_generated_chains_differ() {
        assert_ne!(HashChain::generate().h0(), HashChain::generate().h0());
    }

    #[test]
    fn test_debug_hides_h0() {
        let chain = HashChain::from_h0([0xab; 32]);
        let printed = format!("{chain:?}");
        assert!(!printed.contains(&hex::encode(chain.h0())));
        assert!(printed.contains("[REDACTED]"));
    }
}
