use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// ZRTP identifier: 12 random bytes, one per installation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zid([u8; Zid::LENGTH]);

impl Zid {
    pub const LENGTH: usize = 12;

    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::LENGTH];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; Self::LENGTH]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }

    /// The encoding used as part of the retained secrets key.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| Self::from_slice(&bytes))
    }
}

impl From<[u8; Zid::LENGTH]> for Zid {
    fn from(bytes: [u8; Zid::LENGTH]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for Zid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Zid({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Zid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        let zid = Zid::generate();
        assert_eq!(Zid::from_base64(&zid.to_base64()), Some(zid));
        assert_eq!(Zid::from_base64("AAAA"), None);
    }

    #[test]
    fn test_from_slice_requires_exact_length() {
        assert!(Zid::from_slice(&[0u8; 11]).is_none());
        assert!(Zid::from_slice(&[0u8; 12]).is_some());
    }
}
