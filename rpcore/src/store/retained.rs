use crate::zrtp::retained::RetainedSecrets;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted peer relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedSecretsRecord {
    pub expires: DateTime<Utc>,
    pub rs1: Option<Vec<u8>>,
    pub rs2: Option<Vec<u8>>,
    pub verified: bool,
}

impl RetainedSecretsRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires
    }

    pub fn secrets_at(&self, now: DateTime<Utc>) -> RetainedSecrets {
        if self.is_expired(now) {
            return RetainedSecrets::default();
        }
        RetainedSecrets::new(self.rs1.clone(), self.rs2.clone())
    }

    /// Computes the row after storing a freshly negotiated `rs1`.
    ///
    /// Returns `None` when the write should be dropped.
    pub fn rotate(
        existing: Option<&Self>,
        rs1: &[u8],
        expiration: DateTime<Utc>,
        continuity: bool,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if now >= expiration {
            return None;
        }

        Some(match existing {
            Some(old) => Self {
                expires: expiration,
                rs1: Some(rs1.to_vec()),
                rs2: old.rs1.clone(),
                verified: old.verified && continuity,
            },
            None => Self {
                expires: expiration,
                rs1: Some(rs1.to_vec()),
                rs2: None,
                verified: false,
            },
        })
    }
}
