use crate::store::error::Result;
use crate::types::Zid;
use crate::zrtp::retained::RetainedSecrets;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Rolling retained secrets per `(formatted number, peer ZID)`.
///
/// Read once when the peer Hello arrives and written once after a successful
/// handshake. Callers serialise the read-then-write for a given key.
#[async_trait]
pub trait RetainedSecretsStore: Send + Sync {
    /// Returns empty secrets when no row exists or the row has expired.
    async fn get_retained_secrets(&self, number: &str, zid: &Zid) -> Result<RetainedSecrets>;

    /// Rotates `rs1` into `rs2` and stores the new `rs1`.
    ///
    /// `continuity` is false when no retained secret matched this handshake;
    /// that clears the verified flag. Writes whose expiration is already in
    /// the past are dropped.
    async fn set_retained_secret(
        &self,
        number: &str,
        zid: &Zid,
        rs1: &[u8],
        expiration: DateTime<Utc>,
        continuity: bool,
    ) -> Result<()>;

    async fn is_verified(&self, number: &str, zid: &Zid) -> Result<bool>;

    /// Records that the user compared the SAS out of band.
    async fn set_verified(&self, number: &str, zid: &Zid) -> Result<()>;
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn load_zid(&self) -> Result<Option<Zid>>;
    async fn store_zid(&self, zid: &Zid) -> Result<()>;
}
