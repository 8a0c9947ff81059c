use crate::store::generic::GenericMemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rpcore::store::{
    IdentityStore, Result, RetainedSecretsRecord, RetainedSecretsStore, StoreError,
};
use rpcore::types::Zid;
use rpcore::zrtp::RetainedSecrets;
use tokio::sync::Mutex;

type RecordKey = (String, Zid);
type RecordMap = GenericMemoryStore<RecordKey, RetainedSecretsRecord>;

/// Volatile store; everything is lost when it is dropped.
#[derive(Default)]
pub struct MemoryStore {
    records: RecordMap,
    zid: Mutex<Option<Zid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, number: &str, zid: &Zid) -> Option<RetainedSecretsRecord> {
        self.records.get(&(number.to_string(), *zid)).await
    }

    // Expose for testing
    pub async fn record_count(&self) -> usize {
        self.records.len().await
    }
}

#[async_trait]
impl RetainedSecretsStore for MemoryStore {
    async fn get_retained_secrets(&self, number: &str, zid: &Zid) -> Result<RetainedSecrets> {
        Ok(self
            .record(number, zid)
            .await
            .map(|record| record.secrets_at(Utc::now()))
            .unwrap_or_default())
    }

    async fn set_retained_secret(
        &self,
        number: &str,
        zid: &Zid,
        rs1: &[u8],
        expiration: DateTime<Utc>,
        continuity: bool,
    ) -> Result<()> {
        let now = Utc::now();
        self.records
            .update((number.to_string(), *zid), |existing| {
                RetainedSecretsRecord::rotate(existing, rs1, expiration, continuity, now)
            })
            .await;
        Ok(())
    }

    async fn is_verified(&self, number: &str, zid: &Zid) -> Result<bool> {
        Ok(self
            .record(number, zid)
            .await
            .is_some_and(|record| record.verified && !record.is_expired(Utc::now())))
    }

    async fn set_verified(&self, number: &str, zid: &Zid) -> Result<()> {
        let mut found = false;
        self.records
            .update((number.to_string(), *zid), |existing| {
                found = existing.is_some();
                existing.map(|record| RetainedSecretsRecord {
                    verified: true,
                    ..record.clone()
                })
            })
            .await;
        if found {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("{} / {}", number, zid)))
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn load_zid(&self) -> Result<Option<Zid>> {
        Ok(*self.zid.lock().await)
    }

    async fn store_zid(&self, zid: &Zid) -> Result<()> {
        *self.zid.lock().await = Some(*zid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_zid(byte: u8) -> Zid {
        Zid::from([byte; 12])
    }

    #[tokio::test]
    async fn test_rotation_and_lookup_are_keyed_by_number_and_zid() {
        let store = MemoryStore::new();
        let expires = Utc::now() + Duration::days(1);

        store
            .set_retained_secret("+14155550100", &make_zid(1), b"first", expires, false)
            .await
            .unwrap();
        store
            .set_retained_secret("+14155550100", &make_zid(1), b"second", expires, true)
            .await
            .unwrap();

        let secrets = store
            .get_retained_secrets("+14155550100", &make_zid(1))
            .await
            .unwrap();
        assert_eq!(secrets.rs1(), Some(&b"second"[..]));
        assert_eq!(secrets.rs2(), Some(&b"first"[..]));

        let other_zid = store
            .get_retained_secrets("+14155550100", &make_zid(2))
            .await
            .unwrap();
        assert!(other_zid.is_empty());
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_verified_flag_survives_only_with_continuity() {
        let store = MemoryStore::new();
        let zid = make_zid(3);
        let expires = Utc::now() + Duration::days(1);

        store
            .set_retained_secret("+1", &zid, b"a", expires, false)
            .await
            .unwrap();
        assert!(!store.is_verified("+1", &zid).await.unwrap());

        store.set_verified("+1", &zid).await.unwrap();
        assert!(store.is_verified("+1", &zid).await.unwrap());

        store
            .set_retained_secret("+1", &zid, b"b", expires, true)
            .await
            .unwrap();
        assert!(store.is_verified("+1", &zid).await.unwrap());

        store
            .set_retained_secret("+1", &zid, b"c", expires, false)
            .await
            .unwrap();
        assert!(!store.is_verified("+1", &zid).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_verified_without_row_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.set_verified("+1", &make_zid(4)).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!store.is_verified("+1", &make_zid(4)).await.unwrap());
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_past_expiration_is_not_written() {
        let store = MemoryStore::new();
        store
            .set_retained_secret("+1", &make_zid(5), b"x", Utc::now() - Duration::seconds(1), true)
            .await
            .unwrap();
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_zid_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load_zid().await.unwrap().is_none());
        store.store_zid(&make_zid(9)).await.unwrap();
        assert_eq!(store.load_zid().await.unwrap(), Some(make_zid(9)));
    }
}
