use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rpcore::store::{
    IdentityStore, Result, RetainedSecretsRecord, RetainedSecretsStore, StoreError,
};
use rpcore::types::Zid;
use rpcore::zrtp::RetainedSecrets;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Serialize, Deserialize)]
struct IdentityFile {
    /// Base64.
    zid: String,
}

/// Keeps the ZID and one JSON file per peer relationship under a directory.
pub struct FileStore {
    base_path: PathBuf,
    /// Serialises read-modify-write of retained secrets rows.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = path.into();
        let store = Self {
            base_path,
            write_lock: Mutex::new(()),
        };

        fs::create_dir_all(store.path_for("retained")).await?;

        Ok(store)
    }

    fn path_for(&self, sub: &str) -> PathBuf {
        self.base_path.join(sub)
    }

    fn sanitize_filename(key: &str) -> String {
        key.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_")
    }

    fn record_path(&self, number: &str, zid: &Zid) -> PathBuf {
        self.path_for("retained").join(format!(
            "{}_{}.json",
            Self::sanitize_filename(number),
            hex::encode(zid.as_bytes())
        ))
    }

    fn identity_path(&self) -> PathBuf {
        self.base_path.join("identity.json")
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Writes through a temporary file so a crash never leaves half a row.
    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_record(&self, number: &str, zid: &Zid) -> Result<Option<RetainedSecretsRecord>> {
        self.read_json(&self.record_path(number, zid)).await
    }
}

#[async_trait]
impl RetainedSecretsStore for FileStore {
    async fn get_retained_secrets(&self, number: &str, zid: &Zid) -> Result<RetainedSecrets> {
        Ok(self
            .read_record(number, zid)
            .await?
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
        let _guard = self.write_lock.lock().await;
        let existing = self.read_record(number, zid).await?;
        match RetainedSecretsRecord::rotate(existing.as_ref(), rs1, expiration, continuity, Utc::now())
        {
            Some(record) => self.write_json(&self.record_path(number, zid), &record).await,
            None => Ok(()),
        }
    }

    async fn is_verified(&self, number: &str, zid: &Zid) -> Result<bool> {
        Ok(self
            .read_record(number, zid)
            .await?
            .is_some_and(|record| record.verified && !record.is_expired(Utc::now())))
    }

    async fn set_verified(&self, number: &str, zid: &Zid) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match self.read_record(number, zid).await? {
            Some(mut record) => {
                record.verified = true;
                self.write_json(&self.record_path(number, zid), &record).await
            }
            None => Err(StoreError::NotFound(format!("{} / {}", number, zid))),
        }
    }
}

#[async_trait]
impl IdentityStore for FileStore {
    async fn load_zid(&self) -> Result<Option<Zid>> {
        let Some(file) = self.read_json::<IdentityFile>(&self.identity_path()).await? else {
            return Ok(None);
        };
        Zid::from_base64(&file.zid)
            .map(Some)
            .ok_or_else(|| StoreError::Serialization("malformed ZID in identity file".into()))
    }

    async fn store_zid(&self, zid: &Zid) -> Result<()> {
        let file = IdentityFile {
            zid: zid.to_base64(),
        };
        self.write_json(&self.identity_path(), &file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn make_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_retained_secrets_persist_across_instances() {
        let (dir, store) = make_store().await;
        let zid = Zid::from([1u8; 12]);
        let expires = Utc::now() + Duration::days(30);

        store
            .set_retained_secret("+1 (415) 555-0100", &zid, b"one", expires, false)
            .await
            .unwrap();
        store
            .set_retained_secret("+1 (415) 555-0100", &zid, b"two", expires, true)
            .await
            .unwrap();
        drop(store);

        let reopened = FileStore::new(dir.path()).await.unwrap();
        let secrets = reopened
            .get_retained_secrets("+1 (415) 555-0100", &zid)
            .await
            .unwrap();
        assert_eq!(secrets.rs1(), Some(&b"two"[..]));
        assert_eq!(secrets.rs2(), Some(&b"one"[..]));
    }

    #[tokio::test]
    async fn test_missing_row_reads_empty_and_cannot_be_verified() {
        let (_dir, store) = make_store().await;
        let zid = Zid::from([2u8; 12]);
        assert!(store.get_retained_secrets("+1", &zid).await.unwrap().is_empty());
        assert!(!store.is_verified("+1", &zid).await.unwrap());
        assert!(matches!(
            store.set_verified("+1", &zid).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_verified_flag_round_trip() {
        let (_dir, store) = make_store().await;
        let zid = Zid::from([3u8; 12]);
        store
            .set_retained_secret("+1", &zid, b"x", Utc::now() + Duration::days(1), true)
            .await
            .unwrap();
        store.set_verified("+1", &zid).await.unwrap();
        assert!(store.is_verified("+1", &zid).await.unwrap());
    }

    #[tokio::test]
    async fn test_zid_is_stored_as_base64() {
        let (dir, store) = make_store().await;
        assert!(store.load_zid().await.unwrap().is_none());

        let zid = Zid::from([7u8; 12]);
        store.store_zid(&zid).await.unwrap();
        assert_eq!(store.load_zid().await.unwrap(), Some(zid));

        let raw = std::fs::read_to_string(dir.path().join("identity.json")).unwrap();
        assert!(raw.contains(&zid.to_base64()));
    }

    #[tokio::test]
    async fn test_corrupt_identity_file_is_an_error() {
        let (dir, store) = make_store().await;
        std::fs::write(dir.path().join("identity.json"), br#"{"zid":"!!"}"#).unwrap();
        assert!(matches!(
            store.load_zid().await,
            Err(StoreError::Serialization(_))
        ));
    }
}
