//! Blob storage for full block payloads

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::BlobError;

/// Object store holding serialized blocks
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `data` under `key` and return its blob id. Content-addressed
    /// backends return the content id, key-addressed ones return `key`.
    async fn add(&self, data: &[u8], key: &str) -> Result<String, BlobError>;

    async fn exists(&self, blob_id: &str) -> Result<bool, BlobError>;
}

/// IPFS HTTP API client
#[derive(Clone, Debug)]
pub struct IpfsStorage {
    api_url: String,
    http_client: reqwest::Client,
}

#[derive(Deserialize)]
struct IpfsAddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl IpfsStorage {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, BlobError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl BlobStorage for IpfsStorage {
    async fn add(&self, data: &[u8], key: &str) -> Result<String, BlobError> {
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(key.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http_client
            .post(format!("{}/api/v0/add", self.api_url))
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json::<IpfsAddResponse>()
            .await?;

        if response.hash.is_empty() {
            return Err(BlobError::Response("empty CID in add response".to_string()));
        }
        debug!(key, cid = %response.hash, "Stored block on IPFS");
        Ok(response.hash)
    }

    async fn exists(&self, blob_id: &str) -> Result<bool, BlobError> {
        let response = self
            .http_client
            .post(format!("{}/api/v0/block/stat", self.api_url))
            .query(&[("arg", blob_id)])
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

/// Key-addressed directory store, one `<key>.json` file per block
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl BlobStorage for FileStorage {
    async fn add(&self, data: &[u8], key: &str) -> Result<String, BlobError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(?path, "Stored block file");
        Ok(key.to_string())
    }

    async fn exists(&self, blob_id: &str) -> Result<bool, BlobError> {
        let path = self.path_for(blob_id)?;
        Ok(tokio::fs::metadata(path).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("blocks"));
        let key = "0xabc123";

        assert!(!storage.exists(key).await.unwrap());
        let id = storage.add(b"{\"header\":{}}", key).await.unwrap();
        assert_eq!(id, key);
        assert!(storage.exists(&id).await.unwrap());

        let written = std::fs::read(storage.dir().join("0xabc123.json")).unwrap();
        assert_eq!(written, b"{\"header\":{}}");

        // overwriting the same key is allowed
        storage.add(b"{}", key).await.unwrap();
        assert!(!storage.dir().join("0xabc123.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_storage_rejects_bad_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(storage.add(b"x", key).await, Err(BlobError::InvalidKey(_))));
        }
    }

    #[test]
    fn test_ipfs_url_normalized() {
        let storage = IpfsStorage::new("http://localhost:5001/", Duration::from_secs(1)).unwrap();
        assert_eq!(storage.api_url, "http://localhost:5001");
    }
}
