// src/publish/store.rs
use async_trait::async_trait;
use google_cloud_storage::{
    client::{Client, ClientConfig},
    http::{
        objects::{
            get::GetObjectRequest,
            list::ListObjectsRequest,
            upload::{Media, UploadObjectRequest, UploadType},
        },
        Error as GcsError,
    },
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, Result};

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// The few operations the publisher needs from a bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Display form of `key`, e.g. `gs://bucket/key`.
    fn uri(&self, key: &str) -> String;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Stream a local file to `key`, replacing any existing object.
    /// Returns the number of bytes sent.
    async fn upload_file(&self, path: &Path, key: &str) -> Result<u64>;

    /// Up to `limit` objects whose key starts with `prefix`.
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectInfo>>;
}

/// Where `--bucket` points: a GCS bucket name, or `file:///some/dir` for a
/// directory standing in for one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Gcs(String),
    Local(PathBuf),
}

impl StoreTarget {
    pub fn parse(bucket: &str) -> Result<Self> {
        let bucket = bucket.trim();
        if let Some(dir) = bucket.strip_prefix("file://") {
            if dir.is_empty() {
                return Err(PipelineError::InvalidArgument(
                    "file:// target needs a directory".into(),
                ));
            }
            return Ok(Self::Local(PathBuf::from(dir)));
        }
        let name = bucket.strip_prefix("gs://").unwrap_or(bucket).trim_end_matches('/');
        if name.is_empty() || name.contains('/') {
            return Err(PipelineError::InvalidArgument(format!(
                "invalid bucket name {:?}",
                bucket
            )));
        }
        Ok(Self::Gcs(name.to_string()))
    }

    /// Build the store. For GCS this authenticates with Application
    /// Default Credentials.
    pub async fn connect(&self) -> Result<Box<dyn ObjectStore>> {
        match self {
            Self::Gcs(bucket) => Ok(Box::new(GcsStore::connect(bucket).await?)),
            Self::Local(root) => Ok(Box::new(LocalStore::new(root.clone()))),
        }
    }
}

pub struct GcsStore {
    client: Client,
    bucket: String,
}

impl GcsStore {
    pub async fn connect(bucket: &str) -> Result<Self> {
        let cfg = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| PipelineError::Storage {
                uri: format!("gs://{}", bucket),
                detail: format!("authenticating to GCS: {}", e),
            })?;
        Ok(Self {
            client: Client::new(cfg),
            bucket: bucket.to_string(),
        })
    }

    fn storage_error(&self, key: &str, e: GcsError) -> PipelineError {
        PipelineError::Storage {
            uri: self.uri(key),
            detail: e.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let req = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: key.to_string(),
            ..Default::default()
        };
        match self.client.get_object(&req).await {
            Ok(_) => Ok(true),
            Err(GcsError::Response(r)) if r.code == 404 => Ok(false),
            Err(e) => Err(self.storage_error(key, e)),
        }
    }

    #[instrument(level = "info", skip(self), fields(file = %path.display()))]
    async fn upload_file(&self, path: &Path, key: &str) -> Result<u64> {
        let file = fs::File::open(path).await?;
        let len = file.metadata().await?.len();

        let mut media = Media::new(key.to_string());
        media.content_length = Some(len);
        let req = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };

        self.client
            .upload_object(&req, file, &UploadType::Simple(media))
            .await
            .map_err(|e| self.storage_error(key, e))?;

        info!(object = %self.uri(key), bytes = len, "uploaded");
        Ok(len)
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectInfo>> {
        let req = ListObjectsRequest {
            bucket: self.bucket.clone(),
            prefix: Some(prefix.to_string()),
            max_results: Some(limit as i32),
            ..Default::default()
        };
        let resp = self
            .client
            .list_objects(&req)
            .await
            .map_err(|e| self.storage_error(prefix, e))?;

        Ok(resp
            .items
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .map(|o| ObjectInfo {
                key: o.name,
                size: o.size.max(0) as u64,
            })
            .collect())
    }
}

/// A directory used as a bucket. Keys map to relative paths.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn uri(&self, key: &str) -> String {
        format!("file://{}", self.path_for(key).display())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    #[instrument(level = "info", skip(self), fields(file = %path.display()))]
    async fn upload_file(&self, path: &Path, key: &str) -> Result<u64> {
        let dest = self.path_for(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = dest.clone().into_os_string();
        tmp.push(".tmp");
        let bytes = fs::copy(path, &tmp).await?;
        fs::rename(&tmp, &dest).await?;
        info!(object = %self.uri(key), bytes, "copied");
        Ok(bytes)
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectInfo>> {
        let mut found = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut rd = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = rd.next_entry().await? {
                let p = entry.path();
                if p.is_dir() {
                    stack.push(p);
                    continue;
                }
                let Ok(rel) = p.strip_prefix(&self.root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    let size = entry.metadata().await?.len();
                    found.push(ObjectInfo { key, size });
                }
            }
        }
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found.truncate(limit);
        debug!(prefix, count = found.len(), "listed");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_targets() {
        assert_eq!(
            StoreTarget::parse("my-bucket").unwrap(),
            StoreTarget::Gcs("my-bucket".into())
        );
        assert_eq!(
            StoreTarget::parse("gs://my-bucket/").unwrap(),
            StoreTarget::Gcs("my-bucket".into())
        );
        assert_eq!(
            StoreTarget::parse("file:///tmp/bucket").unwrap(),
            StoreTarget::Local(PathBuf::from("/tmp/bucket"))
        );
        assert!(StoreTarget::parse("").is_err());
        assert!(StoreTarget::parse("gs://a/b").is_err());
        assert!(StoreTarget::parse("file://").is_err());
    }

    #[tokio::test]
    async fn test_local_store_upload_exists_list() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("payload.bin");
        std::fs::write(&src, b"0123456789").unwrap();

        let store = LocalStore::new(tmp.path().join("bucket"));
        let key = "scr/processed/ano=2020/scrdata_2020.parquet";
        assert!(!store.exists(key).await.unwrap());

        assert_eq!(store.upload_file(&src, key).await.unwrap(), 10);
        assert!(store.exists(key).await.unwrap());
        store.upload_file(&src, "scr/raw/ano=2020/scrdata_2020.zip").await.unwrap();
        store.upload_file(&src, "other/x").await.unwrap();

        let listed = store.list("scr/", 5).await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "scr/processed/ano=2020/scrdata_2020.parquet",
                "scr/raw/ano=2020/scrdata_2020.zip"
            ]
        );
        assert_eq!(listed[0].size, 10);
        assert_eq!(store.list("scr/", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_store_list_missing_root_is_empty() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path().join("nope"));
        assert!(store.list("", 5).await.unwrap().is_empty());
    }
}
