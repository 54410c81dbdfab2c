//! Blob store interface and the local-directory backend.
//!
//! A blob store holds opaque objects addressed by `(bucket, key)`. Keys use `/`
//! as separator regardless of backend.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use indexflow_shared::{IndexFlowError, Result, StorageBackend, StorageConfig};
use tracing::{debug, info, instrument};

/// Object storage collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Store `body` at `bucket/key`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()>;

    /// Fetch the object at `bucket/key`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Delete `bucket/key`. Returns `false` when the backend knows there was
    /// nothing to delete.
    async fn delete(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Keys in `bucket` starting with `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// Join an optional prefix and a name into an object key.
pub fn object_key(prefix: Option<&str>, name: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}/{}", name.trim_start_matches('/')),
        None => name.trim_start_matches('/').to_string(),
    }
}

/// Upload a local file. The key is `object_name` (default: the file name),
/// under `prefix` when given. Returns the key written.
#[instrument(skip(store, local_path), fields(store = store.name(), path = %local_path.display()))]
pub async fn upload_artifact(
    store: &dyn BlobStore,
    local_path: &Path,
    bucket: &str,
    object_name: Option<&str>,
    prefix: Option<&str>,
) -> Result<String> {
    let name = match object_name {
        Some(name) => name.to_string(),
        None => local_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                IndexFlowError::Storage(format!(
                    "cannot derive object name from {}",
                    local_path.display()
                ))
            })?,
    };
    let key = object_key(prefix, &name);

    let body = tokio::fs::read(local_path)
        .await
        .map_err(|e| IndexFlowError::Storage(format!("{}: {e}", local_path.display())))?;
    let size = body.len();

    store.put(bucket, &key, Bytes::from(body)).await?;
    info!(bucket, key = %key, size, "artifact uploaded");
    Ok(key)
}

/// Open the backend selected by configuration.
pub async fn open_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalBlobStore::new(&config.root))),
        #[cfg(feature = "s3")]
        StorageBackend::S3 => Ok(Arc::new(crate::s3::S3BlobStore::from_env().await)),
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => Err(IndexFlowError::config(
            "the s3 backend is not compiled in; rebuild with the `s3` feature",
        )),
    }
}

// ---------------------------------------------------------------------------
// LocalBlobStore
// ---------------------------------------------------------------------------

/// One directory per bucket under `root`; keys map to relative paths.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(IndexFlowError::Storage(format!("invalid bucket name '{bucket}'")));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(IndexFlowError::Storage(format!("invalid object key '{key}'")));
        }
        Ok(self.bucket_dir(bucket)?.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexFlowError::Storage(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| IndexFlowError::Storage(format!("{}: {e}", path.display())))?;
        debug!(bucket, key, size = body.len(), "object written");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| IndexFlowError::Storage(format!("{bucket}/{key}: {e}")))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(bucket, key, "object deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(IndexFlowError::Storage(format!("{bucket}/{key}: {e}"))),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let dir = self.bucket_dir(bucket)?;
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .map_err(|e| IndexFlowError::Storage(format!("{}: {e}", current.display())))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| IndexFlowError::Storage(format!("{}: {e}", current.display())))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| IndexFlowError::Storage(format!("{}: {e}", path.display())))?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&dir) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn temp_store() -> LocalBlobStore {
        LocalBlobStore::new(std::env::temp_dir().join(format!("if_blob_{}", Uuid::now_v7())))
    }

    #[test]
    fn object_key_joins_prefix() {
        assert_eq!(object_key(None, "b3-18-10-2026.parquet"), "b3-18-10-2026.parquet");
        assert_eq!(object_key(Some("raw/"), "f.parquet"), "raw/f.parquet");
        assert_eq!(object_key(Some(""), "f.parquet"), "f.parquet");
    }

    #[tokio::test]
    async fn put_get_list_delete() {
        let store = temp_store();
        store
            .put("raw", "daily/a.parquet", Bytes::from_static(b"a"))
            .await
            .unwrap();
        store
            .put("raw", "daily/b.parquet", Bytes::from_static(b"bb"))
            .await
            .unwrap();
        store
            .put("raw", "other/c.parquet", Bytes::from_static(b"c"))
            .await
            .unwrap();

        assert_eq!(store.get("raw", "daily/b.parquet").await.unwrap(), Bytes::from_static(b"bb"));
        assert_eq!(
            store.list("raw", "daily/").await.unwrap(),
            vec!["daily/a.parquet", "daily/b.parquet"]
        );
        assert_eq!(store.list("raw", "").await.unwrap().len(), 3);

        assert!(store.delete("raw", "daily/a.parquet").await.unwrap());
        assert!(!store.delete("raw", "daily/a.parquet").await.unwrap());
        assert!(store.get("raw", "daily/a.parquet").await.is_err());

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn missing_bucket_lists_empty() {
        let store = temp_store();
        assert!(store.list("nothing-here", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let store = temp_store();
        let err = store
            .put("raw", "../escape", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexFlowError::Storage(_)));
        assert!(store.put("../raw", "k", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn upload_derives_key_from_file_name() {
        let store = temp_store();
        let dir = std::env::temp_dir().join(format!("if_art_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("b3-18-10-2026.parquet");
        std::fs::write(&file, b"PAR1").unwrap();

        let key = upload_artifact(&store, &file, "valteci-b3-raw", None, Some("daily"))
            .await
            .unwrap();
        assert_eq!(key, "daily/b3-18-10-2026.parquet");
        assert_eq!(
            store.get("valteci-b3-raw", &key).await.unwrap(),
            Bytes::from_static(b"PAR1")
        );

        let renamed = upload_artifact(&store, &file, "valteci-b3-raw", Some("x.parquet"), None)
            .await
            .unwrap();
        assert_eq!(renamed, "x.parquet");

        let _ = std::fs::remove_dir_all(&dir);
        let _ = std::fs::remove_dir_all(store.root());
    }

    #[tokio::test]
    async fn upload_of_missing_file_is_storage_error() {
        let store = temp_store();
        let err = upload_artifact(&store, Path::new("/nonexistent/f.parquet"), "raw", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexFlowError::Storage(_)));
    }
}
