//! Dataset writer/publisher: one Parquet file per collection cycle, uploaded to
//! the raw bucket.

use std::path::{Path, PathBuf};

use indexflow_shared::{CycleDataset, IndexFlowError, Result, StorageConfig, UploadPolicy};
use indexflow_storage::{BlobStore, upload_artifact, write_cycle};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

/// Result of publishing one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub file_name: String,
    pub rows: usize,
    pub size: usize,
    /// Object key written, when the upload succeeded.
    pub key: Option<String>,
    /// Upload failure swallowed under [`UploadPolicy::Ignore`].
    pub upload_error: Option<String>,
}

/// Local file that is removed when dropped.
struct LocalArtifact {
    path: PathBuf,
}

impl LocalArtifact {
    async fn write(path: PathBuf, body: &[u8]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexFlowError::io(parent, e))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| IndexFlowError::io(&path, e))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LocalArtifact {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove local artifact");
        }
    }
}

/// Serialize `dataset`, upload it to the raw bucket and delete the local file.
///
/// Upload failures follow `config.on_upload_error`: `Ignore` logs and records
/// the error in the outcome, `Fail` returns it.
#[instrument(skip_all, fields(date = %dataset.collection_date, rows = dataset.rows.len()))]
pub async fn publish_cycle(
    dataset: &CycleDataset,
    store: &dyn BlobStore,
    config: &StorageConfig,
) -> Result<PublishOutcome> {
    let file_name = dataset.file_name(&config.file_prefix);
    let body = write_cycle(&dataset.rows)?;
    let size = body.len();

    let artifact = LocalArtifact::write(config.work_dir.join(&file_name), &body).await?;
    info!(path = %artifact.path().display(), size, "cycle dataset written");

    let uploaded = upload_artifact(
        store,
        artifact.path(),
        &config.raw_bucket,
        None,
        config.raw_prefix.as_deref(),
    )
    .await;
    drop(artifact);

    let mut outcome = PublishOutcome {
        file_name,
        rows: dataset.rows.len(),
        size,
        key: None,
        upload_error: None,
    };

    match uploaded {
        Ok(key) => outcome.key = Some(key),
        Err(e) => match config.on_upload_error {
            UploadPolicy::Ignore => {
                error!(bucket = %config.raw_bucket, error = %e, "upload failed, continuing");
                outcome.upload_error = Some(e.to_string());
            }
            UploadPolicy::Fail => return Err(e),
        },
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use indexflow_shared::{CollectionDate, CycleRow, JoinStats, StorageBackend};
    use indexflow_storage::{LocalBlobStore, read_cycle};
    use uuid::Uuid;

    struct FailingStore;

    #[async_trait]
    impl BlobStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }
        async fn put(&self, bucket: &str, key: &str, _body: Bytes) -> Result<()> {
            Err(IndexFlowError::Storage(format!("{bucket}/{key}: access denied")))
        }
        async fn get(&self, _bucket: &str, _key: &str) -> Result<Bytes> {
            Err(IndexFlowError::Storage("unavailable".into()))
        }
        async fn delete(&self, _bucket: &str, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn list(&self, _bucket: &str, _prefix: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn config(root: &Path, policy: UploadPolicy) -> StorageConfig {
        StorageConfig {
            backend: StorageBackend::Local,
            root: root.join("blobs"),
            raw_bucket: "raw".into(),
            raw_prefix: Some("cycles".into()),
            refined_bucket: "refined".into(),
            refined_prefix: "bovespa_etl".into(),
            file_prefix: "b3".into(),
            work_dir: root.join("work"),
            on_upload_error: policy,
        }
    }

    fn dataset() -> CycleDataset {
        CycleDataset {
            collection_date: CollectionDate::from_ymd(2026, 1, 2).unwrap(),
            rows: vec![CycleRow {
                code: "VALE3".into(),
                name: "VALE".into(),
                asset_type: "ON NM".into(),
                theoretical_quantity: 4_196_924_316,
                weight_pct: 11.125,
                sector: "Materiais Básicos".into(),
                sector_weight_pct: 11.125,
                sector_cum_weight_pct: 14.2,
                collection_date: "02-01-2026".into(),
            }],
            join: JoinStats::default(),
        }
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("indexflow-publish-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn uploads_and_removes_local_file() {
        let root = temp_root();
        let config = config(&root, UploadPolicy::Ignore);
        let store = LocalBlobStore::new(&config.root);

        let outcome = publish_cycle(&dataset(), &store, &config).await.unwrap();
        assert_eq!(outcome.file_name, "b3-02-01-2026.parquet");
        assert_eq!(outcome.key.as_deref(), Some("cycles/b3-02-01-2026.parquet"));
        assert!(outcome.upload_error.is_none());
        assert!(!config.work_dir.join(&outcome.file_name).exists());

        let body = store.get("raw", "cycles/b3-02-01-2026.parquet").await.unwrap();
        assert_eq!(read_cycle(&body).unwrap(), dataset().rows);
    }

    #[tokio::test]
    async fn upload_failure_is_swallowed_by_default() {
        let root = temp_root();
        let config = config(&root, UploadPolicy::Ignore);

        let outcome = publish_cycle(&dataset(), &FailingStore, &config).await.unwrap();
        assert!(outcome.key.is_none());
        assert!(outcome.upload_error.unwrap().contains("access denied"));
        assert!(!config.work_dir.join("b3-02-01-2026.parquet").exists());
    }

    #[tokio::test]
    async fn upload_failure_propagates_when_requested() {
        let root = temp_root();
        let config = config(&root, UploadPolicy::Fail);

        let err = publish_cycle(&dataset(), &FailingStore, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexFlowError::Storage(_)));
        assert!(!config.work_dir.join("b3-02-01-2026.parquet").exists());
    }
}
