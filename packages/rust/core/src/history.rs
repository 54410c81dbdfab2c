//! Accumulated historical dataset: every cycle file under the raw prefix.

use indexflow_shared::{CycleRow, Result};
use indexflow_storage::{BlobStore, read_cycle};
use tracing::{debug, info, instrument};

/// Read every `.parquet` object under `prefix` in `bucket` into one row set.
#[instrument(skip(store), fields(store = store.name()))]
pub async fn load_accumulated(
    store: &dyn BlobStore,
    bucket: &str,
    prefix: Option<&str>,
) -> Result<Vec<CycleRow>> {
    let list_prefix = prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default();

    let keys: Vec<String> = store
        .list(bucket, &list_prefix)
        .await?
        .into_iter()
        .filter(|k| k.ends_with(".parquet"))
        .collect();

    let mut rows = Vec::new();
    for key in &keys {
        let body = store.get(bucket, key).await?;
        let cycle = read_cycle(&body)?;
        debug!(key = %key, rows = cycle.len(), "cycle file loaded");
        rows.extend(cycle);
    }

    info!(files = keys.len(), rows = rows.len(), "accumulated dataset loaded");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use indexflow_shared::IndexFlowError;
    use indexflow_storage::{LocalBlobStore, write_cycle};
    use uuid::Uuid;

    fn row(code: &str, date: &str) -> CycleRow {
        CycleRow {
            code: code.into(),
            name: code.into(),
            asset_type: "ON".into(),
            theoretical_quantity: 1,
            weight_pct: 0.5,
            sector: "S".into(),
            sector_weight_pct: 0.5,
            sector_cum_weight_pct: 0.5,
            collection_date: date.into(),
        }
    }

    fn store() -> LocalBlobStore {
        LocalBlobStore::new(std::env::temp_dir().join(format!("indexflow-history-{}", Uuid::now_v7())))
    }

    #[tokio::test]
    async fn unions_cycle_files_under_prefix() {
        let store = store();
        let a = write_cycle(&[row("A", "01-01-2026")]).unwrap();
        let b = write_cycle(&[row("B", "02-01-2026"), row("C", "02-01-2026")]).unwrap();
        store.put("raw", "cycles/b3-01-01-2026.parquet", a).await.unwrap();
        store.put("raw", "cycles/b3-02-01-2026.parquet", b.clone()).await.unwrap();
        store.put("raw", "cycles/notes.txt", Bytes::from_static(b"x")).await.unwrap();
        store.put("raw", "other/b3-03-01-2026.parquet", b).await.unwrap();

        let rows = load_accumulated(&store, "raw", Some("cycles")).await.unwrap();
        let codes: Vec<&str> = rows.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["A", "B", "C"]);

        let all = load_accumulated(&store, "raw", None).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn empty_bucket_yields_no_rows() {
        let rows = load_accumulated(&store(), "raw", None).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_storage_error() {
        let store = store();
        store
            .put("raw", "b3-01-01-2026.parquet", Bytes::from_static(b"not parquet"))
            .await
            .unwrap();
        let err = load_accumulated(&store, "raw", None).await.unwrap_err();
        assert!(matches!(err, IndexFlowError::Storage(_)));
    }
}
