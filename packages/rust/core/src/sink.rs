//! Partitioned refined-zone sink.
//!
//! Delta records are written as one Snappy Parquet object per
//! `(collection_date, entity)` partition:
//!
//! ```text
//! {prefix}/collection_date=<v>/entity=<v>/part-<uuid>.parquet
//! ```
//!
//! Partition values are form-urlencoded. Publishing a partition that already
//! exists replaces its objects, then the table and partition are (re)registered
//! in the catalog.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexflow_shared::{DeltaRecord, Result, StorageConfig, TransformConfig};
use indexflow_storage::columnar::{delta_schema, write_delta};
use indexflow_storage::{BlobStore, Catalog, PartitionSpec, TableSpec, content_hash, object_key};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Partition columns, in path order.
pub const PARTITION_KEYS: [&str; 2] = ["collection_date", "entity"];

/// Outcome of one [`PartitionedSink::publish`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    pub partitions: usize,
    pub rows: usize,
    /// Objects deleted because their partition was rewritten.
    pub replaced: usize,
    pub keys: Vec<String>,
}

pub struct PartitionedSink {
    store: Arc<dyn BlobStore>,
    catalog: Arc<Catalog>,
    bucket: String,
    prefix: String,
    database: String,
    table: String,
}

impl PartitionedSink {
    pub fn new(
        store: Arc<dyn BlobStore>,
        catalog: Arc<Catalog>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            bucket: bucket.into(),
            prefix: prefix.into(),
            database: database.into(),
            table: table.into(),
        }
    }

    /// Sink writing to the configured refined bucket and catalog table.
    pub fn from_config(
        store: Arc<dyn BlobStore>,
        catalog: Arc<Catalog>,
        storage: &StorageConfig,
        transform: &TransformConfig,
    ) -> Self {
        Self::new(
            store,
            catalog,
            &storage.refined_bucket,
            &storage.refined_prefix,
            &transform.catalog_database,
            &transform.catalog_table,
        )
    }

    /// Catalog registration for the sink's table.
    pub fn table_spec(&self) -> TableSpec {
        let columns: Vec<serde_json::Value> = delta_schema()
            .fields()
            .iter()
            .map(|f| {
                serde_json::json!({
                    "name": f.name(),
                    "type": f.data_type().to_string(),
                    "nullable": f.is_nullable(),
                })
            })
            .collect();

        TableSpec {
            database: self.database.clone(),
            name: self.table.clone(),
            location: object_key(Some(&self.bucket), &self.prefix),
            format: "parquet".into(),
            compression: "snappy".into(),
            partition_keys: PARTITION_KEYS.iter().map(|k| k.to_string()).collect(),
            schema_json: serde_json::Value::Array(columns).to_string(),
        }
    }

    /// Write `records`, replacing every partition they touch.
    #[instrument(skip_all, fields(bucket = %self.bucket, table = %self.table, records = records.len()))]
    pub async fn publish(&self, records: &[DeltaRecord]) -> Result<SinkReport> {
        self.catalog.register_table(&self.table_spec()).await?;

        let mut partitions: BTreeMap<(&str, &str), Vec<DeltaRecord>> = BTreeMap::new();
        for record in records {
            partitions
                .entry((record.collection_date.as_str(), record.entity.as_str()))
                .or_default()
                .push(record.clone());
        }

        let mut report = SinkReport::default();
        for ((date, entity), rows) in partitions {
            let values = vec![
                (PARTITION_KEYS[0].to_string(), date.to_string()),
                (PARTITION_KEYS[1].to_string(), entity.to_string()),
            ];
            let dir = partition_dir(&self.prefix, &values);
            let key = format!("{dir}/part-{}.parquet", Uuid::now_v7());

            let body = write_delta(&rows)?;
            let hash = content_hash(&body);

            let existing = self.store.list(&self.bucket, &format!("{dir}/")).await?;
            self.store.put(&self.bucket, &key, body).await?;
            for old in existing.iter().filter(|k| **k != key) {
                if self.store.delete(&self.bucket, old).await? {
                    report.replaced += 1;
                }
                debug!(key = %old, "replaced partition object");
            }

            self.catalog
                .upsert_partition(
                    &self.database,
                    &self.table,
                    &PartitionSpec {
                        values,
                        location: object_key(Some(&self.bucket), &dir),
                        row_count: rows.len() as u64,
                        content_hash: hash,
                    },
                )
                .await?;

            report.partitions += 1;
            report.rows += rows.len();
            report.keys.push(key);
        }

        info!(
            partitions = report.partitions,
            rows = report.rows,
            replaced = report.replaced,
            "refined partitions published"
        );
        Ok(report)
    }
}

/// `prefix/k1=v1/k2=v2` with form-urlencoded values.
pub fn partition_dir(prefix: &str, values: &[(String, String)]) -> String {
    let segments: Vec<String> = values
        .iter()
        .map(|(k, v)| format!("{k}={}", encode(v)))
        .collect();
    object_key(Some(prefix), &segments.join("/"))
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
