//! Persistence for IndexFlow.
//!
//! - [`BlobStore`]: opaque object storage (`put`/`get`/`delete`/`list`) with a
//!   local-directory backend and, behind the `s3` feature, Amazon S3
//! - [`columnar`]: Parquet codec for cycle datasets and delta records
//! - [`Catalog`]: libSQL database of registered tables, partitions,
//!   data-quality results and pipeline runs

pub mod blob;
pub mod catalog;
pub mod columnar;
mod migrations;
#[cfg(feature = "s3")]
pub mod s3;

pub use blob::{BlobStore, LocalBlobStore, object_key, open_blob_store, upload_artifact};
pub use catalog::{
    Catalog, PartitionEntry, PartitionSpec, QualityEntry, RunRecord, TableEntry, TableSpec,
};
pub use columnar::{
    content_hash, cycle_schema, delta_schema, read_cycle, read_delta, write_cycle, write_delta,
};
#[cfg(feature = "s3")]
pub use s3::S3BlobStore;
