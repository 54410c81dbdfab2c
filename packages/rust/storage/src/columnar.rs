//! Parquet encoding/decoding of cycle datasets and delta records.
//!
//! Cycle schema (one file per collection cycle):
//! `code, name, type, theoretical_quantity, weight_pct, sector,
//! sector_weight_pct, sector_cum_weight_pct, collection_date`.
//!
//! Delta schema (refined partitions):
//! `entity, sector, collection_date, quantity_total, quantity_total_previous,
//! diff_quantity`.
//!
//! All files are Snappy-compressed.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, DictionaryArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use indexflow_shared::{CycleRow, DeltaRecord, IndexFlowError, Result};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use sha2::{Digest, Sha256};

/// Column names of the cycle schema.
pub mod cycle_columns {
    pub const CODE: &str = "code";
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const THEORETICAL_QUANTITY: &str = "theoretical_quantity";
    pub const WEIGHT_PCT: &str = "weight_pct";
    pub const SECTOR: &str = "sector";
    pub const SECTOR_WEIGHT_PCT: &str = "sector_weight_pct";
    pub const SECTOR_CUM_WEIGHT_PCT: &str = "sector_cum_weight_pct";
    pub const COLLECTION_DATE: &str = "collection_date";
}

/// Column names of the delta schema.
pub mod delta_columns {
    pub const ENTITY: &str = "entity";
    pub const SECTOR: &str = "sector";
    pub const COLLECTION_DATE: &str = "collection_date";
    pub const QUANTITY_TOTAL: &str = "quantity_total";
    pub const QUANTITY_TOTAL_PREVIOUS: &str = "quantity_total_previous";
    pub const DIFF_QUANTITY: &str = "diff_quantity";
}

// ============================================================================
// Schemas
// ============================================================================

pub fn cycle_schema() -> SchemaRef {
    use cycle_columns::*;
    Arc::new(Schema::new(vec![
        Field::new(CODE, DataType::Utf8, false),
        Field::new(NAME, DataType::Utf8, false),
        Field::new(
            TYPE,
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
            false,
        ),
        Field::new(THEORETICAL_QUANTITY, DataType::Int64, false),
        Field::new(WEIGHT_PCT, DataType::Float64, false),
        Field::new(SECTOR, DataType::Utf8, false),
        Field::new(SECTOR_WEIGHT_PCT, DataType::Float64, false),
        Field::new(SECTOR_CUM_WEIGHT_PCT, DataType::Float64, false),
        Field::new(COLLECTION_DATE, DataType::Utf8, false),
    ]))
}

pub fn delta_schema() -> SchemaRef {
    use delta_columns::*;
    Arc::new(Schema::new(vec![
        Field::new(ENTITY, DataType::Utf8, false),
        Field::new(SECTOR, DataType::Utf8, false),
        Field::new(COLLECTION_DATE, DataType::Utf8, false),
        Field::new(QUANTITY_TOTAL, DataType::Int64, false),
        Field::new(QUANTITY_TOTAL_PREVIOUS, DataType::Int64, true),
        Field::new(DIFF_QUANTITY, DataType::Int64, false),
    ]))
}

// ============================================================================
// Batches
// ============================================================================

pub fn cycle_batch(rows: &[CycleRow]) -> Result<RecordBatch> {
    let types: DictionaryArray<Int32Type> = rows.iter().map(|r| r.asset_type.as_str()).collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.code))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.name))),
        Arc::new(types),
        Arc::new(Int64Array::from_iter_values(
            rows.iter().map(|r| r.theoretical_quantity),
        )),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.weight_pct))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.sector))),
        Arc::new(Float64Array::from_iter_values(
            rows.iter().map(|r| r.sector_weight_pct),
        )),
        Arc::new(Float64Array::from_iter_values(
            rows.iter().map(|r| r.sector_cum_weight_pct),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| &r.collection_date),
        )),
    ];

    RecordBatch::try_new(cycle_schema(), columns)
        .map_err(|e| IndexFlowError::validation(format!("cycle batch: {e}")))
}

pub fn delta_batch(records: &[DeltaRecord]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| &r.entity))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| &r.sector))),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| &r.collection_date),
        )),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.quantity_total),
        )),
        Arc::new(Int64Array::from(
            records
                .iter()
                .map(|r| r.quantity_total_previous)
                .collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.diff_quantity),
        )),
    ];

    RecordBatch::try_new(delta_schema(), columns)
        .map_err(|e| IndexFlowError::validation(format!("delta batch: {e}")))
}

// ============================================================================
// Writers
// ============================================================================

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_created_by(concat!("indexflow ", env!("CARGO_PKG_VERSION")).to_string())
        .build()
}

/// Encode one batch as a Snappy-compressed Parquet file.
pub fn write_batch(batch: &RecordBatch) -> Result<Bytes> {
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(writer_properties()))
        .map_err(|e| IndexFlowError::Storage(format!("parquet writer init failed: {e}")))?;
    writer
        .write(batch)
        .map_err(|e| IndexFlowError::Storage(format!("parquet write failed: {e}")))?;
    writer
        .close()
        .map_err(|e| IndexFlowError::Storage(format!("parquet close failed: {e}")))?;
    Ok(Bytes::from(buf))
}

pub fn write_cycle(rows: &[CycleRow]) -> Result<Bytes> {
    write_batch(&cycle_batch(rows)?)
}

pub fn write_delta(records: &[DeltaRecord]) -> Result<Bytes> {
    write_batch(&delta_batch(records)?)
}

// ============================================================================
// Readers
// ============================================================================

pub fn read_batches(bytes: &Bytes) -> Result<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
        .map_err(|e| IndexFlowError::Storage(format!("parquet reader init failed: {e}")))?
        .build()
        .map_err(|e| IndexFlowError::Storage(format!("parquet reader build failed: {e}")))?;

    reader
        .map(|batch| {
            batch.map_err(|e| IndexFlowError::Storage(format!("parquet read batch failed: {e}")))
        })
        .collect()
}

pub fn read_cycle(bytes: &Bytes) -> Result<Vec<CycleRow>> {
    use cycle_columns::*;

    let mut out = Vec::new();
    for batch in read_batches(bytes)? {
        let code = col_string(&batch, CODE)?;
        let name = col_string(&batch, NAME)?;
        let types = col_as_utf8(&batch, TYPE)?;
        let types = downcast::<StringArray>(&types, TYPE)?;
        let quantity = col::<Int64Array>(&batch, THEORETICAL_QUANTITY)?;
        let weight = col::<Float64Array>(&batch, WEIGHT_PCT)?;
        let sector = col_string(&batch, SECTOR)?;
        let sector_weight = col::<Float64Array>(&batch, SECTOR_WEIGHT_PCT)?;
        let sector_cum = col::<Float64Array>(&batch, SECTOR_CUM_WEIGHT_PCT)?;
        let date = col_string(&batch, COLLECTION_DATE)?;

        for row in 0..batch.num_rows() {
            out.push(CycleRow {
                code: code.value(row).to_string(),
                name: name.value(row).to_string(),
                asset_type: types.value(row).to_string(),
                theoretical_quantity: quantity.value(row),
                weight_pct: weight.value(row),
                sector: sector.value(row).to_string(),
                sector_weight_pct: sector_weight.value(row),
                sector_cum_weight_pct: sector_cum.value(row),
                collection_date: date.value(row).to_string(),
            });
        }
    }
    Ok(out)
}

pub fn read_delta(bytes: &Bytes) -> Result<Vec<DeltaRecord>> {
    use delta_columns::*;

    let mut out = Vec::new();
    for batch in read_batches(bytes)? {
        let entity = col_string(&batch, ENTITY)?;
        let sector = col_string(&batch, SECTOR)?;
        let date = col_string(&batch, COLLECTION_DATE)?;
        let total = col::<Int64Array>(&batch, QUANTITY_TOTAL)?;
        let previous = col::<Int64Array>(&batch, QUANTITY_TOTAL_PREVIOUS)?;
        let diff = col::<Int64Array>(&batch, DIFF_QUANTITY)?;

        for row in 0..batch.num_rows() {
            out.push(DeltaRecord {
                entity: entity.value(row).to_string(),
                sector: sector.value(row).to_string(),
                collection_date: date.value(row).to_string(),
                quantity_total: total.value(row),
                quantity_total_previous: (!previous.is_null(row)).then(|| previous.value(row)),
                diff_quantity: diff.value(row),
            });
        }
    }
    Ok(out)
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|e| IndexFlowError::validation(format!("missing column '{name}': {e}")))?;
    Ok(batch.column(idx))
}

fn downcast<'a, T: Array + 'static>(array: &'a ArrayRef, name: &str) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        IndexFlowError::validation(format!(
            "column '{name}' has unexpected type {}",
            array.data_type()
        ))
    })
}

fn col<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    downcast::<T>(column(batch, name)?, name)
}

fn col_string<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    col::<StringArray>(batch, name)
}

/// Column cast to plain UTF-8 (categorical columns are dictionary-encoded).
fn col_as_utf8(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    arrow::compute::cast(column(batch, name)?, &DataType::Utf8)
        .map_err(|e| IndexFlowError::validation(format!("column '{name}': {e}")))
}
