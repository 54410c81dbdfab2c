//! Catalog database on libSQL (offline mode).
//!
//! The [`Catalog`] records registered tables and their partitions, the outcome
//! of data-quality evaluations, and a ledger of pipeline runs.

use std::path::Path;

use chrono::Utc;
use indexflow_shared::{IndexFlowError, Result, RunId, RunKind, RunStatus};
use libsql::{Connection, Database, Row, params};
use serde::{Deserialize, Serialize};

use crate::migrations;

fn catalog_err(e: impl std::fmt::Display) -> IndexFlowError {
    IndexFlowError::Catalog(e.to_string())
}

/// A table to register (or re-register) in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub database: String,
    pub name: String,
    /// `bucket/prefix` the partitions live under.
    pub location: String,
    pub format: String,
    pub compression: String,
    pub partition_keys: Vec<String>,
    /// Column list as JSON (`[{"name", "type", "nullable"}]`).
    pub schema_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    #[serde(flatten)]
    pub spec: TableSpec,
    pub created_at: String,
    pub updated_at: String,
}

/// One partition of a registered table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// `(key, value)` pairs in partition-key order.
    pub values: Vec<(String, String)>,
    pub location: String,
    pub row_count: u64,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    #[serde(flatten)]
    pub spec: PartitionSpec,
    pub updated_at: String,
}

/// Stored outcome of one quality evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityEntry {
    pub run_id: String,
    pub database: String,
    pub table: String,
    pub passed: bool,
    pub details_json: String,
    pub evaluated_at: String,
}

/// One row of the pipeline run ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub kind: RunKind,
    pub status: RunStatus,
    pub message: Option<String>,
    pub stats_json: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Catalog handle wrapping a libSQL database.
pub struct Catalog {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Catalog {
    /// Open or create the catalog at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexFlowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(catalog_err)?;
        let conn = db.connect().map_err(catalog_err)?;

        let catalog = Self { db, conn };
        catalog.run_migrations().await?;
        Ok(catalog)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    IndexFlowError::Catalog(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    /// Insert or update a table definition. `created_at` survives updates.
    pub async fn register_table(&self, spec: &TableSpec) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let keys = serde_json::to_string(&spec.partition_keys).map_err(catalog_err)?;
        self.conn
            .execute(
                "INSERT INTO catalog_tables
                   (database, name, location, format, compression, partition_keys, schema_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(database, name) DO UPDATE SET
                   location = excluded.location,
                   format = excluded.format,
                   compression = excluded.compression,
                   partition_keys = excluded.partition_keys,
                   schema_json = excluded.schema_json,
                   updated_at = excluded.updated_at",
                params![
                    spec.database.as_str(),
                    spec.name.as_str(),
                    spec.location.as_str(),
                    spec.format.as_str(),
                    spec.compression.as_str(),
                    keys,
                    spec.schema_json.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(catalog_err)?;
        Ok(())
    }

    pub async fn get_table(&self, database: &str, name: &str) -> Result<Option<TableEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT database, name, location, format, compression, partition_keys, schema_json,
                        created_at, updated_at
                 FROM catalog_tables WHERE database = ?1 AND name = ?2",
                params![database, name],
            )
            .await
            .map_err(catalog_err)?;

        match rows.next().await.map_err(catalog_err)? {
            Some(row) => Ok(Some(row_to_table(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_tables(&self) -> Result<Vec<TableEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT database, name, location, format, compression, partition_keys, schema_json,
                        created_at, updated_at
                 FROM catalog_tables ORDER BY database, name",
                params![],
            )
            .await
            .map_err(catalog_err)?;

        let mut tables = Vec::new();
        while let Some(row) = rows.next().await.map_err(catalog_err)? {
            tables.push(row_to_table(&row)?);
        }
        Ok(tables)
    }

    // -----------------------------------------------------------------------
    // Partitions
    // -----------------------------------------------------------------------

    /// Insert or replace the partition identified by its values.
    pub async fn upsert_partition(
        &self,
        database: &str,
        table: &str,
        partition: &PartitionSpec,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let values = serde_json::to_string(&partition.values).map_err(catalog_err)?;
        let row_count = i64::try_from(partition.row_count).map_err(catalog_err)?;
        self.conn
            .execute(
                "INSERT INTO catalog_partitions
                   (database, table_name, values_json, location, row_count, content_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(database, table_name, values_json) DO UPDATE SET
                   location = excluded.location,
                   row_count = excluded.row_count,
                   content_hash = excluded.content_hash,
                   updated_at = excluded.updated_at",
                params![
                    database,
                    table,
                    values,
                    partition.location.as_str(),
                    row_count,
                    partition.content_hash.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(catalog_err)?;
        Ok(())
    }

    pub async fn list_partitions(&self, database: &str, table: &str) -> Result<Vec<PartitionEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT values_json, location, row_count, content_hash, updated_at
                 FROM catalog_partitions
                 WHERE database = ?1 AND table_name = ?2
                 ORDER BY values_json",
                params![database, table],
            )
            .await
            .map_err(catalog_err)?;

        let mut partitions = Vec::new();
        while let Some(row) = rows.next().await.map_err(catalog_err)? {
            let values_json: String = row.get(0).map_err(catalog_err)?;
            partitions.push(PartitionEntry {
                spec: PartitionSpec {
                    values: serde_json::from_str(&values_json).map_err(catalog_err)?,
                    location: row.get::<String>(1).map_err(catalog_err)?,
                    row_count: row.get::<i64>(2).map_err(catalog_err)?.max(0) as u64,
                    content_hash: row.get::<String>(3).map_err(catalog_err)?,
                },
                updated_at: row.get::<String>(4).map_err(catalog_err)?,
            });
        }
        Ok(partitions)
    }

    // -----------------------------------------------------------------------
    // Quality results
    // -----------------------------------------------------------------------

    pub async fn record_quality(
        &self,
        run_id: &RunId,
        database: &str,
        table: &str,
        passed: bool,
        details_json: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO quality_results (run_id, database, table_name, passed, details_json, evaluated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id.to_string(),
                    database,
                    table,
                    i64::from(passed),
                    details_json,
                    now.as_str(),
                ],
            )
            .await
            .map_err(catalog_err)?;
        Ok(())
    }

    /// Most recent quality evaluations for a table, newest first.
    pub async fn quality_results(
        &self,
        database: &str,
        table: &str,
        limit: u32,
    ) -> Result<Vec<QualityEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, database, table_name, passed, details_json, evaluated_at
                 FROM quality_results
                 WHERE database = ?1 AND table_name = ?2
                 ORDER BY id DESC LIMIT ?3",
                params![database, table, limit],
            )
            .await
            .map_err(catalog_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(catalog_err)? {
            results.push(QualityEntry {
                run_id: row.get::<String>(0).map_err(catalog_err)?,
                database: row.get::<String>(1).map_err(catalog_err)?,
                table: row.get::<String>(2).map_err(catalog_err)?,
                passed: row.get::<i64>(3).map_err(catalog_err)? != 0,
                details_json: row.get::<String>(4).map_err(catalog_err)?,
                evaluated_at: row.get::<String>(5).map_err(catalog_err)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Run ledger
    // -----------------------------------------------------------------------

    /// Record the start of a run. Returns its ID.
    pub async fn start_run(&self, kind: RunKind) -> Result<RunId> {
        let id = RunId::new();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (id, kind, status, started_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), kind.as_str(), RunStatus::Running.as_str(), now.as_str()],
            )
            .await
            .map_err(catalog_err)?;
        Ok(id)
    }

    pub async fn finish_run(
        &self,
        id: &RunId,
        status: RunStatus,
        message: &str,
        stats_json: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE pipeline_runs
                 SET status = ?1, message = ?2, stats_json = ?3, finished_at = ?4
                 WHERE id = ?5",
                params![status.as_str(), message, stats_json, now.as_str(), id.to_string()],
            )
            .await
            .map_err(catalog_err)?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, status, message, stats_json, started_at, finished_at
                 FROM pipeline_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(catalog_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(catalog_err)? {
            let kind: String = row.get(1).map_err(catalog_err)?;
            let status: String = row.get(2).map_err(catalog_err)?;
            runs.push(RunRecord {
                id: row.get::<String>(0).map_err(catalog_err)?,
                kind: kind.parse().map_err(catalog_err)?,
                status: status.parse().map_err(catalog_err)?,
                message: row.get::<String>(3).ok(),
                stats_json: row.get::<String>(4).ok(),
                started_at: row.get::<String>(5).map_err(catalog_err)?,
                finished_at: row.get::<String>(6).ok(),
            });
        }
        Ok(runs)
    }
}

fn row_to_table(row: &Row) -> Result<TableEntry> {
    let keys: String = row.get(5).map_err(catalog_err)?;
    Ok(TableEntry {
        spec: TableSpec {
            database: row.get::<String>(0).map_err(catalog_err)?,
            name: row.get::<String>(1).map_err(catalog_err)?,
            location: row.get::<String>(2).map_err(catalog_err)?,
            format: row.get::<String>(3).map_err(catalog_err)?,
            compression: row.get::<String>(4).map_err(catalog_err)?,
            partition_keys: serde_json::from_str(&keys).map_err(catalog_err)?,
            schema_json: row.get::<String>(6).map_err(catalog_err)?,
        },
        created_at: row.get::<String>(7).map_err(catalog_err)?,
        updated_at: row.get::<String>(8).map_err(catalog_err)?,
    })
}
