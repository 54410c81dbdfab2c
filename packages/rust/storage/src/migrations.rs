//! SQL migration definitions for the IndexFlow catalog database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Catalog schema: tables, partitions, quality results",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Registered tables
CREATE TABLE IF NOT EXISTS catalog_tables (
    database       TEXT NOT NULL,
    name           TEXT NOT NULL,
    location       TEXT NOT NULL,
    format         TEXT NOT NULL,
    compression    TEXT NOT NULL,
    partition_keys TEXT NOT NULL,
    schema_json    TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    PRIMARY KEY (database, name)
);

-- One row per partition, keyed by its ordered partition values
CREATE TABLE IF NOT EXISTS catalog_partitions (
    database     TEXT NOT NULL,
    table_name   TEXT NOT NULL,
    values_json  TEXT NOT NULL,
    location     TEXT NOT NULL,
    row_count    INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    PRIMARY KEY (database, table_name, values_json),
    FOREIGN KEY (database, table_name)
        REFERENCES catalog_tables(database, name) ON DELETE CASCADE
);

-- Data-quality evaluations
CREATE TABLE IF NOT EXISTS quality_results (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id       TEXT NOT NULL,
    database     TEXT NOT NULL,
    table_name   TEXT NOT NULL,
    passed       INTEGER NOT NULL,
    details_json TEXT NOT NULL,
    evaluated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quality_table ON quality_results(database, table_name);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Pipeline run ledger",
            sql: r#"
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    status      TEXT NOT NULL,
    message     TEXT,
    stats_json  TEXT,
    started_at  TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_pipeline_runs_started ON pipeline_runs(started_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
