//! Shared types, error model, and configuration for IndexFlow.
//!
//! This crate is the foundation depended on by all other IndexFlow crates.
//! It provides:
//! - [`IndexFlowError`]: the unified error type
//! - Domain types ([`ConstituentRow`], [`SectorRow`], [`CycleRow`], [`DeltaRecord`])
//! - Configuration ([`AppConfig`], [`SourceConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CatalogConfig, DatePolicy, ScheduleConfig, SourceConfig, SourceEngine,
    SourceSection, StorageBackend, StorageConfig, StorageSection, TransformConfig,
    TransformSection, UploadPolicy, config_dir, config_file_path, expand_home, init_config,
    init_config_at, load_config, load_config_from,
};
pub use error::{IndexFlowError, Result};
pub use types::{
    CollectionDate, ConstituentRow, CycleDataset, CycleRow, DeltaRecord, JoinStats, RawPage,
    RawTable, RunId, RunKind, RunStatus, SectorRow, TableView,
};
