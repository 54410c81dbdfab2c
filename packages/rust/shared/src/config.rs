//! Application configuration for IndexFlow.
//!
//! User config lives at `~/.indexflow/indexflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndexFlowError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "indexflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".indexflow";

/// IBOV composition page on the B3 listings site.
const DEFAULT_SOURCE_URL: &str =
    "https://sistemaswebb3-listados.b3.com.br/indexPage/day/IBOV?language=pt-br";

// ---------------------------------------------------------------------------
// Config structs (matching indexflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote table source.
    #[serde(default)]
    pub source: SourceSection,

    /// Blob storage and artifact naming.
    #[serde(default)]
    pub storage: StorageSection,

    /// Aggregation and quality gate.
    #[serde(default)]
    pub transform: TransformSection,

    /// Catalog database.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Periodic runner.
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// How remote pages are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceEngine {
    /// Headless Chrome; required for the live site, which renders client-side.
    Browser,
    /// Plain HTTP GET per page; for static mirrors of the table.
    Http,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(default = "default_source_url")]
    pub url: String,

    #[serde(default = "default_engine")]
    pub engine: SourceEngine,

    /// Known pagination depth of the source table.
    #[serde(default = "default_page_count")]
    pub page_count: usize,

    /// Upper bound for every element wait.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// Pause after activating a pager control, letting the table re-render.
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,

    /// XPath of the page-selector control; `{page}` is replaced by the page number.
    #[serde(default = "default_pager_xpath")]
    pub pager_xpath: String,

    #[serde(default = "default_table_selector")]
    pub table_selector: String,

    /// `<select>` controlling the table grouping (sector view).
    #[serde(default = "default_segment_selector")]
    pub segment_selector: String,

    /// Option value of the segment select that groups by sector.
    #[serde(default = "default_segment_value")]
    pub segment_value: String,

    /// Query parameter carrying the page number (http engine).
    #[serde(default = "default_page_param")]
    pub page_param: String,

    /// Query parameter carrying the segment value (http engine).
    #[serde(default = "default_segment_param")]
    pub segment_param: String,

    #[serde(default = "default_true")]
    pub headless: bool,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            engine: default_engine(),
            page_count: default_page_count(),
            wait_timeout_secs: default_wait_timeout_secs(),
            settle_millis: default_settle_millis(),
            pager_xpath: default_pager_xpath(),
            table_selector: default_table_selector(),
            segment_selector: default_segment_selector(),
            segment_value: default_segment_value(),
            page_param: default_page_param(),
            segment_param: default_segment_param(),
            headless: true,
        }
    }
}

fn default_source_url() -> String {
    DEFAULT_SOURCE_URL.into()
}
fn default_engine() -> SourceEngine {
    SourceEngine::Browser
}
fn default_page_count() -> usize {
    5
}
fn default_wait_timeout_secs() -> u64 {
    10
}
fn default_settle_millis() -> u64 {
    2000
}
fn default_pager_xpath() -> String {
    "//ul[contains(@class, 'ngx-pagination')]/li/a[span[text()='{page}']]".into()
}
fn default_table_selector() -> String {
    "table".into()
}
fn default_segment_selector() -> String {
    "#segment".into()
}
fn default_segment_value() -> String {
    "2".into()
}
fn default_page_param() -> String {
    "page".into()
}
fn default_segment_param() -> String {
    "segment".into()
}
fn default_true() -> bool {
    true
}

/// Where blobs live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// A directory per bucket under `storage.root`.
    Local,
    /// Amazon S3, credentials from the default AWS provider chain.
    S3,
}

/// What a caller does with a failed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPolicy {
    /// Log the failure and carry on.
    Ignore,
    /// Fail the run.
    Fail,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Root directory of the local backend.
    #[serde(default = "default_storage_root")]
    pub root: String,

    /// Bucket receiving one columnar file per collection cycle.
    #[serde(default = "default_raw_bucket")]
    pub raw_bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_prefix: Option<String>,

    /// Bucket receiving the partitioned delta table.
    #[serde(default = "default_refined_bucket")]
    pub refined_bucket: String,

    #[serde(default = "default_refined_prefix")]
    pub refined_prefix: String,

    /// File name prefix of cycle artifacts (`<prefix>-DD-MM-YYYY.parquet`).
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Directory where cycle artifacts are staged before upload.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    #[serde(default = "default_upload_policy")]
    pub on_upload_error: UploadPolicy,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: default_storage_root(),
            raw_bucket: default_raw_bucket(),
            raw_prefix: None,
            refined_bucket: default_refined_bucket(),
            refined_prefix: default_refined_prefix(),
            file_prefix: default_file_prefix(),
            work_dir: default_work_dir(),
            on_upload_error: default_upload_policy(),
        }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::Local
}
fn default_storage_root() -> String {
    "~/indexflow-data".into()
}
fn default_raw_bucket() -> String {
    "valteci-b3-raw".into()
}
fn default_refined_bucket() -> String {
    "valteci-b3-refined".into()
}
fn default_refined_prefix() -> String {
    "bovespa_etl".into()
}
fn default_file_prefix() -> String {
    "b3".into()
}
fn default_work_dir() -> String {
    ".".into()
}
fn default_upload_policy() -> UploadPolicy {
    UploadPolicy::Ignore
}

/// Treatment of `collection_date` values that do not parse as `DD-MM-YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePolicy {
    /// Abort the aggregation with a malformed-table error.
    Reject,
    /// Leave the row out of date-extremum computation and of the output.
    Skip,
}

/// `[transform]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSection {
    #[serde(default = "default_date_policy")]
    pub unparseable_dates: DatePolicy,

    /// Data-quality rules, e.g. `"ColumnCount > 0"`.
    #[serde(default = "default_ruleset")]
    pub ruleset: Vec<String>,

    /// Refuse to write when a rule fails (default: report and write anyway).
    #[serde(default)]
    pub quality_blocking: bool,
}

impl Default for TransformSection {
    fn default() -> Self {
        Self {
            unparseable_dates: default_date_policy(),
            ruleset: default_ruleset(),
            quality_blocking: false,
        }
    }
}

fn default_date_policy() -> DatePolicy {
    DatePolicy::Reject
}
fn default_ruleset() -> Vec<String> {
    vec!["ColumnCount > 0".into()]
}

/// `[catalog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Path of the libSQL catalog database.
    #[serde(default = "default_catalog_path")]
    pub path: String,

    #[serde(default = "default_catalog_database")]
    pub database: String,

    #[serde(default = "default_catalog_table")]
    pub table: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            database: default_catalog_database(),
            table: default_catalog_table(),
        }
    }
}

fn default_catalog_path() -> String {
    "~/.indexflow/catalog.db".into()
}
fn default_catalog_database() -> String {
    "default".into()
}
fn default_catalog_table() -> String {
    "bovespa_etl".into()
}

/// `[schedule]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Delay between the end of one run and the start of the next.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Stop scheduling after a failed run.
    #[serde(default = "default_true")]
    pub halt_on_failure: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            halt_on_failure: true,
        }
    }
}

fn default_interval_hours() -> u64 {
    24
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime source configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub url: String,
    pub engine: SourceEngine,
    pub page_count: usize,
    pub wait_timeout: Duration,
    pub settle: Duration,
    pub pager_xpath: String,
    pub table_selector: String,
    pub segment_selector: String,
    pub segment_value: String,
    pub page_param: String,
    pub segment_param: String,
    pub headless: bool,
}

impl SourceConfig {
    /// Pager XPath for `page`.
    pub fn pager_xpath_for(&self, page: usize) -> String {
        self.pager_xpath.replace("{page}", &page.to_string())
    }
}

impl From<&AppConfig> for SourceConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.source;
        Self {
            url: s.url.clone(),
            engine: s.engine,
            page_count: s.page_count,
            wait_timeout: Duration::from_secs(s.wait_timeout_secs),
            settle: Duration::from_millis(s.settle_millis),
            pager_xpath: s.pager_xpath.clone(),
            table_selector: s.table_selector.clone(),
            segment_selector: s.segment_selector.clone(),
            segment_value: s.segment_value.clone(),
            page_param: s.page_param.clone(),
            segment_param: s.segment_param.clone(),
            headless: s.headless,
        }
    }
}

/// Runtime storage configuration with `~` expanded.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub root: PathBuf,
    pub raw_bucket: String,
    pub raw_prefix: Option<String>,
    pub refined_bucket: String,
    pub refined_prefix: String,
    pub file_prefix: String,
    pub work_dir: PathBuf,
    pub on_upload_error: UploadPolicy,
}

impl From<&AppConfig> for StorageConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.storage;
        Self {
            backend: s.backend,
            root: expand_home(&s.root),
            raw_bucket: s.raw_bucket.clone(),
            raw_prefix: s.raw_prefix.clone().filter(|p| !p.is_empty()),
            refined_bucket: s.refined_bucket.clone(),
            refined_prefix: s.refined_prefix.clone(),
            file_prefix: s.file_prefix.clone(),
            work_dir: expand_home(&s.work_dir),
            on_upload_error: s.on_upload_error,
        }
    }
}

/// Runtime transform configuration.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub unparseable_dates: DatePolicy,
    pub ruleset: Vec<String>,
    pub quality_blocking: bool,
    pub catalog_database: String,
    pub catalog_table: String,
}

impl From<&AppConfig> for TransformConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            unparseable_dates: config.transform.unparseable_dates,
            ruleset: config.transform.ruleset.clone(),
            quality_blocking: config.transform.quality_blocking,
            catalog_database: config.catalog.database.clone(),
            catalog_table: config.catalog.table.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.indexflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| IndexFlowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.indexflow/indexflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| IndexFlowError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        IndexFlowError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| IndexFlowError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| IndexFlowError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| IndexFlowError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.source.page_count == 0 {
        return Err(IndexFlowError::config("source.page_count must be at least 1"));
    }
    if url::Url::parse(&config.source.url).is_err() {
        return Err(IndexFlowError::config(format!(
            "source.url is not a valid URL: {}",
            config.source.url
        )));
    }
    if !config.source.pager_xpath.contains("{page}") {
        return Err(IndexFlowError::config(
            "source.pager_xpath must contain a {page} placeholder",
        ));
    }
    if config.storage.raw_bucket.is_empty() || config.storage.refined_bucket.is_empty() {
        return Err(IndexFlowError::config("storage buckets must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("raw_bucket"));
        assert!(toml_str.contains("ColumnCount > 0"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.source.page_count, 5);
        assert_eq!(parsed.source.wait_timeout_secs, 10);
        assert_eq!(parsed.storage.on_upload_error, UploadPolicy::Ignore);
        assert_eq!(parsed.transform.unparseable_dates, DatePolicy::Reject);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[source]
engine = "http"
page_count = 3

[storage]
backend = "s3"
raw_prefix = "daily"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.source.engine, SourceEngine::Http);
        assert_eq!(config.source.page_count, 3);
        assert_eq!(config.source.table_selector, "table");
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.raw_prefix.as_deref(), Some("daily"));
        assert_eq!(config.schedule.interval_hours, 24);
    }

    #[test]
    fn source_config_from_app_config() {
        let app = AppConfig::default();
        let source = SourceConfig::from(&app);
        assert_eq!(source.wait_timeout, Duration::from_secs(10));
        assert_eq!(source.settle, Duration::from_millis(2000));
        assert_eq!(
            source.pager_xpath_for(3),
            "//ul[contains(@class, 'ngx-pagination')]/li/a[span[text()='3']]"
        );
    }

    #[test]
    fn storage_config_drops_empty_prefix() {
        let mut app = AppConfig::default();
        app.storage.raw_prefix = Some(String::new());
        app.storage.root = "/srv/indexflow".into();
        let storage = StorageConfig::from(&app);
        assert!(storage.raw_prefix.is_none());
        assert_eq!(storage.root, PathBuf::from("/srv/indexflow"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/data"), home.join("data"));
        }
    }

    #[test]
    fn invalid_config_rejected() {
        let dir = std::env::temp_dir().join(format!("if_cfg_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("indexflow.toml");
        std::fs::write(&path, "[source]\npage_count = 0\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("page_count"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_config_at_writes_loadable_file() {
        let dir = std::env::temp_dir().join(format!("if_cfg_{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join("indexflow.toml");
        init_config_at(&path).expect("init");
        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.catalog.table, "bovespa_etl");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
