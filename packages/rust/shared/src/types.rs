//! Core domain types for IndexFlow collection cycles and delta records.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `chrono` format of a collection date (`DD-MM-YYYY`).
pub const COLLECTION_DATE_FORMAT: &str = "%d-%m-%Y";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Run ledger
// ---------------------------------------------------------------------------

/// Which pipeline a run executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Collect one cycle and publish it to the raw bucket.
    Collect,
    /// Aggregate accumulated cycles into the refined, catalogued table.
    Transform,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Transform => "transform",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "collect" => Ok(Self::Collect),
            "transform" => Ok(Self::Transform),
            other => Err(format!("unknown run kind: {other}")),
        }
    }
}

/// Coarse outcome reported to whoever triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// HTTP-style status code of the job trigger surface.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Running => 202,
            Self::Succeeded => 200,
            Self::Failed => 500,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// CollectionDate
// ---------------------------------------------------------------------------

/// Calendar date a collection cycle was stamped with.
///
/// Rendered and parsed as `DD-MM-YYYY`; ordering follows the calendar, not
/// the string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionDate(pub NaiveDate);

impl CollectionDate {
    /// Today's date in the local timezone.
    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    /// Build from a year/month/day triple. Returns `None` for invalid dates.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }
}

impl std::fmt::Display for CollectionDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(COLLECTION_DATE_FORMAT))
    }
}

impl std::str::FromStr for CollectionDate {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), COLLECTION_DATE_FORMAT).map(Self)
    }
}

impl Serialize for CollectionDate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CollectionDate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Raw tables
// ---------------------------------------------------------------------------

/// Which view of the index composition page a table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableView {
    /// One row per constituent asset.
    Constituents,
    /// Constituents grouped by sector (requires the segment filter).
    Sectors,
}

impl TableView {
    /// Stable name for logs and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Constituents => "constituents",
            Self::Sectors => "sectors",
        }
    }
}

impl std::fmt::Display for TableView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outer HTML of a single `<table>` element as rendered by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub html: String,
}

impl RawTable {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }
}

/// A raw table tagged with the 1-based page it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub index: usize,
    pub table: RawTable,
}

// ---------------------------------------------------------------------------
// Extracted rows
// ---------------------------------------------------------------------------

/// One row of the "by constituent" table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstituentRow {
    /// Ticker code (e.g. `PETR4`).
    pub code: String,
    /// Company name.
    pub name: String,
    /// Share class / listing segment (categorical).
    pub asset_type: String,
    /// Theoretical share count in the index portfolio.
    pub theoretical_quantity: i64,
    /// Participation in the index, in percent.
    pub weight_pct: f64,
}

/// One row of the "by sector" table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorRow {
    pub code: String,
    pub sector: String,
    pub sector_weight_pct: f64,
    pub sector_cum_weight_pct: f64,
}

/// A constituent joined with its sector, stamped with the collection date.
///
/// This is also the row type of the accumulated historical dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRow {
    pub code: String,
    pub name: String,
    pub asset_type: String,
    pub theoretical_quantity: i64,
    pub weight_pct: f64,
    pub sector: String,
    pub sector_weight_pct: f64,
    pub sector_cum_weight_pct: f64,
    /// `DD-MM-YYYY`, constant within one cycle.
    pub collection_date: String,
}

/// Codes that the constituent/sector inner join dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinStats {
    /// Codes present in the constituent table only.
    pub constituents_unmatched: Vec<String>,
    /// Codes present in the sector table only.
    pub sectors_unmatched: Vec<String>,
}

impl JoinStats {
    pub fn dropped(&self) -> usize {
        self.constituents_unmatched.len() + self.sectors_unmatched.len()
    }
}

/// Output of one collection run.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleDataset {
    pub collection_date: CollectionDate,
    pub rows: Vec<CycleRow>,
    pub join: JoinStats,
}

impl CycleDataset {
    /// File name for this cycle's columnar artifact, e.g. `b3-18-10-2026.parquet`.
    pub fn file_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}.parquet", self.collection_date)
    }
}

// ---------------------------------------------------------------------------
// Aggregation output
// ---------------------------------------------------------------------------

/// Aggregated quantity for one (entity, sector) pair on the latest cycle,
/// compared against the previous cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub entity: String,
    pub sector: String,
    pub collection_date: String,
    pub quantity_total: i64,
    /// `None` when the previous cycle has no rows for this pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_total_previous: Option<i64>,
    /// `quantity_total - quantity_total_previous`, or 0 without history.
    pub diff_quantity: i64,
}
