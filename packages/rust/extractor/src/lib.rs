//! Table Extractor: turns one raw HTML table of the index composition page
//! into typed rows.
//!
//! Structural assumptions of the source table:
//! - the last two body rows are totals ("Quantidade Teórica Total", "Redutor")
//!   and are always dropped;
//! - percentage columns are rendered 1000 times too large (see [`numeric`]);
//! - the sector view has a two-level header collapsed to its deeper labels.

pub mod numeric;
pub mod table;

use indexflow_shared::{ConstituentRow, IndexFlowError, RawTable, Result, SectorRow};
use tracing::debug;

pub use numeric::{PERCENT_SCALE, parse_percentage, parse_quantity};
pub use table::{ParsedTable, parse_tables};

/// Trailing summary rows present in every fetch.
pub const TRAILING_SUMMARY_ROWS: usize = 2;

/// Column labels as rendered by the source page.
pub mod columns {
    pub const CODE: &str = "Código";
    pub const NAME: &str = "Ação";
    pub const TYPE: &str = "Tipo";
    pub const THEORETICAL_QUANTITY: &str = "Qtde. Teórica";
    pub const WEIGHT_PCT: &str = "Part. (%)";
    pub const SECTOR: &str = "Setor";
    pub const SECTOR_CUM_WEIGHT_PCT: &str = "Part. (%)Acum.";
}

/// Parse a "by constituent" table.
///
/// Returns an empty vector when `raw` contains no table at all.
pub fn extract_constituents(raw: &RawTable) -> Result<Vec<ConstituentRow>> {
    let Some(table) = first_table(raw) else {
        return Ok(Vec::new());
    };

    let code = require_column(&table, columns::CODE)?;
    let name = require_column(&table, columns::NAME)?;
    let asset_type = require_column(&table, columns::TYPE)?;
    let quantity = require_column(&table, columns::THEORETICAL_QUANTITY)?;
    let weight = require_column(&table, columns::WEIGHT_PCT)?;

    let rows = data_rows(&table)
        .map(|cells| {
            Ok(ConstituentRow {
                code: cells[code].clone(),
                name: cells[name].clone(),
                asset_type: cells[asset_type].clone(),
                theoretical_quantity: parse_quantity(&cells[quantity])?,
                weight_pct: parse_percentage(&cells[weight])?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(rows = rows.len(), "extracted constituent rows");
    Ok(rows)
}

/// Parse a "by sector" table (two-level header).
///
/// Returns an empty vector when `raw` contains no table at all.
pub fn extract_sectors(raw: &RawTable) -> Result<Vec<SectorRow>> {
    let Some(table) = first_table(raw) else {
        return Ok(Vec::new());
    };

    let code = require_column(&table, columns::CODE)?;
    let sector = require_column(&table, columns::SECTOR)?;
    let weight = require_column(&table, columns::WEIGHT_PCT)?;
    let cum_weight = require_column(&table, columns::SECTOR_CUM_WEIGHT_PCT)?;

    let rows = data_rows(&table)
        .map(|cells| {
            Ok(SectorRow {
                code: cells[code].clone(),
                sector: cells[sector].clone(),
                sector_weight_pct: parse_percentage(&cells[weight])?,
                sector_cum_weight_pct: parse_percentage(&cells[cum_weight])?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(rows = rows.len(), "extracted sector rows");
    Ok(rows)
}

fn first_table(raw: &RawTable) -> Option<ParsedTable> {
    parse_tables(&raw.html).into_iter().next()
}

fn require_column(table: &ParsedTable, label: &str) -> Result<usize> {
    table.column_index(label).ok_or_else(|| {
        IndexFlowError::malformed(format!(
            "missing column '{label}' (found: {})",
            table.columns.join(", ")
        ))
    })
}

/// Body rows minus the trailing summary rows, skipping blank spacer rows.
fn data_rows(table: &ParsedTable) -> impl Iterator<Item = &Vec<String>> {
    let keep = table.rows.len().saturating_sub(TRAILING_SUMMARY_ROWS);
    table.rows[..keep]
        .iter()
        .filter(|cells| cells.iter().any(|c| !c.is_empty()))
}
