//! Temporal aggregation: quantity totals of the latest collection cycle and
//! their delta against the cycle immediately before it.

use std::collections::BTreeMap;

use indexflow_shared::{
    CollectionDate, CycleRow, DatePolicy, DeltaRecord, IndexFlowError, Result,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Output of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub latest: CollectionDate,
    /// `None` when the dataset holds a single cycle.
    pub previous: Option<CollectionDate>,
    /// One record per `(entity, sector)` of the latest cycle, ordered by
    /// entity then sector.
    pub records: Vec<DeltaRecord>,
}

/// Aggregate the accumulated history.
///
/// Rows are grouped by entity (the constituent name) and sector and their
/// theoretical quantities summed. Groups of the latest cycle are left-joined
/// to the groups of the previous cycle; without a previous total the delta is
/// 0 and the previous total stays null.
///
/// Cycles are grouped by parsed date, so the output `collection_date` is the
/// canonical `DD-MM-YYYY` rendering, not the raw cell text.
pub fn aggregate(rows: &[CycleRow], policy: DatePolicy) -> Result<Aggregation> {
    if rows.is_empty() {
        return Err(IndexFlowError::EmptyDataset);
    }

    let dated = parse_dates(rows, policy)?;
    let latest = dated
        .iter()
        .map(|(date, _)| *date)
        .max()
        .ok_or(IndexFlowError::EmptyDataset)?;
    let previous = dated
        .iter()
        .map(|(date, _)| *date)
        .filter(|date| *date < latest)
        .max();

    let current = sum_by_group(dated.iter().filter(|(d, _)| *d == latest).map(|(_, r)| *r))?;
    let prior = match previous {
        Some(prev) => sum_by_group(dated.iter().filter(|(d, _)| *d == prev).map(|(_, r)| *r))?,
        None => BTreeMap::new(),
    };

    let stamp = latest.to_string();
    let records = current
        .into_iter()
        .map(|((entity, sector), total)| {
            let previous_total = prior.get(&(entity.clone(), sector.clone())).copied();
            let diff = match previous_total {
                Some(prev) => total.checked_sub(prev).ok_or_else(|| {
                    IndexFlowError::validation(format!("quantity delta overflows for {entity}"))
                })?,
                None => 0,
            };
            Ok(DeltaRecord {
                entity,
                sector,
                collection_date: stamp.clone(),
                quantity_total: total,
                quantity_total_previous: previous_total,
                diff_quantity: diff,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        %latest,
        previous = ?previous.map(|d| d.to_string()),
        records = records.len(),
        "aggregation complete"
    );

    Ok(Aggregation {
        latest,
        previous,
        records,
    })
}

fn parse_dates(rows: &[CycleRow], policy: DatePolicy) -> Result<Vec<(CollectionDate, &CycleRow)>> {
    let mut dated = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;

    for row in rows {
        match row.collection_date.parse::<CollectionDate>() {
            Ok(date) => dated.push((date, row)),
            Err(e) => match policy {
                DatePolicy::Reject => {
                    return Err(IndexFlowError::malformed(format!(
                        "unparseable collection_date '{}' for code {}: {e}",
                        row.collection_date, row.code
                    )));
                }
                DatePolicy::Skip => {
                    debug!(date = %row.collection_date, code = %row.code, "skipping row with unparseable date");
                    skipped += 1;
                }
            },
        }
    }

    if skipped > 0 {
        warn!(skipped, "rows with unparseable collection_date left out of aggregation");
    }
    Ok(dated)
}

/// Strict group-by-sum on `(entity, sector)`; repeated keys accumulate.
fn sum_by_group<'a>(
    rows: impl Iterator<Item = &'a CycleRow>,
) -> Result<BTreeMap<(String, String), i64>> {
    let mut totals: BTreeMap<(String, String), i64> = BTreeMap::new();
    for row in rows {
        let total = totals
            .entry((row.name.clone(), row.sector.clone()))
            .or_insert(0);
        *total = total.checked_add(row.theoretical_quantity).ok_or_else(|| {
            IndexFlowError::validation(format!("quantity total overflows for {}", row.name))
        })?;
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(entity: &str, sector: &str, quantity: i64, date: &str) -> CycleRow {
        CycleRow {
            code: format!("{entity}3"),
            name: entity.into(),
            asset_type: "ON".into(),
            theoretical_quantity: quantity,
            weight_pct: 1.0,
            sector: sector.into(),
            sector_weight_pct: 1.0,
            sector_cum_weight_pct: 1.0,
            collection_date: date.into(),
        }
    }

    fn delta(entity: &str, total: i64, previous: Option<i64>, diff: i64) -> DeltaRecord {
        DeltaRecord {
            entity: entity.into(),
            sector: "sectorX".into(),
            collection_date: "02-01-2026".into(),
            quantity_total: total,
            quantity_total_previous: previous,
            diff_quantity: diff,
        }
    }

    #[test]
    fn output_date_is_canonical() {
        let rows = vec![
            row("A", "sectorX", 80, " 01-01-2026"),
            row("A", "sectorX", 60, "02-01-2026 "),
            row("A", "sectorX", 40, " 02-01-2026"),
        ];

        let agg = aggregate(&rows, DatePolicy::Reject).unwrap();
        assert_eq!(agg.records, vec![delta("A", 100, Some(80), 20)]);
    }

    #[test]
    fn latest_against_previous_cycle() {
        let rows = vec![
            row("A", "sectorX", 80, "01-01-2026"),
            row("A", "sectorX", 100, "02-01-2026"),
            row("B", "sectorX", 50, "02-01-2026"),
        ];

        let agg = aggregate(&rows, DatePolicy::Reject).unwrap();
        assert_eq!(agg.latest.to_string(), "02-01-2026");
        assert_eq!(agg.previous.map(|d| d.to_string()).as_deref(), Some("01-01-2026"));
        assert_eq!(
            agg.records,
            vec![delta("A", 100, Some(80), 20), delta("B", 50, None, 0)]
        );
    }

    #[test]
    fn single_cycle_has_no_previous_and_zero_diffs() {
        let rows = vec![
            row("A", "sectorX", 100, "02-01-2026"),
            row("B", "sectorY", 50, "02-01-2026"),
        ];

        let agg = aggregate(&rows, DatePolicy::Reject).unwrap();
        assert!(agg.previous.is_none());
        assert!(agg.records.iter().all(|r| r.diff_quantity == 0));
        assert!(agg.records.iter().all(|r| r.quantity_total_previous.is_none()));
    }

    #[test]
    fn aggregation_is_idempotent() {
        let rows = vec![
            row("B", "sectorX", 7, "03-01-2026"),
            row("A", "sectorX", 80, "01-01-2026"),
            row("A", "sectorX", 100, "03-01-2026"),
            row("A", "sectorX", 90, "02-01-2026"),
        ];
        let first = aggregate(&rows, DatePolicy::Reject).unwrap();
        let second = aggregate(&rows, DatePolicy::Reject).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn previous_is_closest_earlier_date() {
        let rows = vec![
            row("A", "sectorX", 10, "15-12-2025"),
            row("A", "sectorX", 90, "02-01-2026"),
            row("A", "sectorX", 100, "03-01-2026"),
        ];
        let agg = aggregate(&rows, DatePolicy::Reject).unwrap();
        assert_eq!(agg.previous.map(|d| d.to_string()).as_deref(), Some("02-01-2026"));
        assert_eq!(agg.records[0].quantity_total_previous, Some(90));
        assert_eq!(agg.records[0].diff_quantity, 10);
    }

    #[test]
    fn dates_compare_as_calendar_days() {
        // Lexically "31-12-2025" > "01-01-2026"; chronologically it is earlier.
        let rows = vec![
            row("A", "sectorX", 10, "31-12-2025"),
            row("A", "sectorX", 4, "01-01-2026"),
        ];
        let agg = aggregate(&rows, DatePolicy::Reject).unwrap();
        assert_eq!(agg.latest.to_string(), "01-01-2026");
        assert_eq!(agg.records[0].diff_quantity, -6);
    }

    #[test]
    fn equal_keys_accumulate() {
        let rows = vec![
            row("PETROBRAS", "Petróleo", 30, "02-01-2026"),
            row("PETROBRAS", "Petróleo", 12, "02-01-2026"),
            row("PETROBRAS", "Petróleo", 40, "01-01-2026"),
        ];
        let agg = aggregate(&rows, DatePolicy::Reject).unwrap();
        assert_eq!(agg.records.len(), 1);
        assert_eq!(agg.records[0].quantity_total, 42);
        assert_eq!(agg.records[0].diff_quantity, 2);
    }

    #[test]
    fn previous_only_groups_are_not_emitted() {
        let rows = vec![
            row("GONE", "sectorX", 5, "01-01-2026"),
            row("A", "sectorX", 1, "02-01-2026"),
        ];
        let agg = aggregate(&rows, DatePolicy::Reject).unwrap();
        let entities: Vec<&str> = agg.records.iter().map(|r| r.entity.as_str()).collect();
        assert_eq!(entities, vec!["A"]);
    }

    #[test]
    fn empty_dataset_is_an_error() {
        let err = aggregate(&[], DatePolicy::Reject).unwrap_err();
        assert!(matches!(err, IndexFlowError::EmptyDataset));
    }

    #[test]
    fn unparseable_date_rejected_by_default() {
        let rows = vec![
            row("A", "sectorX", 1, "02-01-2026"),
            row("A", "sectorX", 1, "2026-01-01"),
        ];
        let err = aggregate(&rows, DatePolicy::Reject).unwrap_err();
        assert!(matches!(err, IndexFlowError::MalformedTable { .. }));
        assert!(err.to_string().contains("2026-01-01"));
    }

    #[test]
    fn unparseable_date_skipped_on_request() {
        let rows = vec![
            row("A", "sectorX", 1, "02-01-2026"),
            row("A", "sectorX", 1, "garbage"),
        ];
        let agg = aggregate(&rows, DatePolicy::Skip).unwrap();
        assert!(agg.previous.is_none());
        assert_eq!(agg.records.len(), 1);

        let only_garbage = vec![row("A", "sectorX", 1, "garbage")];
        let err = aggregate(&only_garbage, DatePolicy::Skip).unwrap_err();
        assert!(matches!(err, IndexFlowError::EmptyDataset));
    }

    #[test]
    fn overflow_is_reported() {
        let rows = vec![
            row("A", "sectorX", i64::MAX, "02-01-2026"),
            row("A", "sectorX", 1, "02-01-2026"),
        ];
        let err = aggregate(&rows, DatePolicy::Reject).unwrap_err();
        assert!(matches!(err, IndexFlowError::Validation { .. }));
    }
}
