//! Collector: two sequential page walks (constituents, then sectors), each
//! extracted and concatenated, joined on `code` into one cycle dataset.

use std::collections::{BTreeSet, HashMap};

use indexflow_extractor::{extract_constituents, extract_sectors};
use indexflow_shared::{
    CollectionDate, ConstituentRow, CycleDataset, CycleRow, JoinStats, RawPage, Result,
    SectorRow, TableView,
};
use tracing::{info, instrument, warn};

use crate::source::{PagedTableSource, SourceFactory};
use crate::walker::walk;

/// Builds one [`CycleDataset`] per call. Either a complete dataset is returned
/// or an error; nothing is produced from a partial pass.
pub struct Collector<F> {
    factory: F,
    page_count: usize,
}

impl<F: SourceFactory> Collector<F> {
    pub fn new(factory: F, page_count: usize) -> Self {
        Self {
            factory,
            page_count,
        }
    }

    /// Collect and stamp the dataset with today's local date.
    pub fn collect(&self) -> Result<CycleDataset> {
        self.collect_on(CollectionDate::today())
    }

    /// Collect and stamp the dataset with `date`.
    #[instrument(skip(self), fields(date = %date, pages = self.page_count))]
    pub fn collect_on(&self, date: CollectionDate) -> Result<CycleDataset> {
        let constituents: Vec<ConstituentRow> = self
            .read_view(TableView::Constituents)?
            .iter()
            .map(|page| extract_constituents(&page.table))
            .collect::<Result<Vec<_>>>()?
            .concat();

        let sectors: Vec<SectorRow> = self
            .read_view(TableView::Sectors)?
            .iter()
            .map(|page| extract_sectors(&page.table))
            .collect::<Result<Vec<_>>>()?
            .concat();

        let stamp = date.to_string();
        let (rows, join) = join_on_code(&constituents, &sectors, &stamp);

        if join.dropped() > 0 {
            warn!(
                constituents_only = join.constituents_unmatched.len(),
                sectors_only = join.sectors_unmatched.len(),
                codes = ?join.constituents_unmatched.iter().chain(&join.sectors_unmatched).collect::<Vec<_>>(),
                "codes missing from one view dropped by the join"
            );
        }

        info!(
            constituents = constituents.len(),
            sectors = sectors.len(),
            rows = rows.len(),
            "collection cycle assembled"
        );

        Ok(CycleDataset {
            collection_date: date,
            rows,
            join,
        })
    }

    /// One pass over `view` with a freshly opened source. The source is
    /// dropped (and its session closed) before this returns.
    fn read_view(&self, view: TableView) -> Result<Vec<RawPage>> {
        let mut source = self.factory.open(view)?;
        source.setup()?;

        let mut walk = walk(self.page_count, &mut source);
        let pages = walk.by_ref().collect::<Result<Vec<_>>>()?;

        if !walk.skipped().is_empty() {
            warn!(%view, skipped = ?walk.skipped(), "pages skipped after navigation failures");
        }
        info!(%view, pages = pages.len(), "view walked");
        Ok(pages)
    }
}

/// Relational inner join of both row-sets on `code`.
///
/// Codes present on one side only are dropped and reported in [`JoinStats`].
/// A code repeated on either side fans out to every matching pair.
pub fn join_on_code(
    constituents: &[ConstituentRow],
    sectors: &[SectorRow],
    collection_date: &str,
) -> (Vec<CycleRow>, JoinStats) {
    let mut by_code: HashMap<&str, Vec<&SectorRow>> = HashMap::new();
    for sector in sectors {
        by_code.entry(sector.code.as_str()).or_default().push(sector);
    }

    let mut rows = Vec::new();
    let mut constituents_unmatched = BTreeSet::new();

    for c in constituents {
        let Some(matches) = by_code.get(c.code.as_str()) else {
            constituents_unmatched.insert(c.code.clone());
            continue;
        };
        rows.extend(matches.iter().map(|s| CycleRow {
            code: c.code.clone(),
            name: c.name.clone(),
            asset_type: c.asset_type.clone(),
            theoretical_quantity: c.theoretical_quantity,
            weight_pct: c.weight_pct,
            sector: s.sector.clone(),
            sector_weight_pct: s.sector_weight_pct,
            sector_cum_weight_pct: s.sector_cum_weight_pct,
            collection_date: collection_date.to_string(),
        }));
    }

    let constituent_codes: BTreeSet<&str> = constituents.iter().map(|c| c.code.as_str()).collect();
    let sectors_unmatched: BTreeSet<String> = sectors
        .iter()
        .filter(|s| !constituent_codes.contains(s.code.as_str()))
        .map(|s| s.code.clone())
        .collect();

    (
        rows,
        JoinStats {
            constituents_unmatched: constituents_unmatched.into_iter().collect(),
            sectors_unmatched: sectors_unmatched.into_iter().collect(),
        },
    )
}
