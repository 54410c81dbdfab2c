//! End-to-end runs: `collect` (walk → extract → join → publish) and
//! `transform` (load history → aggregate → quality gate → partitioned sink).
//!
//! Every run is recorded in the catalog's run ledger. A run that fails still
//! returns `Ok(RunReport)` with [`RunStatus::Failed`]; `Err` is reserved for
//! failures of the ledger itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexflow_collector::{Collector, SourceFactory};
use indexflow_shared::{
    CollectionDate, IndexFlowError, Result, RunId, RunKind, RunStatus, StorageConfig,
    TransformConfig,
};
use indexflow_storage::columnar::delta_batch;
use indexflow_storage::{BlobStore, Catalog};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::aggregate::aggregate;
use crate::history::load_accumulated;
use crate::publish::publish_cycle;
use crate::quality::{evaluate, parse_ruleset};
use crate::sink::PartitionedSink;

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn BlobStore>,
    pub catalog: Arc<Catalog>,
    pub storage: StorageConfig,
    pub transform: TransformConfig,
}

/// Coarse outcome of one run, as reported to the invoker.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub kind: RunKind,
    pub status: RunStatus,
    pub message: String,
    /// Rows collected (collect) or delta records written (transform).
    pub rows: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the run is recorded.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _report: &RunReport) {}
}

/// What a successful run body hands back to the ledger.
struct RunOutput {
    rows: usize,
    message: String,
    stats: serde_json::Value,
}

/// Collect one cycle and publish it to the raw bucket.
///
/// The collector runs on the blocking pool; its sources do blocking I/O.
/// `date` overrides today's date as the cycle stamp.
#[instrument(skip_all, fields(kind = "collect"))]
pub async fn run_once<F>(
    ctx: &PipelineContext,
    collector: Arc<Collector<F>>,
    date: Option<CollectionDate>,
    progress: &dyn ProgressReporter,
) -> Result<RunReport>
where
    F: SourceFactory + Send + Sync + 'static,
{
    let start = Instant::now();
    let run_id = ctx.catalog.start_run(RunKind::Collect).await?;
    info!(%run_id, "starting collect run");

    let result = collect_and_publish(ctx, collector, date, progress).await;
    record(ctx, run_id, RunKind::Collect, start, result, progress).await
}

async fn collect_and_publish<F>(
    ctx: &PipelineContext,
    collector: Arc<Collector<F>>,
    date: Option<CollectionDate>,
    progress: &dyn ProgressReporter,
) -> Result<RunOutput>
where
    F: SourceFactory + Send + Sync + 'static,
{
    progress.phase("Collecting index tables");
    let dataset = tokio::task::spawn_blocking(move || match date {
        Some(date) => collector.collect_on(date),
        None => collector.collect(),
    })
    .await
    .map_err(|e| IndexFlowError::Session(format!("collector task failed: {e}")))??;

    progress.phase("Publishing cycle dataset");
    let outcome = publish_cycle(&dataset, ctx.store.as_ref(), &ctx.storage).await?;

    let message = match (&outcome.key, &outcome.upload_error) {
        (Some(key), _) => format!(
            "collected {} rows for {} into {}/{key}",
            outcome.rows, dataset.collection_date, ctx.storage.raw_bucket
        ),
        (None, Some(err)) => format!(
            "collected {} rows for {}; upload failed: {err}",
            outcome.rows, dataset.collection_date
        ),
        (None, None) => format!(
            "collected {} rows for {}",
            outcome.rows, dataset.collection_date
        ),
    };

    let stats = serde_json::json!({
        "collection_date": dataset.collection_date,
        "rows": outcome.rows,
        "file": outcome.file_name,
        "size": outcome.size,
        "key": outcome.key,
        "upload_error": outcome.upload_error,
        "constituents_unmatched": dataset.join.constituents_unmatched,
        "sectors_unmatched": dataset.join.sectors_unmatched,
    });

    Ok(RunOutput {
        rows: outcome.rows,
        message,
        stats,
    })
}

/// Aggregate the accumulated history and publish the delta partitions.
#[instrument(skip_all, fields(kind = "transform"))]
pub async fn run_transform(
    ctx: &PipelineContext,
    progress: &dyn ProgressReporter,
) -> Result<RunReport> {
    let start = Instant::now();
    let run_id = ctx.catalog.start_run(RunKind::Transform).await?;
    info!(%run_id, "starting transform run");

    let result = transform(ctx, &run_id, progress).await;
    record(ctx, run_id, RunKind::Transform, start, result, progress).await
}

async fn transform(
    ctx: &PipelineContext,
    run_id: &RunId,
    progress: &dyn ProgressReporter,
) -> Result<RunOutput> {
    let rules = parse_ruleset(&ctx.transform.ruleset)?;

    progress.phase("Loading accumulated dataset");
    let rows = load_accumulated(
        ctx.store.as_ref(),
        &ctx.storage.raw_bucket,
        ctx.storage.raw_prefix.as_deref(),
    )
    .await?;

    progress.phase("Aggregating");
    let aggregation = aggregate(&rows, ctx.transform.unparseable_dates)?;

    progress.phase("Evaluating data quality");
    let report = evaluate(&delta_batch(&aggregation.records)?, &rules);
    let details = serde_json::to_string(&report)
        .map_err(|e| IndexFlowError::validation(format!("quality report encoding: {e}")))?;
    ctx.catalog
        .record_quality(
            run_id,
            &ctx.transform.catalog_database,
            &ctx.transform.catalog_table,
            report.passed(),
            &details,
        )
        .await?;

    if !report.passed() {
        let failed: Vec<&str> = report.failures().map(|o| o.rule.as_str()).collect();
        if ctx.transform.quality_blocking {
            return Err(IndexFlowError::validation(format!(
                "quality rules failed: {}",
                failed.join(", ")
            )));
        }
        warn!(rules = ?failed, "quality rules failed, writing anyway");
    }

    progress.phase("Writing refined partitions");
    let sink = PartitionedSink::from_config(
        ctx.store.clone(),
        ctx.catalog.clone(),
        &ctx.storage,
        &ctx.transform,
    );
    let written = sink.publish(&aggregation.records).await?;

    let previous = aggregation
        .previous
        .map(|d| d.to_string())
        .unwrap_or_else(|| "none".into());
    let message = format!(
        "aggregated {} records for {} (previous: {previous}) into {} partitions",
        aggregation.records.len(),
        aggregation.latest,
        written.partitions
    );

    let stats = serde_json::json!({
        "input_rows": rows.len(),
        "latest": aggregation.latest,
        "previous": aggregation.previous,
        "records": aggregation.records.len(),
        "partitions": written.partitions,
        "replaced": written.replaced,
        "quality_passed": report.passed(),
    });

    Ok(RunOutput {
        rows: aggregation.records.len(),
        message,
        stats,
    })
}

/// Close the run in the ledger and build the report.
async fn record(
    ctx: &PipelineContext,
    run_id: RunId,
    kind: RunKind,
    start: Instant,
    result: Result<RunOutput>,
    progress: &dyn ProgressReporter,
) -> Result<RunReport> {
    let (status, message, rows, stats) = match result {
        Ok(output) => (
            RunStatus::Succeeded,
            output.message,
            output.rows,
            Some(output.stats.to_string()),
        ),
        Err(e) => {
            error!(%run_id, %kind, error = %e, "run failed");
            (RunStatus::Failed, e.to_string(), 0, None)
        }
    };

    ctx.catalog
        .finish_run(&run_id, status, &message, stats.as_deref())
        .await?;

    let report = RunReport {
        run_id,
        kind,
        status,
        message,
        rows,
        elapsed: start.elapsed(),
    };
    info!(
        run_id = %report.run_id,
        %kind,
        %status,
        rows,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "run finished"
    );
    progress.done(&report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexflow_shared::{
        CycleRow, DatePolicy, RawTable, StorageBackend, TableView, UploadPolicy,
    };
    use indexflow_collector::PagedTableSource;
    use indexflow_storage::{LocalBlobStore, write_cycle};
    use std::path::Path;
    use uuid::Uuid;

    const CONSTITUENTS: &str = "<table><thead><tr><th>Código</th><th>Ação</th><th>Tipo</th>\
        <th>Qtde. Teórica</th><th>Part. (%)</th></tr></thead><tbody>\
        <tr><td>VALE3</td><td>VALE</td><td>ON NM</td><td>4.196.924.316</td><td>11,125</td></tr>\
        <tr><td>Quantidade Teórica Total</td><td></td><td></td><td>1</td><td></td></tr>\
        <tr><td>Redutor</td><td></td><td></td><td>1</td><td></td></tr></tbody></table>";

    const SECTORS: &str = "<table><thead><tr><th>Setor</th><th>Código</th><th>Part. (%)</th>\
        <th>Part. (%)Acum.</th></tr></thead><tbody>\
        <tr><td>Materiais Básicos</td><td>VALE3</td><td>11,125</td><td>14,200</td></tr>\
        <tr><td>Total</td><td></td><td></td><td></td></tr>\
        <tr><td>Redutor</td><td></td><td></td><td></td></tr></tbody></table>";

    struct OnePage {
        view: TableView,
        present: bool,
    }

    impl PagedTableSource for OnePage {
        fn view(&self) -> TableView {
            self.view
        }
        fn setup(&mut self) -> Result<()> {
            Ok(())
        }
        fn goto_page(&mut self, page: usize) -> Result<()> {
            Err(IndexFlowError::pagination(page, "no pager"))
        }
        fn read_table(&mut self) -> Result<RawTable> {
            if !self.present {
                return Err(IndexFlowError::page_load("table element not found"));
            }
            Ok(RawTable::new(match self.view {
                TableView::Constituents => CONSTITUENTS,
                TableView::Sectors => SECTORS,
            }))
        }
    }

    struct OnePageFactory {
        present: bool,
    }

    impl SourceFactory for OnePageFactory {
        fn open(&self, view: TableView) -> Result<Box<dyn PagedTableSource>> {
            Ok(Box::new(OnePage {
                view,
                present: self.present,
            }))
        }
    }

    async fn context(root: &Path, ruleset: &[&str], blocking: bool) -> PipelineContext {
        let storage = StorageConfig {
            backend: StorageBackend::Local,
            root: root.join("blobs"),
            raw_bucket: "raw".into(),
            raw_prefix: None,
            refined_bucket: "refined".into(),
            refined_prefix: "bovespa_etl".into(),
            file_prefix: "b3".into(),
            work_dir: root.join("work"),
            on_upload_error: UploadPolicy::Ignore,
        };
        let transform = TransformConfig {
            unparseable_dates: DatePolicy::Reject,
            ruleset: ruleset.iter().map(|r| r.to_string()).collect(),
            quality_blocking: blocking,
            catalog_database: "default".into(),
            catalog_table: "bovespa_etl".into(),
        };
        PipelineContext {
            store: Arc::new(LocalBlobStore::new(&storage.root)),
            catalog: Arc::new(Catalog::open(&root.join("catalog.db")).await.unwrap()),
            storage,
            transform,
        }
    }

    fn temp_root() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("indexflow-pipeline-{}", Uuid::now_v7()))
    }

    fn cycle_row(name: &str, quantity: i64, date: &str) -> CycleRow {
        CycleRow {
            code: format!("{name}3"),
            name: name.into(),
            asset_type: "ON".into(),
            theoretical_quantity: quantity,
            weight_pct: 1.0,
            sector: "Financeiro".into(),
            sector_weight_pct: 1.0,
            sector_cum_weight_pct: 1.0,
            collection_date: date.into(),
        }
    }

    #[tokio::test]
    async fn collect_run_is_recorded() {
        let root = temp_root();
        let ctx = context(&root, &["ColumnCount > 0"], false).await;
        let collector = Arc::new(Collector::new(OnePageFactory { present: true }, 1));
        let date = CollectionDate::from_ymd(2026, 1, 2);

        let report = run_once(&ctx, collector, date, &SilentProgress).await.unwrap();
        assert!(report.succeeded(), "{}", report.message);
        assert_eq!(report.rows, 1);
        assert!(report.message.contains("raw/b3-02-01-2026.parquet"));

        let runs = ctx.catalog.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].kind, RunKind::Collect);
        assert_eq!(runs[0].status, RunStatus::Succeeded);
        let stats: serde_json::Value =
            serde_json::from_str(runs[0].stats_json.as_deref().unwrap()).unwrap();
        assert_eq!(stats["collection_date"], "02-01-2026");
    }

    #[tokio::test]
    async fn missing_table_fails_run_without_upload() {
        let root = temp_root();
        let ctx = context(&root, &[], false).await;
        let collector = Arc::new(Collector::new(OnePageFactory { present: false }, 5));

        let report = run_once(&ctx, collector, None, &SilentProgress).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.message.contains("page load error"));
        assert!(ctx.store.list("raw", "").await.unwrap().is_empty());

        let runs = ctx.catalog.list_runs(10).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].stats_json.is_none());
    }

    #[tokio::test]
    async fn transform_writes_partitions_and_quality() {
        let root = temp_root();
        let ctx = context(&root, &["ColumnCount > 0"], false).await;
        ctx.store
            .put("raw", "b3-01-01-2026.parquet", write_cycle(&[cycle_row("ITAUSA", 80, "01-01-2026")]).unwrap())
            .await
            .unwrap();
        ctx.store
            .put(
                "raw",
                "b3-02-01-2026.parquet",
                write_cycle(&[cycle_row("ITAUSA", 100, "02-01-2026"), cycle_row("BRADESCO", 50, "02-01-2026")])
                    .unwrap(),
            )
            .await
            .unwrap();

        let report = run_transform(&ctx, &SilentProgress).await.unwrap();
        assert!(report.succeeded(), "{}", report.message);
        assert_eq!(report.rows, 2);
        assert!(report.message.contains("previous: 01-01-2026"));

        let partitions = ctx.catalog.list_partitions("default", "bovespa_etl").await.unwrap();
        assert_eq!(partitions.len(), 2);

        let quality = ctx.catalog.quality_results("default", "bovespa_etl", 5).await.unwrap();
        assert_eq!(quality.len(), 1);
        assert!(quality[0].passed);
        assert_eq!(quality[0].run_id, report.run_id.to_string());
    }

    #[tokio::test]
    async fn failed_quality_is_best_effort_unless_blocking() {
        let root = temp_root();
        let ctx = context(&root, &["RowCount > 10"], false).await;
        ctx.store
            .put("raw", "b3-02-01-2026.parquet", write_cycle(&[cycle_row("ITAUSA", 1, "02-01-2026")]).unwrap())
            .await
            .unwrap();

        let report = run_transform(&ctx, &SilentProgress).await.unwrap();
        assert!(report.succeeded());
        let quality = ctx.catalog.quality_results("default", "bovespa_etl", 5).await.unwrap();
        assert!(!quality[0].passed);
        assert_eq!(ctx.store.list("refined", "").await.unwrap().len(), 1);

        let blocking = PipelineContext {
            transform: TransformConfig {
                quality_blocking: true,
                ..ctx.transform.clone()
            },
            ..ctx.clone()
        };
        let report = run_transform(&blocking, &SilentProgress).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.message.contains("RowCount > 10"));
    }

    #[tokio::test]
    async fn transform_over_empty_history_fails() {
        let root = temp_root();
        let ctx = context(&root, &[], false).await;
        let report = run_transform(&ctx, &SilentProgress).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.message.contains("empty dataset"));
    }

    #[tokio::test]
    async fn invalid_ruleset_fails_transform() {
        let root = temp_root();
        let ctx = context(&root, &["Completeness > 1"], false).await;
        let report = run_transform(&ctx, &SilentProgress).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.message.contains("invalid quality rule"));
    }
}
