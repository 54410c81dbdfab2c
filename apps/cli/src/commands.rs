//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indexflow_collector::{Collector, TableSourceFactory};
use indexflow_core::{
    PipelineContext, ProgressReporter, RunReport, Scheduler, SilentProgress, run_once,
    run_transform,
};
use indexflow_shared::{
    AppConfig, CollectionDate, SourceConfig, StorageConfig, TransformConfig, config_file_path,
    expand_home, init_config, init_config_at, load_config, load_config_from,
};
use indexflow_storage::{Catalog, open_blob_store, upload_artifact};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// IndexFlow: index composition collector and delta pipeline.
#[derive(Parser)]
#[command(
    name = "indexflow",
    version,
    about = "Collect index composition tables and publish per-cycle datasets and deltas.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.indexflow/indexflow.toml).
    #[arg(long, global = true, env = "INDEXFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Collect one cycle and publish it to the raw bucket.
    Collect {
        /// Stamp the cycle with this date (DD-MM-YYYY) instead of today.
        #[arg(long)]
        date: Option<CollectionDate>,
    },

    /// Aggregate the accumulated cycles into the refined, catalogued table.
    Transform,

    /// Run collection on a fixed delay until interrupted.
    Schedule {
        /// Hours between the end of one run and the start of the next.
        #[arg(long)]
        every_hours: Option<u64>,

        /// Run a transform after every successful collection.
        #[arg(long)]
        with_transform: bool,

        /// Stop after this many runs.
        #[arg(long)]
        max_runs: Option<usize>,
    },

    /// Blob store operations.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Catalog inspection.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Show recent pipeline runs.
    Runs {
        /// Number of runs to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum StoreAction {
    /// List object keys.
    List {
        /// Bucket (defaults to the raw bucket).
        #[arg(long)]
        bucket: Option<String>,

        /// Key prefix.
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Upload a local file.
    Put {
        /// File to upload.
        file: PathBuf,

        /// Bucket (defaults to the raw bucket).
        #[arg(long)]
        bucket: Option<String>,

        /// Object name (defaults to the file name).
        #[arg(long)]
        name: Option<String>,

        /// Key prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Delete an object.
    Delete {
        /// Object key.
        key: String,

        /// Bucket (defaults to the raw bucket).
        #[arg(long)]
        bucket: Option<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum CatalogAction {
    /// Show registered tables, partitions and the latest quality results.
    Show {
        /// Also list every partition.
        #[arg(long)]
        partitions: bool,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "indexflow=info",
        1 => "indexflow=debug",
        _ => "indexflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let settings = || -> Result<AppConfig> {
        Ok(match &config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        })
    };

    match cli.command {
        Command::Collect { date } => cmd_collect(&settings()?, date).await,
        Command::Transform => cmd_transform(&settings()?).await,
        Command::Schedule {
            every_hours,
            with_transform,
            max_runs,
        } => cmd_schedule(&settings()?, every_hours, with_transform, max_runs).await,
        Command::Store { action } => cmd_store(&settings()?, action).await,
        Command::Catalog { action } => match action {
            CatalogAction::Show { partitions } => cmd_catalog_show(&settings()?, partitions).await,
        },
        Command::Runs { limit } => cmd_runs(&settings()?, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path.clone()),
            ConfigAction::Show => cmd_config_show(&settings()?),
        },
    }
}

async fn open_catalog(config: &AppConfig) -> Result<Arc<Catalog>> {
    Ok(Arc::new(Catalog::open(&expand_home(&config.catalog.path)).await?))
}

async fn open_context(config: &AppConfig) -> Result<PipelineContext> {
    let storage = StorageConfig::from(config);
    Ok(PipelineContext {
        store: open_blob_store(&storage).await?,
        catalog: open_catalog(config).await?,
        storage,
        transform: TransformConfig::from(config),
    })
}

fn collector(config: &AppConfig) -> Arc<Collector<TableSourceFactory>> {
    let source = SourceConfig::from(config);
    let pages = source.page_count;
    Arc::new(Collector::new(TableSourceFactory::new(source), pages))
}

/// Print the coarse outcome and turn a failed run into a non-zero exit.
fn report_outcome(report: &RunReport) -> Result<()> {
    println!();
    println!("  Status:  {} ({})", report.status, report.status.status_code());
    println!("  Message: {}", report.message);
    println!("  Run:     {}", report.run_id);
    println!("  Time:    {:.1}s", report.elapsed.as_secs_f64());
    println!();

    if report.succeeded() {
        Ok(())
    } else {
        Err(eyre!("{} run failed: {}", report.kind, report.message))
    }
}

async fn cmd_collect(config: &AppConfig, date: Option<CollectionDate>) -> Result<()> {
    let ctx = open_context(config).await?;
    info!(url = %config.source.url, engine = ?config.source.engine, "collecting");

    let reporter = CliProgress::new();
    let report = run_once(&ctx, collector(config), date, &reporter).await?;
    report_outcome(&report)
}

async fn cmd_transform(config: &AppConfig) -> Result<()> {
    let ctx = open_context(config).await?;
    info!(bucket = %ctx.storage.raw_bucket, "transforming accumulated dataset");

    let reporter = CliProgress::new();
    let report = run_transform(&ctx, &reporter).await?;
    report_outcome(&report)
}

async fn cmd_schedule(
    config: &AppConfig,
    every_hours: Option<u64>,
    with_transform: bool,
    max_runs: Option<usize>,
) -> Result<()> {
    let ctx = open_context(config).await?;
    let collector = collector(config);

    let mut scheduler = Scheduler::from_config(&config.schedule);
    if let Some(hours) = every_hours {
        scheduler.interval = Duration::from_secs(hours.saturating_mul(3600));
    }
    scheduler.max_runs = max_runs;

    info!(
        interval_secs = scheduler.interval.as_secs(),
        with_transform,
        halt_on_failure = scheduler.halt_on_failure,
        "scheduler started"
    );

    let job = |run: usize| scheduled_run(ctx.clone(), collector.clone(), with_transform, run);
    let summary = tokio::select! {
        summary = scheduler.run(job) => summary,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping scheduler");
            return Ok(());
        }
    };

    println!();
    println!("  Runs:     {}", summary.runs);
    println!("  Failures: {}", summary.failures);
    println!();

    if summary.halted {
        return Err(eyre!("scheduler halted after a failed run"));
    }
    Ok(())
}

async fn scheduled_run(
    ctx: PipelineContext,
    collector: Arc<Collector<TableSourceFactory>>,
    with_transform: bool,
    run: usize,
) -> indexflow_shared::Result<RunReport> {
    info!(run, "scheduled run starting");
    let report = run_once(&ctx, collector, None, &SilentProgress).await?;
    if with_transform && report.succeeded() {
        return run_transform(&ctx, &SilentProgress).await;
    }
    Ok(report)
}

async fn cmd_store(config: &AppConfig, action: StoreAction) -> Result<()> {
    let storage = StorageConfig::from(config);
    let store = open_blob_store(&storage).await?;

    match action {
        StoreAction::List { bucket, prefix } => {
            let bucket = bucket.unwrap_or_else(|| storage.raw_bucket.clone());
            let keys = store.list(&bucket, &prefix).await?;
            for key in &keys {
                println!("{bucket}/{key}");
            }
            info!(bucket, count = keys.len(), "listed objects");
        }
        StoreAction::Put {
            file,
            bucket,
            name,
            prefix,
        } => {
            let bucket = bucket.unwrap_or_else(|| storage.raw_bucket.clone());
            let key =
                upload_artifact(store.as_ref(), &file, &bucket, name.as_deref(), prefix.as_deref())
                    .await?;
            println!("uploaded {} to {bucket}/{key}", file.display());
        }
        StoreAction::Delete { key, bucket } => {
            let bucket = bucket.unwrap_or_else(|| storage.raw_bucket.clone());
            if store.delete(&bucket, &key).await? {
                println!("deleted {bucket}/{key}");
            } else {
                println!("nothing to delete at {bucket}/{key}");
            }
        }
    }
    Ok(())
}

async fn cmd_catalog_show(config: &AppConfig, show_partitions: bool) -> Result<()> {
    let catalog = open_catalog(config).await?;
    let tables = catalog.list_tables().await?;

    if tables.is_empty() {
        println!("no tables registered in {}", config.catalog.path);
        return Ok(());
    }

    for table in &tables {
        let spec = &table.spec;
        let partitions = catalog.list_partitions(&spec.database, &spec.name).await?;
        println!();
        println!("  Table:       {}.{}", spec.database, spec.name);
        println!("  Location:    {}", spec.location);
        println!("  Format:      {} ({})", spec.format, spec.compression);
        println!("  Partitions:  {} by {}", partitions.len(), spec.partition_keys.join(", "));
        println!("  Updated:     {}", table.updated_at);

        if show_partitions {
            for partition in &partitions {
                let values: Vec<String> = partition
                    .spec
                    .values
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                println!(
                    "    {}  rows={}  sha256={}",
                    values.join("/"),
                    partition.spec.row_count,
                    partition.spec.content_hash
                );
            }
        }

        if let Some(latest) = catalog
            .quality_results(&spec.database, &spec.name, 1)
            .await?
            .first()
        {
            let verdict = if latest.passed { "passed" } else { "failed" };
            println!("  Quality:     {verdict} at {} (run {})", latest.evaluated_at, latest.run_id);
        }
    }
    println!();
    Ok(())
}

async fn cmd_runs(config: &AppConfig, limit: u32) -> Result<()> {
    let catalog = open_catalog(config).await?;
    let runs = catalog.list_runs(limit).await?;

    if runs.is_empty() {
        println!("no runs recorded yet");
        return Ok(());
    }

    for run in &runs {
        println!(
            "{}  {:<9}  {:<9}  {}  {}",
            run.started_at,
            run.kind.as_str(),
            run.status.as_str(),
            run.id,
            run.message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn cmd_config_init(path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => {
            init_config_at(&path)?;
            path
        }
        None => init_config()?,
    };
    println!("Config written to {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).map_err(|e| eyre!("cannot render config: {e}"))?;
    if let Ok(path) = config_file_path() {
        println!("# default location: {}", path.display());
    }
    println!("{rendered}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}
