//! Gridline CLI: extraction, transformation, consensus, status and export.
//!
//! Commands:
//! - `extract`: fetch, validate and append raw data to the bronze tier
//! - `transform`: rebuild silver week aggregates and gold season totals
//! - `consensus`: merge one week's projections and print the top players
//! - `status`: row counts and high-water marks per raw table, recent runs
//! - `export`: write a warehouse table to CSV

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gridline_core::domain::{DataType, TemporalKey};
use gridline_core::store::{ParquetWarehouse, ReadFilter, TableRef, Tier, Warehouse, WarehousePool};
use gridline_runner::{
    export_table, format_consensus_table, top_consensus, CsvFileFetcher, ExtractionRequest,
    Pipeline, PipelineConfig, RunLog, RunRecord, RunStatus, TransformOptions,
};

#[derive(Parser)]
#[command(
    name = "gridline",
    about = "Gridline: football stats pipeline: extract, validate, roll up, merge projections"
)]
struct Cli {
    /// Pipeline config file. Defaults apply when the file is absent.
    #[arg(long, global = true, default_value = "gridline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract raw data into the bronze tier.
    Extract {
        /// Data types to extract (play_by_play, weekly_stats, rosters, projections). Defaults to all.
        #[arg(long = "data-type")]
        data_types: Vec<DataType>,

        /// Seasons to extract. Without this the stored high-water mark decides.
        #[arg(long = "season")]
        seasons: Vec<i32>,

        /// Ignore the high-water mark and extract the full configured scope.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Rebuild silver and gold tables from bronze.
    Transform {
        /// Also roll play-by-play up through games and weeks.
        #[arg(long, default_value_t = false)]
        detailed: bool,

        /// Recompute fantasy points from stat columns.
        #[arg(long, default_value_t = false)]
        force_recalc: bool,
    },
    /// Merge one week's projections into consensus and print the best.
    Consensus {
        #[arg(long)]
        season: i32,

        #[arg(long)]
        week: u32,

        /// Rows to print.
        #[arg(long, default_value_t = 25)]
        top: usize,
    },
    /// Report raw table freshness and recent runs.
    Status {
        /// Recent run log entries to show.
        #[arg(long, default_value_t = 10)]
        runs: usize,
    },
    /// Export a warehouse table to CSV.
    Export {
        /// bronze, silver or gold.
        #[arg(long)]
        tier: Tier,

        #[arg(long)]
        table: String,

        #[arg(long)]
        season: Option<i32>,

        #[arg(long)]
        week: Option<u32>,

        /// Output CSV path.
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    init_tracing(&config.logging.filter);

    match cli.command {
        Commands::Extract {
            data_types,
            seasons,
            force,
        } => run_extract(config, data_types, seasons, force),
        Commands::Transform {
            detailed,
            force_recalc,
        } => run_transform(config, detailed, force_recalc),
        Commands::Consensus { season, week, top } => run_consensus(config, season, week, top),
        Commands::Status { runs } => run_status(config, runs),
        Commands::Export {
            tier,
            table,
            season,
            week,
            out,
        } => run_export(config, tier, table, season, week, &out),
    }
}

fn init_tracing(fallback: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_pipeline(config: PipelineConfig) -> Pipeline {
    let root = config.storage.root.clone();
    let pool = WarehousePool::new(move || {
        Ok(Arc::new(ParquetWarehouse::new(&root)) as Arc<dyn Warehouse>)
    });
    let fetcher = Arc::new(CsvFileFetcher::new(&config.extraction.source_dir));
    let run_log = RunLog::new(config.storage.run_log_path());
    Pipeline::new(config, fetcher, pool).with_run_log(run_log)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_extract(
    config: PipelineConfig,
    data_types: Vec<DataType>,
    seasons: Vec<i32>,
    force: bool,
) -> Result<()> {
    let data_types = if data_types.is_empty() {
        DataType::ALL.to_vec()
    } else {
        data_types
    };
    let seasons = (!seasons.is_empty()).then_some(seasons);

    let mut pipeline = build_pipeline(config);
    let mut errored = Vec::new();
    for data_type in data_types {
        let status = pipeline.run_extraction(&ExtractionRequest {
            data_type,
            seasons: seasons.clone(),
            force,
        });
        print_json(&status)?;
        if status.status == RunStatus::Error {
            errored.push(data_type.to_string());
        }
    }

    let stats = pipeline.controller_stats();
    info!(
        extracted = stats.records_extracted,
        failed = stats.records_failed,
        failed_attempts = stats.failed_attempts,
        "extraction finished"
    );
    if !errored.is_empty() {
        bail!("extraction failed for {}", errored.join(", "));
    }
    Ok(())
}

fn run_transform(config: PipelineConfig, detailed: bool, force_recalc: bool) -> Result<()> {
    let pipeline = build_pipeline(config);
    let summary = pipeline.run_transformation(TransformOptions {
        include_detailed: detailed,
        force_recalc,
    });
    print_json(&summary)?;
    if summary.stages.iter().any(|s| s.status == RunStatus::Error) {
        bail!("transformation failed: {}", summary.overall());
    }
    Ok(())
}

fn run_consensus(config: PipelineConfig, season: i32, week: u32, top: usize) -> Result<()> {
    let pipeline = build_pipeline(config);
    let summary = pipeline.run_consensus(season, week);
    print_json(&summary)?;
    if summary.stages.iter().any(|s| s.status == RunStatus::Error) {
        bail!("consensus for {season} week {week} failed");
    }

    let store = pipeline.warehouse()?;
    let records = top_consensus(store.as_ref(), TemporalKey::week(season, week), top)?;
    if records.is_empty() {
        println!("No consensus projections for {season} week {week}");
    } else {
        print!("{}", format_consensus_table(&records));
    }
    Ok(())
}

fn run_status(config: PipelineConfig, runs: usize) -> Result<()> {
    let pipeline = build_pipeline(config);
    let freshness = pipeline.freshness().context("failed to read warehouse")?;

    println!("Warehouse: {}", pipeline.config().storage.root.display());
    println!("{:<14} {:<18} {:>10}  {}", "Data type", "Table", "Rows", "Latest");
    println!("{}", "-".repeat(56));
    for entry in &freshness {
        let latest = match entry.high_water_mark {
            Some(mark) => match mark.week {
                Some(week) => format!("{} week {week}", mark.season),
                None => mark.season.to_string(),
            },
            None => "-".to_string(),
        };
        println!(
            "{:<14} {:<18} {:>10}  {}",
            entry.data_type.as_str(),
            entry.table,
            entry.rows,
            latest
        );
    }

    let log = RunLog::new(pipeline.config().storage.run_log_path());
    let recent = log
        .tail(runs)
        .with_context(|| format!("failed to read {}", log.path().display()))?;
    if !recent.is_empty() {
        println!();
        println!("Recent runs:");
        for entry in &recent {
            let kind = match &entry.record {
                RunRecord::Extraction(s) => format!("extract {}", s.data_type),
                RunRecord::Transformation(_) => "transform".to_string(),
                RunRecord::Consensus(s) => format!("consensus {}", s.key),
            };
            println!(
                "  {}  {:<28} {}",
                entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                kind,
                entry.status
            );
        }
    }
    Ok(())
}

fn run_export(
    config: PipelineConfig,
    tier: Tier,
    table: String,
    season: Option<i32>,
    week: Option<u32>,
    out: &Path,
) -> Result<()> {
    if week.is_some() && season.is_none() {
        bail!("--week requires --season");
    }
    let store = ParquetWarehouse::new(&config.storage.root);
    let target = TableRef::new(tier, table);
    let filter = ReadFilter { season, week };
    let rows = export_table(&store, &target, filter, out)?;
    println!("Exported {rows} rows from {target} to {}", out.display());
    Ok(())
}
