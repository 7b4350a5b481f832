//! Pipeline orchestration.
//!
//! Stages run strictly in sequence within one call:
//! - extraction: plan → fetch with retry → validate → append to bronze
//! - transformation: bronze → normalized week aggregates (silver) → season
//!   totals (gold), optionally plays → games → weeks
//! - consensus: bronze projections → normalized per-source rows (silver) →
//!   merged consensus (gold)
//!
//! Every run returns a status record instead of an error. Silver and gold
//! writes replace one (season, week) key at a time, so re-running a stage
//! never duplicates rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use tracing::{error, info, warn};

use gridline_core::aggregate::Aggregator;
use gridline_core::consensus::{ConsensusMerger, ProjectionNormalizer};
use gridline_core::domain::{
    AggregateLevel, AggregateRecord, ConsensusRecord, DataType, ProjectionRecord, RawRecord,
    RecordBatch, TemporalKey,
};
use gridline_core::extract::{
    current_season, ControllerStats, ExtractionController, ExtractionPlan, Fetcher, OutcomeStatus,
};
use gridline_core::normalize::Normalizer;
use gridline_core::scoring::{fill_half_ppr, rescore};
use gridline_core::store::{ReadFilter, StoreError, TableRef, Warehouse, WarehousePool};
use gridline_core::validate::{latest_by_key, Validator};

use crate::config::PipelineConfig;
use crate::history::{RunLog, RunLogEntry, RunRecord};
use crate::status::{
    ConsensusSummary, ExtractionRequest, ExtractionStatus, Freshness, RunStatus, StageStatus,
    TransformOptions, TransformationSummary,
};

// ── Table names ──────────────────────────────────────────────────────

pub const PLAYER_GAME_STATS: &str = "player_game_stats";
pub const PLAYER_WEEK_STATS: &str = "player_week_stats";
/// Week-level side table built from plays. It is not rolled up to season:
/// gold season totals come from `player_week_stats` only, so play-derived
/// weeks never double count the weekly lines.
pub const PBP_WEEK_STATS: &str = "pbp_week_stats";
pub const PLAYER_PROJECTIONS: &str = "player_projections";
pub const PLAYER_SEASON_TOTALS: &str = "player_season_totals";
pub const CONSENSUS_PROJECTIONS: &str = "consensus_projections";

/// Provenance stamped on rows derived by this pipeline.
const DERIVED_SOURCE: &str = "gridline";

pub struct Pipeline {
    config: PipelineConfig,
    pool: WarehousePool,
    controller: ExtractionController,
    run_log: Option<RunLog>,
    today: Option<NaiveDate>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, fetcher: Arc<dyn Fetcher>, pool: WarehousePool) -> Self {
        let controller = ExtractionController::new(fetcher, config.retry_policy());
        Self {
            config,
            pool,
            controller,
            run_log: None,
            today: None,
        }
    }

    /// Append every run's status to `log`.
    pub fn with_run_log(mut self, log: RunLog) -> Self {
        self.run_log = Some(log);
        self
    }

    /// Pin the calendar date used for the current season and year.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn controller_stats(&self) -> ControllerStats {
        self.controller.stats()
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn log_run(&self, record: RunRecord) {
        if let Some(log) = &self.run_log {
            if let Err(e) = log.append(&RunLogEntry::new(record)) {
                warn!(path = %log.path().display(), error = %e, "run log append failed");
            }
        }
    }

    // ── Extraction ───────────────────────────────────────────────────

    /// Extract, validate and append one data type to its raw table.
    pub fn run_extraction(&mut self, request: &ExtractionRequest) -> ExtractionStatus {
        let status = self.extract_inner(request);
        info!(
            data_type = %request.data_type,
            status = %status.status,
            rows = status.rows_loaded,
            "extraction run finished"
        );
        self.log_run(RunRecord::Extraction(status.clone()));
        status
    }

    fn extract_inner(&mut self, request: &ExtractionRequest) -> ExtractionStatus {
        let data_type = request.data_type;
        let mut status = ExtractionStatus::begin(data_type);
        let today = self.today();
        let season_now = current_season(today);

        let store = match self.pool.handle() {
            Ok(store) => store,
            Err(e) => return status.finish(RunStatus::Error, Some(e.to_string())),
        };
        let target = TableRef::bronze(data_type.bronze_table());

        let plan = match &request.seasons {
            Some(seasons) => ExtractionPlan::Requested {
                seasons: seasons.clone(),
            },
            None if request.force => ExtractionPlan::Full {
                seasons: self.config.seasons(season_now),
            },
            None => self
                .config
                .planner(season_now)
                .plan(store.read_high_water_mark(&target), season_now),
        };
        status.plan = Some(plan.clone());
        if plan.is_up_to_date() {
            return status.finish(RunStatus::NoData, Some(format!("{target} is up to date")));
        }

        let outcome = self.controller.extract(data_type, &plan);
        status.attempts = outcome.attempts;
        status.failures = outcome.failures;
        status.rows_extracted = outcome.rows;
        match outcome.status {
            OutcomeStatus::Error => {
                error!(%data_type, error = ?outcome.error, "extraction failed after retries");
                return status.finish(RunStatus::Error, outcome.error);
            }
            OutcomeStatus::NoData => {
                return status.finish(RunStatus::NoData, Some(format!("no rows for {plan}")));
            }
            OutcomeStatus::Success => {}
        }

        let validator = Validator::new(self.config.validation.rules_for(data_type, today.year()));
        let (mut clean, report) = validator.validate(outcome.batch);
        status.issues = report.messages();
        status.rows_validated = clean.len();
        for issue in &status.issues {
            warn!(%data_type, "{issue}");
        }
        let rejected = report.rejected();
        status.validation = Some(report);
        if rejected || clean.is_empty() {
            self.controller.record_load_failed(status.rows_extracted);
            return status.finish(
                RunStatus::ValidationFailed,
                Some("no rows survived validation".into()),
            );
        }

        clean.stamp_ingested(Utc::now());
        match store.append_batch(&target, &clean) {
            Ok(rows) => {
                self.controller.record_loaded(rows);
                status.rows_loaded = rows;
                status.finish(RunStatus::Success, None)
            }
            Err(e) => {
                self.controller.record_load_failed(clean.len());
                error!(%data_type, error = %e, "load into {target} failed");
                status.finish(RunStatus::LoadFailed, Some(e.to_string()))
            }
        }
    }

    // ── Transformation ───────────────────────────────────────────────

    /// Raw tables → cleaned week aggregates → season totals.
    ///
    /// A stage that ends in anything but success or no data stops the run;
    /// later stages are not attempted.
    pub fn run_transformation(&self, options: TransformOptions) -> TransformationSummary {
        let started_at = Utc::now();
        let mut stages = Vec::new();

        match self.pool.handle() {
            Err(e) => stages.push(StageStatus::new("connect", RunStatus::Error).message(e.to_string())),
            Ok(store) => {
                for stage in Stage::sequence(options) {
                    let result = match stage {
                        Stage::WeeklyStats => self.weekly_stage(store.as_ref(), options.force_recalc),
                        Stage::PlayByPlay => self.play_stage(store.as_ref()),
                        Stage::SeasonTotals => self.season_stage(store.as_ref()),
                    };
                    let status = result.unwrap_or_else(|e| e.into_status(stage.name()));
                    info!(
                        stage = stage.name(),
                        status = %status.status,
                        rows = status.records_out,
                        "stage finished"
                    );
                    let proceed = status.status.can_proceed();
                    stages.push(status);
                    if !proceed {
                        break;
                    }
                }
            }
        }

        let summary = TransformationSummary {
            started_at,
            finished_at: Utc::now(),
            options,
            stages,
        };
        self.log_run(RunRecord::Transformation(summary.clone()));
        summary
    }

    /// Bronze weekly lines → silver `player_week_stats`.
    fn weekly_stage(&self, store: &dyn Warehouse, force_recalc: bool) -> Result<StageStatus, StageError> {
        let name = Stage::WeeklyStats.name();
        let raw = store
            .read(&TableRef::bronze(DataType::WeeklyStats.bronze_table()), ReadFilter::all())
            .map_err(StageError::Read)?;
        if raw.is_empty() {
            return Ok(StageStatus::new(name, RunStatus::NoData).message("no raw weekly stats"));
        }

        let latest = latest_by_key(&raw, DataType::WeeklyStats.natural_key());
        let normalized = Normalizer::new(DataType::WeeklyStats).normalize_batch(latest);
        let scored = rescore_batch(normalized, force_recalc);

        let report = match Aggregator::new().weekly_lines_to_weeks(&scored) {
            Ok(report) => report,
            Err(e) => {
                return Ok(StageStatus::new(name, RunStatus::ValidationFailed)
                    .counts(raw.len(), 0)
                    .message(e.to_string()))
            }
        };
        let written = replace_by_key(store, &TableRef::silver(PLAYER_WEEK_STATS), &report.records)?;
        let mut status = StageStatus::new(name, RunStatus::Success).counts(raw.len(), written);
        if report.skipped > 0 {
            status = status.message(format!("{} rows without a week key skipped", report.skipped));
        }
        Ok(status)
    }

    /// Bronze plays → silver `player_game_stats` and `pbp_week_stats`.
    ///
    /// Stops at week level; see [`PBP_WEEK_STATS`].
    fn play_stage(&self, store: &dyn Warehouse) -> Result<StageStatus, StageError> {
        let name = Stage::PlayByPlay.name();
        let raw = store
            .read(&TableRef::bronze(DataType::PlayByPlay.bronze_table()), ReadFilter::all())
            .map_err(StageError::Read)?;
        if raw.is_empty() {
            return Ok(StageStatus::new(name, RunStatus::NoData).message("no raw plays"));
        }

        let latest = latest_by_key(&raw, DataType::PlayByPlay.natural_key());
        let normalized = Normalizer::new(DataType::PlayByPlay).normalize_batch(latest);
        let aggregator = Aggregator::new();
        let games = match aggregator.events_to_games(&normalized) {
            Ok(games) => games,
            Err(e) => {
                return Ok(StageStatus::new(name, RunStatus::ValidationFailed)
                    .counts(raw.len(), 0)
                    .message(e.to_string()))
            }
        };
        let weeks = match aggregator.games_to_weeks(&games.records) {
            Ok(weeks) => weeks,
            Err(e) => {
                return Ok(StageStatus::new(name, RunStatus::Error)
                    .counts(raw.len(), 0)
                    .message(e.to_string()))
            }
        };

        let game_rows = replace_by_key(store, &TableRef::silver(PLAYER_GAME_STATS), &games.records)?;
        let week_rows = replace_by_key(store, &TableRef::silver(PBP_WEEK_STATS), &weeks)?;
        let mut status =
            StageStatus::new(name, RunStatus::Success).counts(raw.len(), game_rows + week_rows);
        if games.skipped > 0 {
            status = status.message(format!("{} plays without a player or game skipped", games.skipped));
        }
        Ok(status)
    }

    /// Silver week aggregates → gold `player_season_totals`.
    fn season_stage(&self, store: &dyn Warehouse) -> Result<StageStatus, StageError> {
        let name = Stage::SeasonTotals.name();
        let rows = store
            .read(&TableRef::silver(PLAYER_WEEK_STATS), ReadFilter::all())
            .map_err(StageError::Read)?;
        let weeks: Vec<AggregateRecord> = rows
            .iter()
            .filter_map(|r| AggregateRecord::from_record(AggregateLevel::Week, r))
            .collect();
        if weeks.is_empty() {
            return Ok(StageStatus::new(name, RunStatus::NoData).message("no week aggregates"));
        }

        let seasons = match Aggregator::new().weeks_to_seasons(&weeks) {
            Ok(seasons) => seasons,
            Err(e) => {
                return Ok(StageStatus::new(name, RunStatus::Error)
                    .counts(weeks.len(), 0)
                    .message(e.to_string()))
            }
        };
        let written = replace_by_key(store, &TableRef::gold(PLAYER_SEASON_TOTALS), &seasons)?;
        Ok(StageStatus::new(name, RunStatus::Success).counts(weeks.len(), written))
    }

    // ── Consensus ────────────────────────────────────────────────────

    /// Raw projections for one week → silver per-source rows → gold consensus.
    pub fn run_consensus(&self, season: i32, week: u32) -> ConsensusSummary {
        let key = TemporalKey::week(season, week);
        let started_at = Utc::now();
        let stages = match self.pool.handle() {
            Ok(store) => self.consensus_stages(store.as_ref(), key),
            Err(e) => vec![StageStatus::new("connect", RunStatus::Error).message(e.to_string())],
        };
        let summary = ConsensusSummary {
            key,
            started_at,
            finished_at: Utc::now(),
            stages,
        };
        info!(%key, status = %summary.overall(), "consensus run finished");
        self.log_run(RunRecord::Consensus(summary.clone()));
        summary
    }

    fn consensus_stages(&self, store: &dyn Warehouse, key: TemporalKey) -> Vec<StageStatus> {
        let mut stages = Vec::new();
        let projections = match self.projection_stage(store, key) {
            Ok((stage, projections)) => {
                let proceed = stage.status == RunStatus::Success;
                stages.push(stage);
                if !proceed {
                    return stages;
                }
                projections
            }
            Err(e) => {
                stages.push(e.into_status(PLAYER_PROJECTIONS));
                return stages;
            }
        };

        let merger = ConsensusMerger::new(self.config.consensus.priority());
        let merged = merger.merge(&projections);
        let rows: RecordBatch = merged.iter().map(ConsensusRecord::to_record).collect();
        let stage = match store.replace_batch(&TableRef::gold(CONSENSUS_PROJECTIONS), key, &rows) {
            Ok(written) => {
                let status = if written == 0 { RunStatus::NoData } else { RunStatus::Success };
                StageStatus::new(CONSENSUS_PROJECTIONS, status).counts(projections.len(), written)
            }
            Err(e) => StageError::Write(e)
                .into_status(CONSENSUS_PROJECTIONS)
                .counts(projections.len(), 0),
        };
        stages.push(stage);
        stages
    }

    fn projection_stage(
        &self,
        store: &dyn Warehouse,
        key: TemporalKey,
    ) -> Result<(StageStatus, Vec<ProjectionRecord>), StageError> {
        let raw = store
            .read(&TableRef::bronze(DataType::Projections.bronze_table()), ReadFilter::key(key))
            .map_err(StageError::Read)?;
        if raw.is_empty() {
            let stage = StageStatus::new(PLAYER_PROJECTIONS, RunStatus::NoData)
                .message(format!("no raw projections for {key}"));
            return Ok((stage, Vec::new()));
        }

        let latest = latest_by_key(&raw, DataType::Projections.natural_key());
        let normalizer = ProjectionNormalizer::new(self.config.consensus.props_sources.iter());
        let projections = normalizer.normalize_batch(&latest);
        let rows: RecordBatch = projections.iter().map(ProjectionRecord::to_record).collect();
        let written = store
            .replace_batch(&TableRef::silver(PLAYER_PROJECTIONS), key, &rows)
            .map_err(StageError::Write)?;

        let status = if projections.is_empty() { RunStatus::NoData } else { RunStatus::Success };
        let stage = StageStatus::new(PLAYER_PROJECTIONS, status).counts(raw.len(), written);
        Ok((stage, projections))
    }

    // ── Reporting ────────────────────────────────────────────────────

    /// Row count and high-water mark for every raw table.
    pub fn freshness(&self) -> Result<Vec<Freshness>, StoreError> {
        let store = self.pool.handle()?;
        DataType::ALL
            .iter()
            .map(|data_type| {
                let target = TableRef::bronze(data_type.bronze_table());
                Ok(Freshness {
                    data_type: *data_type,
                    table: target.table.clone(),
                    rows: store.row_count(&target)?,
                    high_water_mark: store.read_high_water_mark(&target)?,
                })
            })
            .collect()
    }

    /// The warehouse handle for the calling thread.
    pub fn warehouse(&self) -> Result<Arc<dyn Warehouse>, StoreError> {
        self.pool.handle()
    }
}

/// Transformation stages, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    WeeklyStats,
    PlayByPlay,
    SeasonTotals,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::WeeklyStats => "weekly_stats",
            Stage::PlayByPlay => "play_by_play",
            Stage::SeasonTotals => "season_totals",
        }
    }

    fn sequence(options: TransformOptions) -> Vec<Stage> {
        let mut stages = vec![Stage::WeeklyStats];
        if options.include_detailed {
            stages.push(Stage::PlayByPlay);
        }
        stages.push(Stage::SeasonTotals);
        stages
    }
}

/// Storage failure inside a stage: reads are errors, writes are load failures.
#[derive(Debug)]
enum StageError {
    Read(StoreError),
    Write(StoreError),
}

impl StageError {
    fn into_status(self, stage: &str) -> StageStatus {
        match self {
            StageError::Read(e) => {
                error!(stage, error = %e, "stage read failed");
                StageStatus::new(stage, RunStatus::Error).message(format!("read failed: {e}"))
            }
            StageError::Write(e) => {
                error!(stage, error = %e, "stage write failed");
                StageStatus::new(stage, RunStatus::LoadFailed).message(format!("write failed: {e}"))
            }
        }
    }
}

/// Fill or recompute fantasy points; redeclare columns the scoring added.
fn rescore_batch(batch: RecordBatch, force_recalc: bool) -> RecordBatch {
    let mut out = RecordBatch::with_columns(batch.columns);
    for mut record in batch.records {
        if force_recalc {
            rescore(&mut record);
        } else {
            fill_half_ppr(&mut record);
        }
        out.push(record);
    }
    out
}

/// Replace each (season, week) key of `table` with the aggregates under it.
fn replace_by_key(
    store: &dyn Warehouse,
    table: &TableRef,
    records: &[AggregateRecord],
) -> Result<usize, StageError> {
    let mut by_key: BTreeMap<TemporalKey, Vec<RawRecord>> = BTreeMap::new();
    for record in records {
        by_key
            .entry(record.key.temporal())
            .or_default()
            .push(record.to_record(DERIVED_SOURCE));
    }
    let mut written = 0;
    for (key, rows) in by_key {
        let batch: RecordBatch = rows.into_iter().collect();
        written += store
            .replace_batch(table, key, &batch)
            .map_err(StageError::Write)?;
    }
    Ok(written)
}
