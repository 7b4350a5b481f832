//! Extraction controller: fetch with fixed-delay retry, per-season caching,
//! failure accounting and load counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::planner::ExtractionPlan;
use super::provider::Fetcher;
use crate::domain::{DataType, RecordBatch};

/// Attempts per unit and the fixed pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(RecordBatch),
    /// The source answered with no rows. Never retried.
    NoData,
    /// Every attempt failed; carries the last error.
    Error(String),
}

/// Result of fetching one unit, with its attempt history.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchAttempt {
    pub outcome: FetchOutcome,
    pub attempts: u32,
    pub failures: Vec<AttemptFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    NoData,
    Error,
}

/// Outcome of extracting one data type under a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub source: String,
    pub data_type: DataType,
    pub status: OutcomeStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempts: u32,
    pub failures: Vec<AttemptFailure>,
    pub error: Option<String>,
    pub rows: usize,
    #[serde(skip)]
    pub batch: RecordBatch,
}

/// Running totals over the controller's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControllerStats {
    pub records_extracted: u64,
    pub records_failed: u64,
    pub failed_attempts: usize,
    pub cached_units: usize,
}

pub struct ExtractionController {
    fetcher: Arc<dyn Fetcher>,
    policy: RetryPolicy,
    cache: HashMap<(DataType, i32), RecordBatch>,
    failure_log: Vec<AttemptFailure>,
    records_extracted: u64,
    records_failed: u64,
}

impl ExtractionController {
    pub fn new(fetcher: Arc<dyn Fetcher>, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            policy,
            cache: HashMap::new(),
            failure_log: Vec::new(),
            records_extracted: 0,
            records_failed: 0,
        }
    }

    pub fn source_name(&self) -> &str {
        self.fetcher.name()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch one (data type, season), retrying errors up to the policy's
    /// attempt limit with a fixed delay between attempts.
    pub fn fetch_with_retry(&mut self, data_type: DataType, season: i32) -> FetchAttempt {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut failures = Vec::new();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                std::thread::sleep(self.policy.delay);
            }

            match self.fetcher.fetch(data_type, season) {
                Ok(batch) if batch.is_empty() => {
                    debug!(%data_type, season, "source returned no rows");
                    return FetchAttempt {
                        outcome: FetchOutcome::NoData,
                        attempts: attempt,
                        failures,
                    };
                }
                Ok(batch) => {
                    return FetchAttempt {
                        outcome: FetchOutcome::Success(batch),
                        attempts: attempt,
                        failures,
                    };
                }
                Err(e) => {
                    warn!(%data_type, season, attempt, error = %e, "fetch attempt failed");
                    last_error = e.to_string();
                    let failure = AttemptFailure {
                        timestamp: Utc::now(),
                        attempt,
                        error: last_error.clone(),
                    };
                    self.failure_log.push(failure.clone());
                    failures.push(failure);
                }
            }
        }

        FetchAttempt {
            outcome: FetchOutcome::Error(last_error),
            attempts: max_attempts,
            failures,
        }
    }

    /// Run a plan for one data type.
    ///
    /// Successful season fetches are cached for the controller's lifetime.
    /// The first unit that exhausts its attempts aborts the run with an error.
    pub fn extract(&mut self, data_type: DataType, plan: &ExtractionPlan) -> ExtractionOutcome {
        let started_at = Utc::now();
        let mut combined = RecordBatch::new();
        let mut attempts = 0;
        let mut failures = Vec::new();

        for unit in plan.units() {
            let cache_key = (data_type, unit.season);
            let mut batch = match self.cache.get(&cache_key) {
                Some(cached) => {
                    debug!(%data_type, season = unit.season, "serving season from cache");
                    cached.clone()
                }
                None => {
                    let fetched = self.fetch_with_retry(data_type, unit.season);
                    attempts += fetched.attempts;
                    failures.extend(fetched.failures);
                    match fetched.outcome {
                        FetchOutcome::Success(batch) => {
                            self.cache.insert(cache_key, batch.clone());
                            batch
                        }
                        FetchOutcome::NoData => continue,
                        FetchOutcome::Error(error) => {
                            return ExtractionOutcome {
                                source: self.fetcher.name().to_string(),
                                data_type,
                                status: OutcomeStatus::Error,
                                started_at,
                                finished_at: Utc::now(),
                                attempts,
                                failures,
                                error: Some(error),
                                rows: 0,
                                batch: RecordBatch::new(),
                            };
                        }
                    }
                }
            };

            if unit.weeks.is_some() {
                batch.retain(|r| unit.admits_week(r.week()));
            }
            combined.extend(batch);
        }

        let status = if combined.is_empty() {
            OutcomeStatus::NoData
        } else {
            OutcomeStatus::Success
        };
        info!(%data_type, %plan, rows = combined.len(), ?status, "extraction finished");

        ExtractionOutcome {
            source: self.fetcher.name().to_string(),
            data_type,
            status,
            started_at,
            finished_at: Utc::now(),
            attempts,
            failures,
            error: None,
            rows: combined.len(),
            batch: combined,
        }
    }

    /// Count rows that reached the warehouse.
    pub fn record_loaded(&mut self, rows: usize) {
        self.records_extracted += rows as u64;
    }

    /// Count rows whose load failed.
    pub fn record_load_failed(&mut self, rows: usize) {
        self.records_failed += rows as u64;
    }

    pub fn failure_log(&self) -> &[AttemptFailure] {
        &self.failure_log
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            records_extracted: self.records_extracted,
            records_failed: self.records_failed,
            failed_attempts: self.failure_log.len(),
            cached_units: self.cache.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawRecord;
    use crate::extract::provider::FetchError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails a fixed number of times, then returns the scripted batch.
    struct FlakyFetcher {
        failures_left: AtomicU32,
        calls: AtomicU32,
        batch: Mutex<RecordBatch>,
    }

    impl FlakyFetcher {
        fn new(failures: u32, rows: usize) -> Self {
            let batch = (0..rows)
                .map(|i| {
                    RawRecord::new("flaky")
                        .with("player_id", format!("P{i}"))
                        .with("season", 2023)
                        .with("week", (i % 3 + 1) as i64)
                })
                .collect();
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                batch: Mutex::new(batch),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for FlakyFetcher {
        fn name(&self) -> &str {
            "flaky"
        }

        fn fetch(&self, _data_type: DataType, _season: i32) -> Result<RecordBatch, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(FetchError::Unreachable("connection reset".into()));
            }
            Ok(self.batch.lock().unwrap().clone())
        }
    }

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn succeeds_on_third_attempt_with_two_failures() {
        let fetcher = Arc::new(FlakyFetcher::new(2, 4));
        let mut controller = ExtractionController::new(fetcher.clone(), no_wait(3));

        let result = controller.fetch_with_retry(DataType::WeeklyStats, 2023);
        assert!(matches!(result.outcome, FetchOutcome::Success(ref b) if b.len() == 4));
        assert_eq!(result.attempts, 3);
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].attempt, 1);
        assert_eq!(result.failures[1].attempt, 2);
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn exhausted_attempts_report_error() {
        let fetcher = Arc::new(FlakyFetcher::new(5, 4));
        let mut controller = ExtractionController::new(fetcher.clone(), no_wait(3));

        let outcome = controller.extract(
            DataType::WeeklyStats,
            &ExtractionPlan::Requested {
                seasons: vec![2023],
            },
        );
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.failures.len(), 3);
        assert!(outcome.error.unwrap().contains("connection reset"));
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(controller.stats().failed_attempts, 3);
    }

    #[test]
    fn empty_result_is_no_data_without_retry() {
        let fetcher = Arc::new(FlakyFetcher::new(0, 0));
        let mut controller = ExtractionController::new(fetcher.clone(), no_wait(3));

        let outcome = controller.extract(
            DataType::WeeklyStats,
            &ExtractionPlan::Requested {
                seasons: vec![2023],
            },
        );
        assert_eq!(outcome.status, OutcomeStatus::NoData);
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn second_run_is_served_from_cache() {
        let fetcher = Arc::new(FlakyFetcher::new(0, 6));
        let mut controller = ExtractionController::new(fetcher.clone(), no_wait(3));
        let plan = ExtractionPlan::Requested {
            seasons: vec![2023],
        };

        let first = controller.extract(DataType::WeeklyStats, &plan);
        let second = controller.extract(DataType::WeeklyStats, &plan);
        assert_eq!(first.rows, 6);
        assert_eq!(second.rows, 6);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(controller.stats().cached_units, 1);
    }

    #[test]
    fn week_plan_filters_rows_to_the_range() {
        let fetcher = Arc::new(FlakyFetcher::new(0, 6));
        let mut controller = ExtractionController::new(fetcher, no_wait(1));
        let outcome = controller.extract(
            DataType::WeeklyStats,
            &ExtractionPlan::NewWeeks {
                season: 2023,
                from_week: 3,
                through_week: 22,
            },
        );
        assert_eq!(outcome.rows, 2);
        assert!(outcome.batch.iter().all(|r| r.week() == Some(3)));
    }

    #[test]
    fn load_counters_accumulate() {
        let mut controller =
            ExtractionController::new(Arc::new(FlakyFetcher::new(0, 1)), no_wait(1));
        controller.record_loaded(10);
        controller.record_loaded(5);
        controller.record_load_failed(3);
        let stats = controller.stats();
        assert_eq!(stats.records_extracted, 15);
        assert_eq!(stats.records_failed, 3);
    }
}
