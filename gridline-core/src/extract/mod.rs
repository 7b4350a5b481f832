//! Extraction: fetch sources with retry, plan incremental scope.

pub mod controller;
pub mod planner;
pub mod provider;

pub use controller::{
    AttemptFailure, ControllerStats, ExtractionController, ExtractionOutcome, FetchAttempt,
    FetchOutcome, OutcomeStatus, RetryPolicy,
};
pub use planner::{current_season, ExtractionPlan, FetchUnit, IncrementalPlanner};
pub use provider::{FetchError, Fetcher};
