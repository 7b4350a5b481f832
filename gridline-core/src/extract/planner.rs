//! Incremental extraction planning from a table's high-water mark.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::domain::HighWaterMark;

/// Month (1-based) from which a calendar year's season is considered current.
pub const SEASON_START_MONTH: u32 = 9;

/// The season in progress on `date`: the calendar year from September on,
/// the previous year before that.
pub fn current_season(date: NaiveDate) -> i32 {
    if date.month() >= SEASON_START_MONTH {
        date.year()
    } else {
        date.year() - 1
    }
}

/// One fetch the controller performs: a season, optionally narrowed to a week range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchUnit {
    pub season: i32,
    pub weeks: Option<(u32, u32)>,
}

impl FetchUnit {
    pub fn season(season: i32) -> Self {
        Self {
            season,
            weeks: None,
        }
    }

    /// Whether a row with this week belongs to the unit. Rows without a week
    /// are kept only when the unit spans the whole season.
    pub fn admits_week(&self, week: Option<u32>) -> bool {
        match (self.weeks, week) {
            (None, _) => true,
            (Some((from, through)), Some(w)) => w >= from && w <= through,
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionPlan {
    /// Nothing stored yet (or the mark could not be read): the configured scope.
    Full { seasons: Vec<i32> },
    /// Seasons named by the caller; the mark is not consulted.
    Requested { seasons: Vec<i32> },
    /// Seasons after the stored one, through the current season.
    NewSeasons { seasons: Vec<i32> },
    /// Remaining weeks of the current season.
    NewWeeks {
        season: i32,
        from_week: u32,
        through_week: u32,
    },
    UpToDate,
}

impl ExtractionPlan {
    pub fn units(&self) -> Vec<FetchUnit> {
        match self {
            ExtractionPlan::Full { seasons }
            | ExtractionPlan::Requested { seasons }
            | ExtractionPlan::NewSeasons { seasons } => {
                seasons.iter().map(|s| FetchUnit::season(*s)).collect()
            }
            ExtractionPlan::NewWeeks {
                season,
                from_week,
                through_week,
            } => vec![FetchUnit {
                season: *season,
                weeks: Some((*from_week, *through_week)),
            }],
            ExtractionPlan::UpToDate => Vec::new(),
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        matches!(self, ExtractionPlan::UpToDate)
    }
}

impl fmt::Display for ExtractionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |s: &[i32]| {
            s.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            ExtractionPlan::Full { seasons } => write!(f, "full extraction of [{}]", list(seasons)),
            ExtractionPlan::Requested { seasons } => write!(f, "requested seasons [{}]", list(seasons)),
            ExtractionPlan::NewSeasons { seasons } => write!(f, "new seasons [{}]", list(seasons)),
            ExtractionPlan::NewWeeks {
                season,
                from_week,
                through_week,
            } => write!(f, "season {season} weeks {from_week}-{through_week}"),
            ExtractionPlan::UpToDate => write!(f, "up to date"),
        }
    }
}

/// Decides what to fetch given what a table already holds.
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalPlanner {
    full_scope: Vec<i32>,
    season_max_week: u32,
}

impl IncrementalPlanner {
    pub fn new(full_scope: Vec<i32>, season_max_week: u32) -> Self {
        Self {
            full_scope,
            season_max_week,
        }
    }

    /// Plan from the result of reading the high-water mark.
    ///
    /// A failed read falls back to full extraction.
    pub fn plan<E: fmt::Display>(
        &self,
        mark: Result<Option<HighWaterMark>, E>,
        current_season: i32,
    ) -> ExtractionPlan {
        let mark = match mark {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "high-water mark unreadable; falling back to full extraction");
                None
            }
        };
        let Some(mark) = mark else {
            return ExtractionPlan::Full {
                seasons: self.full_scope.clone(),
            };
        };

        if mark.season < current_season {
            return ExtractionPlan::NewSeasons {
                seasons: (mark.season + 1..=current_season).collect(),
            };
        }
        match mark.week {
            Some(week) if mark.season == current_season && week < self.season_max_week => {
                ExtractionPlan::NewWeeks {
                    season: current_season,
                    from_week: week + 1,
                    through_week: self.season_max_week,
                }
            }
            _ => ExtractionPlan::UpToDate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> IncrementalPlanner {
        IncrementalPlanner::new(vec![2020, 2021, 2022, 2023, 2024], 22)
    }

    fn mark(season: i32, week: Option<u32>) -> Result<Option<HighWaterMark>, String> {
        Ok(Some(HighWaterMark { season, week }))
    }

    #[test]
    fn current_season_turns_over_in_september() {
        assert_eq!(current_season(NaiveDate::from_ymd_opt(2024, 8, 31).unwrap()), 2023);
        assert_eq!(current_season(NaiveDate::from_ymd_opt(2024, 9, 1).unwrap()), 2024);
        assert_eq!(current_season(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()), 2024);
    }

    #[test]
    fn empty_table_plans_full_scope() {
        let plan = planner().plan(Ok::<_, String>(None), 2024);
        assert_eq!(
            plan,
            ExtractionPlan::Full {
                seasons: vec![2020, 2021, 2022, 2023, 2024]
            }
        );
    }

    #[test]
    fn unreadable_mark_falls_back_to_full() {
        let plan = planner().plan(Err::<Option<HighWaterMark>, _>("disk on fire"), 2024);
        assert!(matches!(plan, ExtractionPlan::Full { .. }));
    }

    #[test]
    fn older_mark_plans_following_seasons() {
        assert_eq!(
            planner().plan(mark(2022, Some(18)), 2024),
            ExtractionPlan::NewSeasons {
                seasons: vec![2023, 2024]
            }
        );
    }

    #[test]
    fn mid_season_mark_plans_remaining_weeks() {
        let plan = planner().plan(mark(2024, Some(5)), 2024);
        assert_eq!(
            plan,
            ExtractionPlan::NewWeeks {
                season: 2024,
                from_week: 6,
                through_week: 22
            }
        );
        let unit = plan.units()[0];
        assert!(!unit.admits_week(Some(5)));
        assert!(unit.admits_week(Some(6)));
        assert!(!unit.admits_week(None));
    }

    #[test]
    fn week_ten_mark_in_current_season_fetches_weeks_eleven_on() {
        let plan = planner().plan(mark(2023, Some(10)), 2023);
        assert_eq!(
            plan,
            ExtractionPlan::NewWeeks {
                season: 2023,
                from_week: 11,
                through_week: 22
            }
        );
        let units = plan.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].season, 2023);
        assert!(!units[0].admits_week(Some(10)));
        assert!((11..=22).all(|w| units[0].admits_week(Some(w))));
        assert!(!plan.is_up_to_date());
    }

    #[test]
    fn finished_or_future_season_is_up_to_date() {
        assert!(planner().plan(mark(2024, Some(22)), 2024).is_up_to_date());
        assert!(planner().plan(mark(2024, None), 2024).is_up_to_date());
        assert!(planner().plan(mark(2025, Some(1)), 2024).is_up_to_date());
    }
}
