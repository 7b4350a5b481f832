//! Property tests for pipeline invariants.
//!
//! Uses proptest to verify:
//! 1. Roll-up exactness: summed stats survive every level unchanged
//! 2. Roll-up idempotence: the same input always yields the same output
//! 3. Validator idempotence: cleaning clean data changes nothing
//! 4. Consensus bounds: floor ≤ mean ≤ ceiling, one record per subject

use proptest::prelude::*;
use std::collections::BTreeSet;

use gridline_core::aggregate::Aggregator;
use gridline_core::consensus::{ConsensusMerger, SourcePriority};
use gridline_core::domain::{
    DataType, ProjectionRecord, RawRecord, RecordBatch, SubjectId, TemporalKey,
};
use gridline_core::validate::{ValidationRules, Validator};

// ── Strategies (proptest) ────────────────────────────────────────────

/// (player, game, week, yards, receptions) tuples for play rows.
fn arb_play() -> impl Strategy<Value = (u8, u8, u32, i64, i64)> {
    (0u8..4, 0u8..3, 1u32..6, -10i64..60, 0i64..2)
}

fn play_batch(plays: &[(u8, u8, u32, i64, i64)]) -> RecordBatch {
    plays
        .iter()
        .enumerate()
        .map(|(i, (player, game, week, yards, rec))| {
            RawRecord::new("pbp")
                .with("player_id", format!("P{player}"))
                .with("game_id", format!("2023_{week:02}_G{game}"))
                .with("play_id", i as i64)
                .with("season", 2023)
                .with("week", *week)
                .with("receiving_yards", *yards as f64)
                .with("receptions", *rec)
        })
        .collect()
}

fn arb_weekly_row() -> impl Strategy<Value = (u8, i32, u32, i64)> {
    (0u8..5, 1995i32..2030, 0u32..25, -200i64..200)
}

// ── 1-2. Roll-up ─────────────────────────────────────────────────────

proptest! {
    /// Sums at game, week, and season level all equal the sum over plays.
    #[test]
    fn rollup_preserves_sums(plays in prop::collection::vec(arb_play(), 1..80)) {
        let batch = play_batch(&plays);
        let total_yards: f64 = plays.iter().map(|p| p.3 as f64).sum();
        let total_rec: f64 = plays.iter().map(|p| p.4 as f64).sum();

        let agg = Aggregator::new();
        let games = agg.events_to_games(&batch).unwrap();
        prop_assert_eq!(games.skipped, 0);
        let weeks = agg.games_to_weeks(&games.records).unwrap();
        let seasons = agg.weeks_to_seasons(&weeks).unwrap();

        for level in [&games.records, &weeks, &seasons] {
            let yards: f64 = level.iter().map(|r| r.sum("receiving_yards")).sum();
            let rec: f64 = level.iter().map(|r| r.sum("receptions")).sum();
            prop_assert_eq!(yards, total_yards);
            prop_assert_eq!(rec, total_rec);
        }

        let plays_counted: u32 = seasons.iter().map(|r| r.plays).sum();
        prop_assert_eq!(plays_counted as usize, plays.len());
    }

    /// Games played at season level equals distinct games per player.
    #[test]
    fn season_games_played_counts_distinct_games(plays in prop::collection::vec(arb_play(), 1..80)) {
        let batch = play_batch(&plays);
        let agg = Aggregator::new();
        let games = agg.events_to_games(&batch).unwrap();
        let seasons = agg
            .weeks_to_seasons(&agg.games_to_weeks(&games.records).unwrap())
            .unwrap();

        for season in &seasons {
            let expected: BTreeSet<(u32, u8)> = plays
                .iter()
                .filter(|p| format!("P{}", p.0) == season.key.subject.as_str())
                .map(|p| (p.2, p.1))
                .collect();
            prop_assert_eq!(season.games_played as usize, expected.len());
        }
    }

    /// Running the roll-up twice yields identical output.
    #[test]
    fn rollup_is_idempotent(plays in prop::collection::vec(arb_play(), 1..60)) {
        let batch = play_batch(&plays);
        let agg = Aggregator::new();
        let first = agg.events_to_games(&batch).unwrap();
        let second = agg.events_to_games(&batch).unwrap();
        prop_assert_eq!(&first, &second);

        let w1 = agg.games_to_weeks(&first.records).unwrap();
        let w2 = agg.games_to_weeks(&second.records).unwrap();
        prop_assert_eq!(
            serde_json::to_string(&w1).unwrap(),
            serde_json::to_string(&w2).unwrap()
        );
    }
}

// ── 3. Validator ─────────────────────────────────────────────────────

proptest! {
    /// A second validation pass over cleaned rows reports nothing and
    /// returns the same rows.
    #[test]
    fn validation_is_idempotent(rows in prop::collection::vec(arb_weekly_row(), 0..60)) {
        let batch: RecordBatch = rows
            .iter()
            .map(|(player, season, week, pts)| {
                RawRecord::new("csv")
                    .with("player_id", format!("P{player}"))
                    .with("season", *season)
                    .with("week", *week)
                    .with("fantasy_points_ppr", *pts)
            })
            .collect();
        let validator = Validator::new(ValidationRules::for_data_type(DataType::WeeklyStats, 2024));

        let (clean, report) = validator.validate(batch);
        prop_assert_eq!(report.output_rows, clean.len());
        prop_assert_eq!(report.input_rows - report.rows_removed(), clean.len());

        for r in clean.iter() {
            let season = r.season().unwrap();
            let week = r.week().unwrap();
            prop_assert!((2000..=2025).contains(&season));
            prop_assert!((1..=22).contains(&week));
            let pts = r.f64("fantasy_points_ppr").unwrap();
            prop_assert!((-10.0..=100.0).contains(&pts));
        }

        let (again, second) = validator.validate(clean.clone());
        prop_assert!(second.is_clean());
        prop_assert_eq!(again, clean);
    }
}

// ── 4. Consensus ─────────────────────────────────────────────────────

fn projection(subject: &str, source: &str, points: f64) -> ProjectionRecord {
    ProjectionRecord {
        subject: SubjectId::new(subject),
        key: TemporalKey::week(2024, 5),
        source: source.to_string(),
        position: None,
        team: None,
        points_ppr: Some(points),
        points_standard: None,
        points_half_ppr: None,
        stats: Default::default(),
        has_props: false,
        completeness: 1.0,
    }
}

proptest! {
    #[test]
    fn consensus_bounds_hold(values in prop::collection::vec((0u8..3, 0u8..4, 0.5..40.0_f64), 1..40)) {
        let rows: Vec<ProjectionRecord> = values
            .iter()
            .map(|(subject, source, pts)| projection(&format!("Player {subject}"), &format!("src{source}"), *pts))
            .collect();
        let merger = ConsensusMerger::new(SourcePriority::new(["src1", "src0"]));
        let merged = merger.merge(&rows);

        let subjects: BTreeSet<_> = merged.iter().map(|r| r.subject.clone()).collect();
        prop_assert_eq!(subjects.len(), merged.len());

        for rec in &merged {
            let s = &rec.points_ppr;
            prop_assert!(s.min <= s.mean + 0.01);
            prop_assert!(s.mean <= s.max + 0.01);
            prop_assert!(rec.source_count >= 1);
            prop_assert_eq!(rec.source_values.len(), rec.source_count);
            if rec.source_count == 1 {
                prop_assert!(s.std_dev.is_none());
            }
        }
    }
}
