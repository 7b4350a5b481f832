//! Cleaning applied to raw rows on their way to the cleaned tier.
//!
//! - team abbreviations mapped to their current codes
//! - positions collapsed to fantasy position groups
//! - player names trimmed, whitespace collapsed, initials de-dotted
//! - non-finite numbers turned into nulls
//! - counting stats zero-filled
//! - source-specific column names renamed to canonical ones

use crate::aggregate::schema::{is_ratio, MAX_STATS, MEAN_STATS};
use crate::domain::{DataType, FieldValue, RawRecord, RecordBatch};

const TEAM_CODES: &[(&str, &str)] = &[
    ("ARZ", "ARI"),
    ("GNB", "GB"),
    ("JAC", "JAX"),
    ("KAN", "KC"),
    ("LA", "LAR"),
    ("SD", "LAC"),
    ("LVR", "LV"),
    ("OAK", "LV"),
    ("NWE", "NE"),
    ("NOR", "NO"),
    ("SFO", "SF"),
    ("TAM", "TB"),
    ("WSH", "WAS"),
];

const POSITION_GROUPS: &[(&str, &str)] = &[
    ("HB", "RB"),
    ("FB", "RB"),
    ("PK", "K"),
    ("DEF", "DST"),
    ("D/ST", "DST"),
    ("CB", "DB"),
    ("S", "DB"),
    ("SS", "DB"),
    ("FS", "DB"),
    ("ILB", "LB"),
    ("OLB", "LB"),
    ("MLB", "LB"),
    ("DE", "DL"),
    ("DT", "DL"),
    ("NT", "DL"),
    ("C", "OL"),
    ("G", "OL"),
    ("T", "OL"),
    ("OG", "OL"),
    ("OT", "OL"),
];

/// Suffixes some feeds attach to names that others omit.
const NAME_SUFFIXES: &[&str] = &[" II", " III", " IV", " Jr.", " Sr.", " Jr", " Sr"];

/// Column-name fragments of counting stats that default to zero. Shares,
/// longest plays and ratios match some fragments but stay null when missing.
const ZERO_FILL_PATTERNS: &[&str] = &[
    "yards",
    "attempts",
    "completions",
    "carries",
    "targets",
    "receptions",
    "touchdowns",
    "tds",
    "interceptions",
    "fumbles",
];

const TEAM_COLUMNS: &[&str] = &["team", "recent_team", "posteam", "defteam", "home_team", "away_team"];

const WEEKLY_RENAMES: &[(&str, &str)] = &[
    ("recent_team", "team"),
    ("player_display_name", "player_name"),
    ("carries", "rushing_attempts"),
    ("attempts", "passing_attempts"),
    ("fantasy_points", "fantasy_points_standard"),
];

const PLAY_RENAMES: &[(&str, &str)] = &[
    ("fantasy_player_id", "player_id"),
    ("fantasy_player_name", "player_name"),
    ("posteam", "team"),
    ("pass_attempt", "passing_attempts"),
    ("complete_pass", "completions"),
    ("rush_attempt", "rushing_attempts"),
    ("pass_touchdown", "passing_tds"),
    ("rush_touchdown", "rushing_tds"),
    ("interception", "interceptions"),
    ("fumble_lost", "fumbles_lost"),
];

pub fn normalize_team(code: &str) -> String {
    let upper = code.trim().to_ascii_uppercase();
    TEAM_CODES
        .iter()
        .find(|(from, _)| *from == upper)
        .map_or(upper, |(_, to)| to.to_string())
}

pub fn normalize_position(position: &str) -> String {
    let upper = position.trim().to_ascii_uppercase();
    POSITION_GROUPS
        .iter()
        .find(|(from, _)| *from == upper)
        .map_or(upper, |(_, to)| to.to_string())
}

/// Trim, collapse whitespace, and drop periods after capital initials ("A.J." → "AJ").
pub fn clean_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let mut prev: Option<char> = None;
    for c in collapsed.chars() {
        if c == '.' && prev.is_some_and(|p| p.is_ascii_uppercase()) {
            prev = Some(c);
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Name used to match the same player across projection feeds.
pub fn match_name(name: &str) -> String {
    let mut cleaned = clean_name(name);
    for suffix in NAME_SUFFIXES {
        if let Some(stripped) = cleaned.strip_suffix(suffix) {
            cleaned = stripped.trim_end().to_string();
            break;
        }
    }
    cleaned
}

fn is_zero_fill(column: &str) -> bool {
    if MEAN_STATS.contains(&column) || MAX_STATS.contains(&column) || is_ratio(column) {
        return false;
    }
    ZERO_FILL_PATTERNS.iter().any(|p| column.contains(p))
}

fn is_name_column(column: &str) -> bool {
    column == "player_name" || column.ends_with("_player_name")
}

/// Row cleaner for one data type.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    data_type: DataType,
}

impl Normalizer {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }

    fn renames(&self) -> &'static [(&'static str, &'static str)] {
        match self.data_type {
            DataType::WeeklyStats => WEEKLY_RENAMES,
            DataType::PlayByPlay => PLAY_RENAMES,
            _ => &[],
        }
    }

    pub fn normalize_record(&self, record: &mut RawRecord) {
        for (from, to) in self.renames() {
            if record.fields.contains_key(*to) {
                continue;
            }
            if let Some(value) = record.remove(from) {
                record.set(to, value);
            }
        }

        for (column, value) in record.fields.iter_mut() {
            if let FieldValue::Float(v) = value {
                if !v.is_finite() {
                    *value = FieldValue::Null;
                }
            }
            match value {
                FieldValue::Text(s) if TEAM_COLUMNS.contains(&column.as_str()) => {
                    *s = normalize_team(s);
                }
                FieldValue::Text(s) if column == "position" => {
                    *s = normalize_position(s);
                }
                FieldValue::Text(s) if is_name_column(column) => {
                    *s = clean_name(s);
                }
                FieldValue::Null if is_zero_fill(column) => {
                    *value = FieldValue::Int(0);
                }
                _ => {}
            }
        }

        if self.data_type == DataType::WeeklyStats && record.get("games_played").is_null() {
            record.set("games_played", 1);
        }
    }

    /// Normalize every row. Declared columns follow the renames and are
    /// zero-filled in rows that lack them.
    pub fn normalize_batch(&self, batch: RecordBatch) -> RecordBatch {
        let mut columns = batch.columns;
        for (from, to) in self.renames() {
            if columns.remove(*from) {
                columns.insert(to.to_string());
            }
        }
        if self.data_type == DataType::WeeklyStats {
            columns.insert("games_played".to_string());
        }
        let zero_fill: Vec<String> = columns.iter().filter(|c| is_zero_fill(c)).cloned().collect();

        let records = batch
            .records
            .into_iter()
            .map(|mut record| {
                for column in &zero_fill {
                    record.fields.entry(column.clone()).or_insert(FieldValue::Null);
                }
                self.normalize_record(&mut record);
                record
            })
            .collect();
        RecordBatch { columns, records }
    }
}
