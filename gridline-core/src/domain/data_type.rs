use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of source data the pipeline extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    PlayByPlay,
    WeeklyStats,
    Rosters,
    Projections,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::PlayByPlay,
        DataType::WeeklyStats,
        DataType::Rosters,
        DataType::Projections,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::PlayByPlay => "play_by_play",
            DataType::WeeklyStats => "weekly_stats",
            DataType::Rosters => "rosters",
            DataType::Projections => "projections",
        }
    }

    /// Column naming the entity a row describes.
    pub fn subject_column(&self) -> &'static str {
        match self {
            DataType::Projections => "player_name",
            _ => "player_id",
        }
    }

    /// Columns that identify a row uniquely.
    pub fn natural_key(&self) -> &'static [&'static str] {
        match self {
            DataType::PlayByPlay => &["game_id", "play_id"],
            DataType::WeeklyStats => &["player_id", "season", "week"],
            DataType::Rosters => &["player_id", "season"],
            DataType::Projections => &["player_name", "source", "season", "week"],
        }
    }

    /// Columns that must be present (and non-null) for a batch to load.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            DataType::PlayByPlay => &["game_id", "play_id", "season", "week"],
            DataType::WeeklyStats => &["player_id", "season", "week"],
            DataType::Rosters => &["player_id", "season"],
            DataType::Projections => &["player_name", "source", "season", "week"],
        }
    }

    /// Whether rows of this type are keyed by week as well as season.
    pub fn is_weekly(&self) -> bool {
        !matches!(self, DataType::Rosters)
    }

    /// Raw-tier table receiving this data type.
    pub fn bronze_table(&self) -> &'static str {
        match self {
            DataType::PlayByPlay => "raw_plays",
            DataType::WeeklyStats => "raw_weekly_stats",
            DataType::Rosters => "raw_rosters",
            DataType::Projections => "raw_projections",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "play_by_play" | "pbp" => Ok(DataType::PlayByPlay),
            "weekly_stats" | "weekly" => Ok(DataType::WeeklyStats),
            "rosters" => Ok(DataType::Rosters),
            "projections" => Ok(DataType::Projections),
            other => Err(format!("unknown data type '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("pbp".parse::<DataType>().unwrap(), DataType::PlayByPlay);
        assert_eq!(
            "weekly-stats".parse::<DataType>().unwrap(),
            DataType::WeeklyStats
        );
        assert!("odds".parse::<DataType>().is_err());
    }

    #[test]
    fn natural_key_columns_are_required() {
        for dt in DataType::ALL {
            for key in dt.natural_key() {
                assert!(
                    dt.required_columns().contains(key),
                    "{dt}: key column {key} not required"
                );
            }
        }
    }
}
