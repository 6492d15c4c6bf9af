//! Raw JSON extracts
//!
//! Three files live in the raw directory: `teams.json`, `players.json` and
//! `games.json`. Per-player event arrays are nested inside `players.json`.
//! Fields the loader must validate itself are kept optional here so a single
//! bad record does not reject the whole file.

use chrono::{DateTime, NaiveDate, Utc};
use courtside_common::{CourtsideError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

pub const TEAMS_FILE: &str = "teams.json";
pub const PLAYERS_FILE: &str = "players.json";
pub const GAMES_FILE: &str = "games.json";

/// Files that must exist before a run starts
pub const REQUIRED_FILES: [&str; 3] = [TEAMS_FILE, PLAYERS_FILE, GAMES_FILE];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTeam {
    pub team_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawGame {
    pub id: i64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPlayer {
    #[serde(default)]
    pub player_id: Option<i64>,
    #[serde(default)]
    pub team_id: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shots: Vec<RawShot>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub passes: Vec<RawPass>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub turnovers: Vec<RawTurnover>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawShot {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub game_id: Option<i64>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub shot_loc_x: Option<serde_json::Value>,
    #[serde(default)]
    pub shot_loc_y: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub points: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shooting_foul_drawn: bool,
    #[serde(default)]
    pub shot_result: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// An explicit `null` reads the same as a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_true<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or_else(default_true))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPass {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub game_id: Option<i64>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub ball_start_loc_x: Option<serde_json::Value>,
    #[serde(default)]
    pub ball_start_loc_y: Option<serde_json::Value>,
    #[serde(default = "default_true", deserialize_with = "null_as_true")]
    pub completed_pass: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub potential_assist: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub turnover: bool,
    #[serde(default)]
    pub target_player_id: Option<i64>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTurnover {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub game_id: Option<i64>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub tov_loc_x: Option<serde_json::Value>,
    #[serde(default)]
    pub tov_loc_y: Option<serde_json::Value>,
    #[serde(default)]
    pub turnover_type: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// All three extracts, parsed
#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    pub teams: Vec<RawTeam>,
    pub players: Vec<RawPlayer>,
    pub games: Vec<RawGame>,
}

impl RawDataset {
    pub fn load(raw_dir: &Path) -> Result<Self> {
        Ok(Self {
            teams: read_json(&raw_dir.join(TEAMS_FILE))?,
            players: read_players(raw_dir)?,
            games: read_json(&raw_dir.join(GAMES_FILE))?,
        })
    }

    pub fn event_count(&self) -> usize {
        self.players
            .iter()
            .map(|p| p.shots.len() + p.passes.len() + p.turnovers.len())
            .sum()
    }
}

/// Verify every required extract exists in `raw_dir`
///
/// Returns the first missing path as [`CourtsideError::MissingInput`].
pub fn check_inputs(raw_dir: &Path) -> Result<()> {
    if !raw_dir.is_dir() {
        return Err(CourtsideError::MissingInput(raw_dir.to_path_buf()));
    }
    for file in REQUIRED_FILES {
        let path = raw_dir.join(file);
        if !path.is_file() {
            return Err(CourtsideError::MissingInput(path));
        }
    }
    Ok(())
}

pub fn read_players(raw_dir: &Path) -> Result<Vec<RawPlayer>> {
    read_json(&raw_dir.join(PLAYERS_FILE))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => CourtsideError::MissingInput(PathBuf::from(path)),
        _ => CourtsideError::ReadInput {
            path: path.to_path_buf(),
            source,
        },
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CourtsideError::MalformedInput {
        path: path.to_path_buf(),
        source,
    })
}
