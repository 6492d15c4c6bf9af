//! Raw-data fixtures shared by the integration tests

#![allow(dead_code)]

use courtside_etl::{PipelineOptions, Stage};
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

/// Game ids and dates in the generated `games.json`
pub const GAMES: [(i64, &str); 3] = [(10, "2023-10-25"), (11, "2023-12-01"), (12, "2024-03-10")];

pub const ACTION_LABELS: [&str; 4] = ["pickAndRoll", "isolation", "postUp", "offBallScreen"];

/// Shape of a generated extract
#[derive(Debug, Clone, Copy)]
pub struct FixtureShape {
    pub players: usize,
    pub shots: usize,
    pub passes: usize,
    pub turnovers: usize,
}

impl FixtureShape {
    pub fn total_events(&self) -> usize {
        self.players * (self.shots + self.passes + self.turnovers)
    }
}

impl Default for FixtureShape {
    /// 10 players x 15 events = 150 records
    fn default() -> Self {
        Self {
            players: 10,
            shots: 6,
            passes: 5,
            turnovers: 4,
        }
    }
}

/// Build a clean extract: every record valid and every reference resolvable
pub fn dataset(shape: FixtureShape) -> (Value, Value, Value) {
    let teams = json!([
        {"team_id": 1, "name": "Harbor Hawks"},
        {"team_id": 2, "name": "Mesa Comets"},
    ]);
    let games: Vec<Value> = GAMES
        .iter()
        .map(|(id, date)| json!({"id": id, "date": date}))
        .collect();

    let mut next_id = 1_000i64;
    let mut id = || {
        next_id += 1;
        next_id
    };

    let players: Vec<Value> = (0..shape.players)
        .map(|p| {
            let player_id = 100 + p as i64;
            let game = |i: usize| GAMES[(p + i) % GAMES.len()].0;
            let label = |i: usize| ACTION_LABELS[(p + i) % ACTION_LABELS.len()];

            let shots: Vec<Value> = (0..shape.shots)
                .map(|i| {
                    json!({
                        "id": id(), "game_id": game(i), "action_type": label(i),
                        "shot_loc_x": (i as f64) * 1.5, "shot_loc_y": 10.0 + i as f64,
                        "points": (i % 4) as i32, "shooting_foul_drawn": i % 5 == 0,
                    })
                })
                .collect();
            let passes: Vec<Value> = (0..shape.passes)
                .map(|i| {
                    let target = 100 + ((p + 1) % shape.players) as i64;
                    json!({
                        "id": id(), "game_id": game(i), "action_type": label(i + 1),
                        "ball_start_loc_x": 5.0, "ball_start_loc_y": i as f64,
                        "completed_pass": i % 3 != 0, "potential_assist": i % 2 == 0,
                        "turnover": false, "target_player_id": target,
                    })
                })
                .collect();
            let turnovers: Vec<Value> = (0..shape.turnovers)
                .map(|i| {
                    json!({
                        "id": id(), "game_id": game(i), "action_type": label(i + 2),
                        "tov_loc_x": -3.0, "tov_loc_y": 20.0,
                    })
                })
                .collect();

            json!({
                "player_id": player_id,
                "team_id": 1 + (p % 2) as i64,
                "name": format!("Player {p}"),
                "shots": shots,
                "passes": passes,
                "turnovers": turnovers,
            })
        })
        .collect();

    (teams, Value::Array(players), Value::Array(games))
}

pub fn write_dataset(dir: &TempDir, teams: &Value, players: &Value, games: &Value) {
    fs::write(dir.path().join("teams.json"), teams.to_string()).unwrap();
    fs::write(dir.path().join("players.json"), players.to_string()).unwrap();
    fs::write(dir.path().join("games.json"), games.to_string()).unwrap();
}

/// Temporary raw-data directory holding a clean extract
pub fn raw_dir(shape: FixtureShape) -> TempDir {
    let dir = TempDir::new().unwrap();
    let (teams, players, games) = dataset(shape);
    write_dataset(&dir, &teams, &players, &games);
    dir
}

pub fn options(dir: &TempDir) -> PipelineOptions {
    PipelineOptions {
        raw_dir: dir.path().to_path_buf(),
        stage: Stage::All,
        ..PipelineOptions::default()
    }
}
