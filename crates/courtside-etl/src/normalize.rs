//! Raw per-player records to canonical events
//!
//! [`EventNormalizer`] walks players in file order and, for each player, its
//! shots, then passes, then turnovers. It is a plain single-pass iterator;
//! running again means opening a new one from the files.

use crate::actions::{ActionCode, ActionDictionary};
use crate::model::{EventRecord, RecordDetail};
use crate::raw::{self, RawPass, RawPlayer, RawShot, RawTurnover};
use courtside_common::Result;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Coordinates beyond this many feet are logged as implausible
pub const COURT_PLAUSIBILITY_FT: f64 = 100.0;

/// Outcome of reading one coordinate field
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinate {
    Missing,
    Valid(f64),
    /// Numeric but off the court; still passed through
    Implausible(f64),
    /// Present but not a number
    Invalid(String),
}

impl Coordinate {
    pub fn value(&self) -> Option<f64> {
        match self {
            Coordinate::Valid(v) | Coordinate::Implausible(v) => Some(*v),
            Coordinate::Missing | Coordinate::Invalid(_) => None,
        }
    }
}

/// Accepts JSON numbers and numeric strings
pub fn parse_coordinate(value: Option<&Value>) -> Coordinate {
    let parsed = match value {
        None | Some(Value::Null) => return Coordinate::Missing,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(v) if v.is_finite() && v.abs() > COURT_PLAUSIBILITY_FT => Coordinate::Implausible(v),
        Some(v) if v.is_finite() => Coordinate::Valid(v),
        _ => Coordinate::Invalid(value.map(Value::to_string).unwrap_or_default()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub emitted: u64,
    pub warnings: u64,
}

struct PlayerCursor {
    player_id: Option<i64>,
    shots: std::vec::IntoIter<RawShot>,
    passes: std::vec::IntoIter<RawPass>,
    turnovers: std::vec::IntoIter<RawTurnover>,
}

impl PlayerCursor {
    fn new(player: RawPlayer) -> Self {
        Self {
            player_id: player.player_id,
            shots: player.shots.into_iter(),
            passes: player.passes.into_iter(),
            turnovers: player.turnovers.into_iter(),
        }
    }
}

pub struct EventNormalizer {
    players: std::vec::IntoIter<RawPlayer>,
    current: Option<PlayerCursor>,
    limit: Option<u64>,
    stats: NormalizeStats,
}

impl EventNormalizer {
    /// Read `players.json` from `raw_dir` and iterate its events
    pub fn open(raw_dir: &Path, limit: Option<u64>) -> Result<Self> {
        Ok(Self::new(raw::read_players(raw_dir)?, limit))
    }

    /// `limit` caps the total number of records emitted across all kinds
    pub fn new(players: Vec<RawPlayer>, limit: Option<u64>) -> Self {
        Self {
            players: players.into_iter(),
            current: None,
            limit,
            stats: NormalizeStats::default(),
        }
    }

    pub fn stats(&self) -> NormalizeStats {
        self.stats
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.stats.emitted >= limit)
    }

    fn action(&mut self, label: Option<&str>, source_event_id: Option<i64>) -> ActionCode {
        let label = label.unwrap_or("");
        let code = ActionDictionary::resolve(label);
        if code == ActionCode::Unknown && !label.trim().is_empty() {
            warn!(label, source_event_id, "Unknown action type mapped to UNKNOWN");
            self.stats.warnings += 1;
        }
        code
    }

    fn coordinate(&mut self, value: Option<&Value>, source_event_id: Option<i64>) -> Option<f64> {
        let coordinate = parse_coordinate(value);
        match &coordinate {
            Coordinate::Implausible(v) => {
                warn!(value = v, source_event_id, "Coordinate seems unreasonable for a basketball court");
                self.stats.warnings += 1;
            },
            Coordinate::Invalid(raw) => {
                warn!(value = %raw, source_event_id, "Invalid coordinate value");
                self.stats.warnings += 1;
            },
            Coordinate::Missing | Coordinate::Valid(_) => {},
        }
        coordinate.value()
    }

    fn shot(&mut self, player_id: Option<i64>, shot: RawShot) -> EventRecord {
        let action = self.action(shot.action_type.as_deref(), shot.id);
        let x_ft = self.coordinate(shot.shot_loc_x.as_ref(), shot.id);
        let y_ft = self.coordinate(shot.shot_loc_y.as_ref(), shot.id);
        self.record(
            shot.id,
            player_id,
            shot.game_id,
            action,
            (x_ft, y_ft),
            shot.occurred_at,
            RecordDetail::Shot {
                points: shot.points,
                shot_result: shot.shot_result,
                shooting_foul_drawn: shot.shooting_foul_drawn,
            },
        )
    }

    fn pass(&mut self, player_id: Option<i64>, pass: RawPass) -> EventRecord {
        let action = self.action(pass.action_type.as_deref(), pass.id);
        let x_ft = self.coordinate(pass.ball_start_loc_x.as_ref(), pass.id);
        let y_ft = self.coordinate(pass.ball_start_loc_y.as_ref(), pass.id);
        self.record(
            pass.id,
            player_id,
            pass.game_id,
            action,
            (x_ft, y_ft),
            pass.occurred_at,
            RecordDetail::Pass {
                target_player_id: pass.target_player_id,
                completed_pass: pass.completed_pass,
                potential_assist: pass.potential_assist,
                turnover: pass.turnover,
            },
        )
    }

    fn turnover(&mut self, player_id: Option<i64>, turnover: RawTurnover) -> EventRecord {
        let action = self.action(turnover.action_type.as_deref(), turnover.id);
        let x_ft = self.coordinate(turnover.tov_loc_x.as_ref(), turnover.id);
        let y_ft = self.coordinate(turnover.tov_loc_y.as_ref(), turnover.id);
        self.record(
            turnover.id,
            player_id,
            turnover.game_id,
            action,
            (x_ft, y_ft),
            turnover.occurred_at,
            RecordDetail::Turnover {
                turnover_type: turnover.turnover_type,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        source_event_id: Option<i64>,
        player_id: Option<i64>,
        game_id: Option<i64>,
        action: ActionCode,
        (x_ft, y_ft): (Option<f64>, Option<f64>),
        occurred_at: Option<chrono::DateTime<chrono::Utc>>,
        detail: RecordDetail,
    ) -> EventRecord {
        let seq = self.stats.emitted;
        self.stats.emitted += 1;
        EventRecord {
            seq,
            source_event_id,
            player_id,
            game_id,
            action,
            x_ft,
            y_ft,
            occurred_at,
            detail,
        }
    }
}

impl Iterator for EventNormalizer {
    type Item = EventRecord;

    fn next(&mut self) -> Option<EventRecord> {
        if self.limit_reached() {
            return None;
        }

        loop {
            if let Some(cursor) = self.current.as_mut() {
                let player_id = cursor.player_id;
                if let Some(shot) = cursor.shots.next() {
                    return Some(self.shot(player_id, shot));
                }
                if let Some(pass) = cursor.passes.next() {
                    return Some(self.pass(player_id, pass));
                }
                if let Some(turnover) = cursor.turnovers.next() {
                    return Some(self.turnover(player_id, turnover));
                }
            }
            self.current = Some(PlayerCursor::new(self.players.next()?));
        }
    }
}
