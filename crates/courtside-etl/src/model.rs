//! Event records as they move through the pipeline
//!
//! [`EventRecord`] is what the normalizer emits: ids are still optional and
//! dimension references are unresolved. [`ResolvedEvent`] is what the store
//! writes: every reference has been checked against the dimension maps and
//! the detail row has been derived.

use crate::actions::ActionCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminant stored in `app.events.event_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Shot,
    Pass,
    Turnover,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Shot => "shot",
            EventType::Pass => "pass",
            EventType::Turnover => "turnover",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific fields carried from the raw extract
#[derive(Debug, Clone, PartialEq)]
pub enum RecordDetail {
    Shot {
        points: i32,
        shot_result: Option<String>,
        shooting_foul_drawn: bool,
    },
    Pass {
        target_player_id: Option<i64>,
        completed_pass: bool,
        potential_assist: bool,
        turnover: bool,
    },
    Turnover {
        turnover_type: Option<String>,
    },
}

/// A normalized but unvalidated event
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Run-local position in traversal order, starting at 0
    pub seq: u64,
    pub source_event_id: Option<i64>,
    pub player_id: Option<i64>,
    pub game_id: Option<i64>,
    pub action: ActionCode,
    pub x_ft: Option<f64>,
    pub y_ft: Option<f64>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub detail: RecordDetail,
}

impl EventRecord {
    pub fn event_type(&self) -> EventType {
        match self.detail {
            RecordDetail::Shot { .. } => EventType::Shot,
            RecordDetail::Pass { .. } => EventType::Pass,
            RecordDetail::Turnover { .. } => EventType::Turnover,
        }
    }
}

/// Row for `app.shot_events`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotDetail {
    pub points: i32,
    pub shot_result: String,
}

impl ShotDetail {
    /// An explicit upstream result wins; otherwise any scoring shot is a make.
    pub fn derive(points: i32, shot_result: Option<&str>) -> Self {
        let shot_result = match shot_result.map(str::trim) {
            Some(result) if !result.is_empty() => result.to_string(),
            _ if points > 0 => "make".to_string(),
            _ => "miss".to_string(),
        };
        Self {
            points,
            shot_result,
        }
    }
}

/// Row for `app.pass_events`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDetail {
    pub target_player_id: Option<i64>,
    pub completed_pass: bool,
    pub potential_assist: bool,
    pub turnover: bool,
}

/// Row for `app.turnover_events`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnoverDetail {
    pub turnover_type: String,
}

impl TurnoverDetail {
    pub const DEFAULT_TYPE: &'static str = "general";

    pub fn derive(turnover_type: Option<&str>) -> Self {
        let turnover_type = turnover_type
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(Self::DEFAULT_TYPE);
        Self {
            turnover_type: turnover_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventDetail {
    Shot(ShotDetail),
    Pass(PassDetail),
    Turnover(TurnoverDetail),
}

/// An event whose references all resolve, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    pub seq: u64,
    pub source_event_id: i64,
    pub player_id: i64,
    pub game_id: i64,
    pub team_id: Option<i64>,
    pub action_id: i32,
    pub x_ft: Option<f64>,
    pub y_ft: Option<f64>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub detail: EventDetail,
}

impl ResolvedEvent {
    pub fn event_type(&self) -> EventType {
        match self.detail {
            EventDetail::Shot(_) => EventType::Shot,
            EventDetail::Pass(_) => EventType::Pass,
            EventDetail::Turnover(_) => EventType::Turnover,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shot_result_derived_from_points() {
        assert_eq!(ShotDetail::derive(2, None).shot_result, "make");
        assert_eq!(ShotDetail::derive(3, Some("  ")).shot_result, "make");
        assert_eq!(ShotDetail::derive(0, None).shot_result, "miss");
    }

    #[test]
    fn test_explicit_shot_result_is_kept() {
        let detail = ShotDetail::derive(0, Some("blocked"));
        assert_eq!(detail.shot_result, "blocked");
        assert_eq!(detail.points, 0);
    }

    #[test]
    fn test_turnover_type_defaults_to_general() {
        assert_eq!(TurnoverDetail::derive(None).turnover_type, "general");
        assert_eq!(TurnoverDetail::derive(Some("")).turnover_type, "general");
        assert_eq!(TurnoverDetail::derive(Some("travel")).turnover_type, "travel");
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(EventType::Shot.as_str(), "shot");
        assert_eq!(EventType::Pass.to_string(), "pass");
        assert_eq!(
            serde_json::to_string(&EventType::Turnover).unwrap(),
            "\"turnover\""
        );
    }
}
