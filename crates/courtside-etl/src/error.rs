//! Error types for the ETL

use crate::store::StoreError;
use courtside_common::CourtsideError;
use thiserror::Error;

/// Result type alias for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// A record that cannot be written
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("player {0} is not in the player dimension")]
    UnknownPlayer(i64),

    #[error("game {0} is not in the game dimension (unknown or filtered out by date)")]
    UnknownGame(i64),

    #[error("action '{0}' has no dictionary row")]
    UnknownAction(String),
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Common(#[from] CourtsideError),

    #[error("Player {player_id} references unknown team {}", display_team(.team_id))]
    MissingReference { player_id: i64, team_id: Option<i64> },

    #[error("Invalid event #{seq}: {source}")]
    Validation {
        seq: u64,
        #[source]
        source: ValidationError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("ETL process interrupted by user")]
    Interrupted,
}

fn display_team(team_id: &Option<i64>) -> String {
    team_id.map_or_else(|| "<none>".to_string(), |t| t.to_string())
}

impl EtlError {
    /// Missing or unreadable raw extracts
    pub fn is_input_error(&self) -> bool {
        matches!(self, EtlError::Common(err) if err.is_input_error())
    }
}
