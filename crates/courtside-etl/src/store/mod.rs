//! Storage seam
//!
//! Every component talks to the database through [`EventStore`]. The
//! PostgreSQL implementation is used in production; the in-memory one backs
//! dry runs and the test suite.

use crate::model::ResolvedEvent;
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryEventStore, StoredEvent, TableCounts};
pub use postgres::PgEventStore;

/// What went wrong in storage, as far as retrying is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    Deadlock,
    LockTimeout,
    SerializationFailure,
    ConnectionLost,
    Other,
}

impl StoreErrorKind {
    /// Map a PostgreSQL SQLSTATE code to a kind
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "40P01" => Self::Deadlock,
            "55P03" => Self::LockTimeout,
            "40001" => Self::SerializationFailure,
            "57P01" | "57P02" | "57P03" => Self::ConnectionLost,
            c if c.starts_with("08") => Self::ConnectionLost,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Deadlock => "deadlock",
            Self::LockTimeout => "lock timeout",
            Self::SerializationFailure => "serialization failure",
            Self::ConnectionLost => "connection lost",
            Self::Other => "storage error",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Other, message)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db) => db
                .code()
                .map(|code| StoreErrorKind::from_sqlstate(&code))
                .unwrap_or(StoreErrorKind::Other),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreErrorKind::ConnectionLost,
            _ => StoreErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ActionRow {
    pub id: i32,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SeasonRow {
    pub id: i32,
    pub year_start: i32,
    pub year_end: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TeamRow {
    pub team_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PlayerRow {
    pub player_id: i64,
    pub name: String,
    pub team_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct GameRow {
    pub game_id: i64,
    pub date: NaiveDate,
    pub season_id: i32,
}

/// Counts produced by one committed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub shot_rows: u64,
    pub pass_rows: u64,
    pub turnover_rows: u64,
}

/// Storage operations needed by the ETL
///
/// `get_or_create_*` never modify an existing row; the boolean is `true`
/// only when this call created it.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_or_create_action(&self, code: &str, name: &str)
        -> StoreResult<(ActionRow, bool)>;

    async fn get_or_create_season(
        &self,
        year_start: i32,
        year_end: i32,
    ) -> StoreResult<(SeasonRow, bool)>;

    async fn get_or_create_team(&self, team_id: i64, name: &str) -> StoreResult<(TeamRow, bool)>;

    async fn get_or_create_player(
        &self,
        player_id: i64,
        name: &str,
        team_id: i64,
    ) -> StoreResult<(PlayerRow, bool)>;

    async fn get_or_create_game(
        &self,
        game_id: i64,
        date: NaiveDate,
        season_id: i32,
    ) -> StoreResult<(GameRow, bool)>;

    async fn load_actions(&self) -> StoreResult<Vec<ActionRow>>;

    async fn load_teams(&self) -> StoreResult<Vec<TeamRow>>;

    async fn load_players(&self) -> StoreResult<Vec<PlayerRow>>;

    async fn load_games(&self) -> StoreResult<Vec<GameRow>>;

    /// Write one batch in a single transaction
    ///
    /// New source ids are inserted together with their detail rows. Known
    /// ids whose whitelisted columns differ are updated; they are skipped
    /// when unchanged or when `no_update` is set. Nothing is visible unless
    /// everything succeeds.
    ///
    /// The returned `skipped` count therefore includes known rows that were
    /// left alone because nothing changed, so an unchanged re-run reports
    /// every record as skipped and none as updated.
    async fn write_batch(&self, events: &[ResolvedEvent], no_update: bool)
        -> StoreResult<BatchOutcome>;

    /// Remove all fact and detail rows. Dimensions are kept.
    async fn truncate_facts(&self) -> StoreResult<()>;
}
