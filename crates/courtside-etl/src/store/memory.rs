//! In-memory [`EventStore`]
//!
//! Backs dry runs and the test suite. `write_batch` applies the whole batch
//! to a copy of the state and swaps it in only on success, which gives the
//! same all-or-nothing behaviour as a database transaction. Failures can be
//! injected with [`MemoryEventStore::fail_next`].

use super::{
    ActionRow, BatchOutcome, EventStore, GameRow, PlayerRow, SeasonRow, StoreError,
    StoreErrorKind, StoreResult, TeamRow,
};
use crate::model::{EventDetail, PassDetail, ResolvedEvent, ShotDetail, TurnoverDetail};
use crate::upsert::{plan_batch, EventUpdate};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A fact row as stored
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub event_id: i64,
    pub source_event_id: i64,
    pub player_id: i64,
    pub game_id: i64,
    pub team_id: Option<i64>,
    pub action_id: i32,
    pub event_type: &'static str,
    pub x_ft: Option<f64>,
    pub y_ft: Option<f64>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    actions: BTreeMap<String, ActionRow>,
    seasons: Vec<SeasonRow>,
    teams: BTreeMap<i64, TeamRow>,
    players: BTreeMap<i64, PlayerRow>,
    games: BTreeMap<i64, GameRow>,
    events: BTreeMap<i64, StoredEvent>,
    source_index: HashMap<i64, i64>,
    shots: BTreeMap<i64, ShotDetail>,
    passes: BTreeMap<i64, PassDetail>,
    turnovers: BTreeMap<i64, TurnoverDetail>,
    next_action_id: i32,
    next_season_id: i32,
    next_event_id: i64,
}

/// Row counts, for assertions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub events: usize,
    pub shots: usize,
    pub passes: usize,
    pub turnovers: usize,
}

impl TableCounts {
    pub fn details(&self) -> usize {
        self.shots + self.passes + self.turnovers
    }
}

#[derive(Default)]
pub struct MemoryEventStore {
    state: Mutex<MemoryState>,
    faults: Mutex<VecDeque<StoreErrorKind>>,
    write_calls: AtomicUsize,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls to `write_batch` fail with `kind`
    pub fn fail_next(&self, kind: StoreErrorKind, times: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.extend(std::iter::repeat(kind).take(times));
        }
    }

    /// Number of `write_batch` calls, including failed ones
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn event_count(&self) -> usize {
        self.counts().events
    }

    pub fn counts(&self) -> TableCounts {
        self.state()
            .map(|s| TableCounts {
                events: s.events.len(),
                shots: s.shots.len(),
                passes: s.passes.len(),
                turnovers: s.turnovers.len(),
            })
            .unwrap_or_default()
    }

    /// Snapshot of all fact rows ordered by internal id
    pub fn events(&self) -> Vec<StoredEvent> {
        self.state()
            .map(|s| s.events.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn event_by_source(&self, source_event_id: i64) -> Option<StoredEvent> {
        let state = self.state().ok()?;
        let event_id = state.source_index.get(&source_event_id)?;
        state.events.get(event_id).cloned()
    }

    pub fn shot_detail(&self, event_id: i64) -> Option<ShotDetail> {
        self.state().ok()?.shots.get(&event_id).cloned()
    }

    pub fn pass_detail(&self, event_id: i64) -> Option<PassDetail> {
        self.state().ok()?.passes.get(&event_id).cloned()
    }

    pub fn turnover_detail(&self, event_id: i64) -> Option<TurnoverDetail> {
        self.state().ok()?.turnovers.get(&event_id).cloned()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::other("memory store lock poisoned"))
    }

    fn take_fault(&self) -> Option<StoreErrorKind> {
        self.faults.lock().ok()?.pop_front()
    }
}

fn unique_violation(what: &str) -> StoreError {
    StoreError::other(format!("duplicate key value violates unique constraint on {what}"))
}

fn foreign_key_violation(what: &str) -> StoreError {
    StoreError::other(format!("insert violates foreign key constraint on {what}"))
}

impl MemoryState {
    /// Apply a batch in place; the caller discards the copy on error
    fn apply_batch(&mut self, events: &[ResolvedEvent], no_update: bool) -> StoreResult<BatchOutcome> {
        let existing: HashMap<i64, EventUpdate> = events
            .iter()
            .filter_map(|e| {
                let event_id = self.source_index.get(&e.source_event_id)?;
                let row = self.events.get(event_id)?;
                Some((
                    row.source_event_id,
                    EventUpdate {
                        event_id: row.event_id,
                        x_ft: row.x_ft,
                        y_ft: row.y_ft,
                        action_id: row.action_id,
                        team_id: row.team_id,
                    },
                ))
            })
            .collect();

        let plan = plan_batch(events, &existing, no_update);
        let mut outcome = BatchOutcome {
            skipped: plan.skipped,
            ..Default::default()
        };
        let now = Utc::now();

        for event in plan.inserts {
            if !self.players.contains_key(&event.player_id) {
                return Err(foreign_key_violation("events.player_id"));
            }
            if !self.games.contains_key(&event.game_id) {
                return Err(foreign_key_violation("events.game_id"));
            }

            self.next_event_id += 1;
            let event_id = self.next_event_id;
            self.source_index.insert(event.source_event_id, event_id);
            self.events.insert(
                event_id,
                StoredEvent {
                    event_id,
                    source_event_id: event.source_event_id,
                    player_id: event.player_id,
                    game_id: event.game_id,
                    team_id: event.team_id,
                    action_id: event.action_id,
                    event_type: event.event_type().as_str(),
                    x_ft: event.x_ft,
                    y_ft: event.y_ft,
                    occurred_at: event.occurred_at,
                    created_at: now,
                },
            );
            outcome.inserted += 1;

            match &event.detail {
                EventDetail::Shot(detail) => {
                    self.shots.insert(event_id, detail.clone());
                    outcome.shot_rows += 1;
                },
                EventDetail::Pass(detail) => {
                    self.passes.insert(event_id, detail.clone());
                    outcome.pass_rows += 1;
                },
                EventDetail::Turnover(detail) => {
                    self.turnovers.insert(event_id, detail.clone());
                    outcome.turnover_rows += 1;
                },
            }
        }

        for update in plan.updates {
            if let Some(row) = self.events.get_mut(&update.event_id) {
                row.x_ft = update.x_ft;
                row.y_ft = update.y_ft;
                row.action_id = update.action_id;
                row.team_id = update.team_id;
                outcome.updated += 1;
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get_or_create_action(&self, code: &str, name: &str) -> StoreResult<(ActionRow, bool)> {
        let mut state = self.state()?;
        if let Some(row) = state.actions.get(code) {
            return Ok((row.clone(), false));
        }
        state.next_action_id += 1;
        let row = ActionRow {
            id: state.next_action_id,
            code: code.to_string(),
            name: name.to_string(),
        };
        state.actions.insert(code.to_string(), row.clone());
        Ok((row, true))
    }

    async fn get_or_create_season(
        &self,
        year_start: i32,
        year_end: i32,
    ) -> StoreResult<(SeasonRow, bool)> {
        let mut state = self.state()?;
        if let Some(row) = state
            .seasons
            .iter()
            .find(|s| s.year_start == year_start && s.year_end == year_end)
        {
            return Ok((row.clone(), false));
        }
        state.next_season_id += 1;
        let row = SeasonRow {
            id: state.next_season_id,
            year_start,
            year_end,
        };
        state.seasons.push(row.clone());
        Ok((row, true))
    }

    async fn get_or_create_team(&self, team_id: i64, name: &str) -> StoreResult<(TeamRow, bool)> {
        let mut state = self.state()?;
        if let Some(row) = state.teams.get(&team_id) {
            return Ok((row.clone(), false));
        }
        if state.teams.values().any(|t| t.name == name) {
            return Err(unique_violation("teams.name"));
        }
        let row = TeamRow {
            team_id,
            name: name.to_string(),
        };
        state.teams.insert(team_id, row.clone());
        Ok((row, true))
    }

    async fn get_or_create_player(
        &self,
        player_id: i64,
        name: &str,
        team_id: i64,
    ) -> StoreResult<(PlayerRow, bool)> {
        let mut state = self.state()?;
        if let Some(row) = state.players.get(&player_id) {
            return Ok((row.clone(), false));
        }
        if !state.teams.contains_key(&team_id) {
            return Err(foreign_key_violation("players.team_id"));
        }
        let row = PlayerRow {
            player_id,
            name: name.to_string(),
            team_id,
        };
        state.players.insert(player_id, row.clone());
        Ok((row, true))
    }

    async fn get_or_create_game(
        &self,
        game_id: i64,
        date: NaiveDate,
        season_id: i32,
    ) -> StoreResult<(GameRow, bool)> {
        let mut state = self.state()?;
        if let Some(row) = state.games.get(&game_id) {
            return Ok((row.clone(), false));
        }
        if !state.seasons.iter().any(|s| s.id == season_id) {
            return Err(foreign_key_violation("games.season_id"));
        }
        let row = GameRow {
            game_id,
            date,
            season_id,
        };
        state.games.insert(game_id, row.clone());
        Ok((row, true))
    }

    async fn load_actions(&self) -> StoreResult<Vec<ActionRow>> {
        Ok(self.state()?.actions.values().cloned().collect())
    }

    async fn load_teams(&self) -> StoreResult<Vec<TeamRow>> {
        Ok(self.state()?.teams.values().cloned().collect())
    }

    async fn load_players(&self) -> StoreResult<Vec<PlayerRow>> {
        Ok(self.state()?.players.values().cloned().collect())
    }

    async fn load_games(&self) -> StoreResult<Vec<GameRow>> {
        Ok(self.state()?.games.values().cloned().collect())
    }

    async fn write_batch(
        &self,
        events: &[ResolvedEvent],
        no_update: bool,
    ) -> StoreResult<BatchOutcome> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.take_fault() {
            debug!(%kind, "Injected write failure");
            return Err(StoreError::new(kind, format!("injected {kind}")));
        }

        let mut state = self.state()?;
        let mut working = state.clone();
        let outcome = working.apply_batch(events, no_update)?;
        *state = working;
        Ok(outcome)
    }

    async fn truncate_facts(&self) -> StoreResult<()> {
        let mut state = self.state()?;
        state.shots.clear();
        state.passes.clear();
        state.turnovers.clear();
        state.events.clear();
        state.source_index.clear();
        Ok(())
    }
}
