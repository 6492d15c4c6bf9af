//! Season, team, player and game dimensions
//!
//! Rows are get-or-create keyed by the source identifier, so existing rows are
//! never overwritten. Stages that are not selected for this run are read back
//! from storage instead, which lets `--only events` run against dimensions
//! loaded earlier.

use crate::error::{EtlError, Result};
use crate::metrics::EtlMetrics;
use crate::raw::RawDataset;
use crate::store::{EventStore, GameRow, PlayerRow, SeasonRow, TeamRow};
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Season every game is attached to
pub const DEFAULT_SEASON: (i32, i32) = (2023, 2024);

/// Inclusive game-date window; an open end means unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateFilter {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl DateFilter {
    pub fn new(since: Option<NaiveDate>, until: Option<NaiveDate>) -> Self {
        Self { since, until }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.since.map_or(true, |since| date >= since)
            && self.until.map_or(true, |until| date <= until)
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }
}

/// Which dimension kinds are created from the raw extracts this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionSelection {
    pub teams: bool,
    pub players: bool,
    pub games: bool,
}

impl DimensionSelection {
    pub const ALL: Self = Self {
        teams: true,
        players: true,
        games: true,
    };

    pub const NONE: Self = Self {
        teams: false,
        players: false,
        games: false,
    };
}

/// Lookup maps keyed by source identifiers
#[derive(Debug, Clone, Default)]
pub struct Dimensions {
    pub season: Option<SeasonRow>,
    pub teams: HashMap<i64, TeamRow>,
    pub players: HashMap<i64, PlayerRow>,
    pub games: HashMap<i64, GameRow>,
}

pub struct DimensionResolver<'a, S: EventStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: EventStore + ?Sized> DimensionResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Build the dimension maps for a run
    ///
    /// The returned metrics carry the per-kind upsert counts (rows ensured,
    /// whether created now or found).
    pub async fn load(
        &self,
        dataset: &RawDataset,
        filter: &DateFilter,
        selection: DimensionSelection,
    ) -> Result<(Dimensions, EtlMetrics)> {
        let mut metrics = EtlMetrics::new();
        let mut dims = Dimensions::default();

        dims.teams = if selection.teams {
            self.create_teams(dataset, &mut metrics).await?
        } else {
            index(self.store.load_teams().await?, |t| t.team_id)
        };

        dims.players = if selection.players {
            self.create_players(dataset, &dims.teams, &mut metrics).await?
        } else {
            index(self.store.load_players().await?, |p| p.player_id)
        };

        if selection.games {
            let (season, created) = self
                .store
                .get_or_create_season(DEFAULT_SEASON.0, DEFAULT_SEASON.1)
                .await?;
            if created {
                info!(year_start = season.year_start, year_end = season.year_end, "Created season");
            }
            dims.games = self.create_games(dataset, &season, filter, &mut metrics).await?;
            dims.season = Some(season);
        } else {
            let games = self.store.load_games().await?;
            dims.games = index(
                games.into_iter().filter(|g| filter.contains(g.date)),
                |g| g.game_id,
            );
        }

        info!(
            teams = dims.teams.len(),
            players = dims.players.len(),
            games = dims.games.len(),
            "Dimensions ready"
        );

        Ok((dims, metrics))
    }

    async fn create_teams(
        &self,
        dataset: &RawDataset,
        metrics: &mut EtlMetrics,
    ) -> Result<HashMap<i64, TeamRow>> {
        let mut teams = HashMap::with_capacity(dataset.teams.len());
        for raw in &dataset.teams {
            let (team, created) = self.store.get_or_create_team(raw.team_id, &raw.name).await?;
            if created {
                debug!(team_id = team.team_id, name = %team.name, "Created team");
            }
            metrics.teams_upserted += 1;
            teams.insert(team.team_id, team);
        }
        Ok(teams)
    }

    async fn create_players(
        &self,
        dataset: &RawDataset,
        teams: &HashMap<i64, TeamRow>,
        metrics: &mut EtlMetrics,
    ) -> Result<HashMap<i64, PlayerRow>> {
        let mut players = HashMap::with_capacity(dataset.players.len());
        for raw in &dataset.players {
            let Some(player_id) = raw.player_id else {
                warn!(name = %raw.name, "Skipping player without player_id");
                metrics.warnings_emitted += 1;
                continue;
            };

            let team_id = match raw.team_id {
                Some(team_id) if teams.contains_key(&team_id) => team_id,
                team_id => return Err(EtlError::MissingReference { player_id, team_id }),
            };

            let (player, created) = self
                .store
                .get_or_create_player(player_id, &raw.name, team_id)
                .await?;
            if created {
                debug!(player_id, team_id, name = %player.name, "Created player");
            }
            metrics.players_upserted += 1;
            players.insert(player.player_id, player);
        }
        Ok(players)
    }

    async fn create_games(
        &self,
        dataset: &RawDataset,
        season: &SeasonRow,
        filter: &DateFilter,
        metrics: &mut EtlMetrics,
    ) -> Result<HashMap<i64, GameRow>> {
        let mut games = HashMap::new();
        let mut filtered = 0usize;
        for raw in &dataset.games {
            if !filter.contains(raw.date) {
                filtered += 1;
                continue;
            }
            let (game, created) = self
                .store
                .get_or_create_game(raw.id, raw.date, season.id)
                .await?;
            if created {
                debug!(game_id = game.game_id, date = %game.date, "Created game");
            }
            metrics.games_upserted += 1;
            games.insert(game.game_id, game);
        }
        if filtered > 0 {
            info!(filtered, ?filter, "Games outside the date filter were skipped");
        }
        Ok(games)
    }
}

fn index<T, I>(rows: I, key: impl Fn(&T) -> i64) -> HashMap<i64, T>
where
    I: IntoIterator<Item = T>,
{
    rows.into_iter().map(|row| (key(&row), row)).collect()
}
