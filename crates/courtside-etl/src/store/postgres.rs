//! PostgreSQL [`EventStore`]
//!
//! Writes target the `app` schema created by `migrations/`. Each batch runs
//! in its own transaction: existing source ids are looked up first, new
//! events go in with `ON CONFLICT (source_event_id) DO NOTHING RETURNING` so
//! a concurrent writer can never cause a duplicate, and detail rows are only
//! created for ids the insert actually returned.

use super::{
    ActionRow, BatchOutcome, EventStore, GameRow, PlayerRow, SeasonRow, StoreResult, TeamRow,
};
use crate::model::{EventDetail, PassDetail, ResolvedEvent, ShotDetail, TurnoverDetail};
use crate::upsert::{plan_batch, EventUpdate};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Rows per multi-row statement, keeping bind counts under PostgreSQL's limit
const ROWS_PER_STATEMENT: usize = 4000;

#[derive(sqlx::FromRow)]
struct ExistingRow {
    source_event_id: i64,
    event_id: i64,
    x_ft: Option<f64>,
    y_ft: Option<f64>,
    action_id: i32,
    team_id: Option<i64>,
}

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Stored whitelisted columns for the batch's source ids that already exist
    async fn existing_events(
        tx: &mut Transaction<'_, Postgres>,
        events: &[ResolvedEvent],
    ) -> StoreResult<HashMap<i64, EventUpdate>> {
        let ids: Vec<i64> = events.iter().map(|e| e.source_event_id).collect();
        let rows: Vec<ExistingRow> = sqlx::query_as(
            r#"
            SELECT source_event_id, event_id, x_ft, y_ft, action_id, team_id
            FROM app.events
            WHERE source_event_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.source_event_id,
                    EventUpdate {
                        event_id: row.event_id,
                        x_ft: row.x_ft,
                        y_ft: row.y_ft,
                        action_id: row.action_id,
                        team_id: row.team_id,
                    },
                )
            })
            .collect())
    }

    /// Insert new fact rows, returning (event_id, source_event_id) of rows
    /// actually created
    async fn insert_events(
        tx: &mut Transaction<'_, Postgres>,
        events: &[&ResolvedEvent],
    ) -> StoreResult<Vec<(i64, i64)>> {
        let mut created = Vec::with_capacity(events.len());

        for chunk in events.chunks(ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO app.events (
                    source_event_id,
                    player_id,
                    game_id,
                    team_id,
                    action_id,
                    event_type,
                    x_ft,
                    y_ft,
                    occurred_at,
                    created_at
                )
                "#,
            );

            query_builder.push_values(chunk, |mut b, event| {
                b.push_bind(event.source_event_id)
                    .push_bind(event.player_id)
                    .push_bind(event.game_id)
                    .push_bind(event.team_id)
                    .push_bind(event.action_id)
                    .push_bind(event.event_type().as_str())
                    .push_bind(event.x_ft)
                    .push_bind(event.y_ft)
                    .push_bind(event.occurred_at)
                    .push("NOW()");
            });

            query_builder.push(
                r#"
                ON CONFLICT (source_event_id) DO NOTHING
                RETURNING event_id, source_event_id
                "#,
            );

            let rows: Vec<(i64, i64)> =
                query_builder.build_query_as().fetch_all(&mut **tx).await?;
            created.extend(rows);
        }

        Ok(created)
    }

    async fn insert_shots(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[(i64, &ShotDetail)],
    ) -> StoreResult<u64> {
        let mut inserted = 0;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO app.shot_events (event_id, points, shot_result) ");
            query_builder.push_values(chunk, |mut b, (event_id, detail)| {
                b.push_bind(*event_id)
                    .push_bind(detail.points)
                    .push_bind(&detail.shot_result);
            });
            query_builder.push(" ON CONFLICT (event_id) DO NOTHING");
            inserted += query_builder.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_passes(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[(i64, &PassDetail)],
    ) -> StoreResult<u64> {
        let mut inserted = 0;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO app.pass_events (
                    event_id,
                    target_player_id,
                    completed_pass,
                    potential_assist,
                    turnover
                )
                "#,
            );
            query_builder.push_values(chunk, |mut b, (event_id, detail)| {
                b.push_bind(*event_id)
                    .push_bind(detail.target_player_id)
                    .push_bind(detail.completed_pass)
                    .push_bind(detail.potential_assist)
                    .push_bind(detail.turnover);
            });
            query_builder.push(" ON CONFLICT (event_id) DO NOTHING");
            inserted += query_builder.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_turnovers(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[(i64, &TurnoverDetail)],
    ) -> StoreResult<u64> {
        let mut inserted = 0;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO app.turnover_events (event_id, turnover_type) ");
            query_builder.push_values(chunk, |mut b, (event_id, detail)| {
                b.push_bind(*event_id).push_bind(&detail.turnover_type);
            });
            query_builder.push(" ON CONFLICT (event_id) DO NOTHING");
            inserted += query_builder.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    /// Apply whitelisted columns to existing fact rows
    async fn update_events(
        tx: &mut Transaction<'_, Postgres>,
        updates: &[EventUpdate],
    ) -> StoreResult<u64> {
        let mut updated = 0;
        for chunk in updates.chunks(ROWS_PER_STATEMENT) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                UPDATE app.events AS e
                SET x_ft = v.x_ft,
                    y_ft = v.y_ft,
                    action_id = v.action_id,
                    team_id = v.team_id
                FROM (
                "#,
            );
            query_builder.push_values(chunk, |mut b, update| {
                b.push_bind(update.event_id)
                    .push_bind(update.x_ft)
                    .push_bind(update.y_ft)
                    .push_bind(update.action_id)
                    .push_bind(update.team_id);
            });
            query_builder.push(
                r#"
                ) AS v(event_id, x_ft, y_ft, action_id, team_id)
                WHERE e.event_id = v.event_id
                "#,
            );
            updated += query_builder.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(updated)
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn get_or_create_action(&self, code: &str, name: &str) -> StoreResult<(ActionRow, bool)> {
        let inserted: Option<ActionRow> = sqlx::query_as(
            r#"
            INSERT INTO app.actions (code, name)
            VALUES ($1, $2)
            ON CONFLICT (code) DO NOTHING
            RETURNING id, code, name
            "#,
        )
        .bind(code)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        let row = sqlx::query_as("SELECT id, code, name FROM app.actions WHERE code = $1")
            .bind(code)
            .fetch_one(&self.pool)
            .await?;
        Ok((row, false))
    }

    async fn get_or_create_season(
        &self,
        year_start: i32,
        year_end: i32,
    ) -> StoreResult<(SeasonRow, bool)> {
        let inserted: Option<SeasonRow> = sqlx::query_as(
            r#"
            INSERT INTO app.seasons (year_start, year_end)
            VALUES ($1, $2)
            ON CONFLICT (year_start, year_end) DO NOTHING
            RETURNING id, year_start, year_end
            "#,
        )
        .bind(year_start)
        .bind(year_end)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        let row = sqlx::query_as(
            "SELECT id, year_start, year_end FROM app.seasons WHERE year_start = $1 AND year_end = $2",
        )
        .bind(year_start)
        .bind(year_end)
        .fetch_one(&self.pool)
        .await?;
        Ok((row, false))
    }

    async fn get_or_create_team(&self, team_id: i64, name: &str) -> StoreResult<(TeamRow, bool)> {
        let inserted: Option<TeamRow> = sqlx::query_as(
            r#"
            INSERT INTO app.teams (team_id, name)
            VALUES ($1, $2)
            ON CONFLICT (team_id) DO NOTHING
            RETURNING team_id, name
            "#,
        )
        .bind(team_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        let row = sqlx::query_as("SELECT team_id, name FROM app.teams WHERE team_id = $1")
            .bind(team_id)
            .fetch_one(&self.pool)
            .await?;
        Ok((row, false))
    }

    async fn get_or_create_player(
        &self,
        player_id: i64,
        name: &str,
        team_id: i64,
    ) -> StoreResult<(PlayerRow, bool)> {
        let inserted: Option<PlayerRow> = sqlx::query_as(
            r#"
            INSERT INTO app.players (player_id, name, team_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (player_id) DO NOTHING
            RETURNING player_id, name, team_id
            "#,
        )
        .bind(player_id)
        .bind(name)
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        let row =
            sqlx::query_as("SELECT player_id, name, team_id FROM app.players WHERE player_id = $1")
                .bind(player_id)
                .fetch_one(&self.pool)
                .await?;
        Ok((row, false))
    }

    async fn get_or_create_game(
        &self,
        game_id: i64,
        date: NaiveDate,
        season_id: i32,
    ) -> StoreResult<(GameRow, bool)> {
        let inserted: Option<GameRow> = sqlx::query_as(
            r#"
            INSERT INTO app.games (game_id, date, season_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (game_id) DO NOTHING
            RETURNING game_id, date, season_id
            "#,
        )
        .bind(game_id)
        .bind(date)
        .bind(season_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row, true));
        }

        let row =
            sqlx::query_as("SELECT game_id, date, season_id FROM app.games WHERE game_id = $1")
                .bind(game_id)
                .fetch_one(&self.pool)
                .await?;
        Ok((row, false))
    }

    async fn load_actions(&self) -> StoreResult<Vec<ActionRow>> {
        Ok(sqlx::query_as("SELECT id, code, name FROM app.actions ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn load_teams(&self) -> StoreResult<Vec<TeamRow>> {
        Ok(sqlx::query_as("SELECT team_id, name FROM app.teams ORDER BY team_id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn load_players(&self) -> StoreResult<Vec<PlayerRow>> {
        Ok(
            sqlx::query_as("SELECT player_id, name, team_id FROM app.players ORDER BY player_id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn load_games(&self) -> StoreResult<Vec<GameRow>> {
        Ok(
            sqlx::query_as("SELECT game_id, date, season_id FROM app.games ORDER BY game_id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn write_batch(
        &self,
        events: &[ResolvedEvent],
        no_update: bool,
    ) -> StoreResult<BatchOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = Self::existing_events(&mut tx, events).await?;
        let plan = plan_batch(events, &existing, no_update);
        let mut outcome = BatchOutcome {
            skipped: plan.skipped,
            ..Default::default()
        };

        if !plan.inserts.is_empty() {
            let created = Self::insert_events(&mut tx, &plan.inserts).await?;
            let lost = plan.inserts.len() - created.len();
            if lost > 0 {
                warn!(lost, "Source ids inserted concurrently by another writer, skipping");
            }
            outcome.inserted = created.len() as u64;
            outcome.skipped += lost as u64;

            let by_source: HashMap<i64, &ResolvedEvent> = plan
                .inserts
                .iter()
                .map(|event| (event.source_event_id, *event))
                .collect();

            let mut shots = Vec::new();
            let mut passes = Vec::new();
            let mut turnovers = Vec::new();
            for (event_id, source_event_id) in &created {
                match by_source.get(source_event_id).map(|e| &e.detail) {
                    Some(EventDetail::Shot(detail)) => shots.push((*event_id, detail)),
                    Some(EventDetail::Pass(detail)) => passes.push((*event_id, detail)),
                    Some(EventDetail::Turnover(detail)) => turnovers.push((*event_id, detail)),
                    None => {},
                }
            }

            outcome.shot_rows = Self::insert_shots(&mut tx, &shots).await?;
            outcome.pass_rows = Self::insert_passes(&mut tx, &passes).await?;
            outcome.turnover_rows = Self::insert_turnovers(&mut tx, &turnovers).await?;
        }

        if !plan.updates.is_empty() {
            outcome.updated = Self::update_events(&mut tx, &plan.updates).await?;
        }

        tx.commit().await?;

        debug!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            skipped = outcome.skipped,
            "Batch transaction committed"
        );
        Ok(outcome)
    }

    async fn truncate_facts(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            TRUNCATE app.shot_events, app.pass_events, app.turnover_events, app.events
            RESTART IDENTITY
            "#,
        )
        .execute(&self.pool)
        .await?;
        info!("Truncated fact and detail tables");
        Ok(())
    }
}
