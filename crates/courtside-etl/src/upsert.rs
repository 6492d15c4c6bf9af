//! Batched, idempotent event writes
//!
//! Records are pulled from the normalizer in windows of `batch_size`. Each
//! window is validated against the dimension maps, then handed to the store
//! as one transaction guarded by the retry policy. A batch that still fails
//! after retrying aborts the run; earlier batches stay committed, so a rerun
//! resumes from where the database is.

use crate::actions::ActionDictionary;
use crate::dimensions::Dimensions;
use crate::error::{EtlError, Result, ValidationError};
use crate::metrics::EtlMetrics;
use crate::model::{
    EventDetail, EventRecord, PassDetail, RecordDetail, ResolvedEvent, ShotDetail, TurnoverDetail,
};
use crate::retry::RetryPolicy;
use crate::store::EventStore;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default number of records per transaction
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Check a record's references and derive its detail row
pub fn resolve_event(
    record: &EventRecord,
    dims: &Dimensions,
    actions: &ActionDictionary,
) -> std::result::Result<ResolvedEvent, ValidationError> {
    let source_event_id = record
        .source_event_id
        .ok_or(ValidationError::MissingField("source_event_id"))?;
    let player_id = record
        .player_id
        .ok_or(ValidationError::MissingField("player_id"))?;
    let game_id = record
        .game_id
        .ok_or(ValidationError::MissingField("game_id"))?;

    let player = dims
        .players
        .get(&player_id)
        .ok_or(ValidationError::UnknownPlayer(player_id))?;
    if !dims.games.contains_key(&game_id) {
        return Err(ValidationError::UnknownGame(game_id));
    }
    let action_id = actions
        .id_for(record.action)
        .ok_or_else(|| ValidationError::UnknownAction(record.action.code().to_string()))?;

    let detail = match &record.detail {
        RecordDetail::Shot {
            points,
            shot_result,
            ..
        } => EventDetail::Shot(ShotDetail::derive(*points, shot_result.as_deref())),
        RecordDetail::Pass {
            target_player_id,
            completed_pass,
            potential_assist,
            turnover,
        } => EventDetail::Pass(PassDetail {
            target_player_id: target_player_id.filter(|id| dims.players.contains_key(id)),
            completed_pass: *completed_pass,
            potential_assist: *potential_assist,
            turnover: *turnover,
        }),
        RecordDetail::Turnover { turnover_type } => {
            EventDetail::Turnover(TurnoverDetail::derive(turnover_type.as_deref()))
        },
    };

    Ok(ResolvedEvent {
        seq: record.seq,
        source_event_id,
        player_id,
        game_id,
        team_id: Some(player.team_id),
        action_id,
        x_ft: record.x_ft,
        y_ft: record.y_ft,
        occurred_at: record.occurred_at,
        detail,
    })
}

/// Whitelisted columns of a fact row, keyed by its internal id
///
/// Used both for the values currently stored and for the values an update
/// would write.
#[derive(Debug, Clone, PartialEq)]
pub struct EventUpdate {
    pub event_id: i64,
    pub x_ft: Option<f64>,
    pub y_ft: Option<f64>,
    pub action_id: i32,
    pub team_id: Option<i64>,
}

impl EventUpdate {
    pub fn for_event(event_id: i64, event: &ResolvedEvent) -> Self {
        Self {
            event_id,
            x_ft: event.x_ft,
            y_ft: event.y_ft,
            action_id: event.action_id,
            team_id: event.team_id,
        }
    }
}

/// What a batch will do, decided before any write
#[derive(Debug, Default)]
pub struct BatchPlan<'a> {
    pub inserts: Vec<&'a ResolvedEvent>,
    pub updates: Vec<EventUpdate>,
    pub skipped: u64,
}

/// Split a batch into inserts, updates and skips
///
/// `existing` maps source ids already in the fact table to their stored
/// whitelisted columns. An existing row is skipped when `no_update` is set
/// or when the incoming values equal what is stored. A source id repeated
/// inside one batch is only acted on the first time; later copies are
/// skipped.
pub fn plan_batch<'a>(
    events: &'a [ResolvedEvent],
    existing: &HashMap<i64, EventUpdate>,
    no_update: bool,
) -> BatchPlan<'a> {
    let mut plan = BatchPlan::default();
    let mut seen = HashSet::with_capacity(events.len());

    for event in events {
        if !seen.insert(event.source_event_id) {
            plan.skipped += 1;
            continue;
        }
        match existing.get(&event.source_event_id) {
            Some(_) if no_update => plan.skipped += 1,
            Some(stored) => {
                let update = EventUpdate::for_event(stored.event_id, event);
                if update == *stored {
                    plan.skipped += 1;
                } else {
                    plan.updates.push(update);
                }
            },
            None => plan.inserts.push(event),
        }
    }

    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOptions {
    pub batch_size: usize,
    pub dry_run: bool,
    pub no_update: bool,
    pub strict: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            no_update: false,
            strict: false,
        }
    }
}

pub struct BatchUpserter<'a, S: EventStore + ?Sized> {
    store: &'a S,
    dims: &'a Dimensions,
    actions: &'a ActionDictionary,
    options: UpsertOptions,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a, S: EventStore + ?Sized> BatchUpserter<'a, S> {
    pub fn new(store: &'a S, dims: &'a Dimensions, actions: &'a ActionDictionary) -> Self {
        Self {
            store,
            dims,
            actions,
            options: UpsertOptions::default(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: UpsertOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checked before each batch; an in-flight batch always finishes
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Consume `events` batch by batch and return this stage's counters
    pub async fn run<I>(&self, events: I) -> Result<EtlMetrics>
    where
        I: IntoIterator<Item = EventRecord>,
    {
        let batch_size = self.options.batch_size.max(1);
        let mut events = events.into_iter();
        let mut metrics = EtlMetrics::new();
        let mut batch_no = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                warn!(batches_committed = batch_no, "Stopping before next batch");
                return Err(EtlError::Interrupted);
            }

            let batch: Vec<EventRecord> = events.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            batch_no += 1;

            if self.options.dry_run {
                metrics.events_skipped += batch.len() as u64;
                debug!(batch = batch_no, records = batch.len(), "Dry run, batch not written");
                continue;
            }

            self.process_batch(batch_no, &batch, &mut metrics).await?;
        }

        info!(
            batches = batch_no,
            inserted = metrics.events_inserted,
            updated = metrics.events_updated,
            skipped = metrics.events_skipped,
            errors = metrics.errors_parsed,
            "Event upsert finished"
        );

        Ok(metrics)
    }

    async fn process_batch(
        &self,
        batch_no: u64,
        batch: &[EventRecord],
        metrics: &mut EtlMetrics,
    ) -> Result<()> {
        let mut resolved = Vec::with_capacity(batch.len());

        for record in batch {
            match resolve_event(record, self.dims, self.actions) {
                Ok(event) => {
                    if let (
                        RecordDetail::Pass {
                            target_player_id: Some(target),
                            ..
                        },
                        EventDetail::Pass(PassDetail {
                            target_player_id: None,
                            ..
                        }),
                    ) = (&record.detail, &event.detail)
                    {
                        warn!(
                            source_event_id = event.source_event_id,
                            target_player_id = target,
                            "Pass target not in player dimension, storing without target"
                        );
                        metrics.warnings_emitted += 1;
                    }
                    resolved.push(event);
                },
                Err(source) => {
                    metrics.errors_parsed += 1;
                    if self.options.strict {
                        return Err(EtlError::Validation {
                            seq: record.seq,
                            source,
                        });
                    }
                    error!(
                        seq = record.seq,
                        source_event_id = record.source_event_id,
                        error = %source,
                        "Dropping invalid event"
                    );
                },
            }
        }

        if resolved.is_empty() {
            debug!(batch = batch_no, "No valid records in batch");
            return Ok(());
        }

        let no_update = self.options.no_update;
        let outcome = self
            .retry
            .run(|| self.store.write_batch(&resolved, no_update))
            .await;
        metrics.retry_attempts += u64::from(outcome.retries);

        let written = outcome.result.map_err(|err| {
            error!(batch = batch_no, error = %err, "Batch processing failed after retries");
            EtlError::Storage(err)
        })?;

        metrics.record_batch(&written);
        info!(
            batch = batch_no,
            records = resolved.len(),
            inserted = written.inserted,
            updated = written.updated,
            skipped = written.skipped,
            "Batch committed"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actions::ActionCode;
    use crate::store::{GameRow, MemoryEventStore, PlayerRow, StoreErrorKind};
    use chrono::NaiveDate;
    use std::time::Duration;

    fn dims() -> Dimensions {
        let mut dims = Dimensions::default();
        for player_id in [1, 2] {
            dims.players.insert(
                player_id,
                PlayerRow {
                    player_id,
                    name: format!("P{player_id}"),
                    team_id: 7,
                },
            );
        }
        dims.games.insert(
            100,
            GameRow {
                game_id: 100,
                date: NaiveDate::from_ymd_opt(2023, 11, 1).unwrap(),
                season_id: 1,
            },
        );
        dims
    }

    async fn seeded_store() -> (MemoryEventStore, ActionDictionary) {
        let store = MemoryEventStore::new();
        store.get_or_create_team(7, "Hawks").await.unwrap();
        store.get_or_create_player(1, "P1", 7).await.unwrap();
        store.get_or_create_player(2, "P2", 7).await.unwrap();
        let (season, _) = store.get_or_create_season(2023, 2024).await.unwrap();
        store
            .get_or_create_game(100, NaiveDate::from_ymd_opt(2023, 11, 1).unwrap(), season.id)
            .await
            .unwrap();
        let (actions, _) = ActionDictionary::ensure(&store).await.unwrap();
        (store, actions)
    }

    fn shot(seq: u64, source_event_id: i64, points: i32) -> EventRecord {
        EventRecord {
            seq,
            source_event_id: Some(source_event_id),
            player_id: Some(1),
            game_id: Some(100),
            action: ActionCode::Isolation,
            x_ft: Some(1.0),
            y_ft: Some(2.0),
            occurred_at: None,
            detail: RecordDetail::Shot {
                points,
                shot_result: None,
                shooting_foul_drawn: false,
            },
        }
    }

    fn pass(seq: u64, source_event_id: i64, target: Option<i64>) -> EventRecord {
        EventRecord {
            detail: RecordDetail::Pass {
                target_player_id: target,
                completed_pass: true,
                potential_assist: false,
                turnover: false,
            },
            ..shot(seq, source_event_id, 0)
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_resolve_event_validation() {
        let (_, actions) = seeded_store().await;
        let dims = dims();

        let mut record = shot(0, 1, 2);
        record.source_event_id = None;
        assert_eq!(
            resolve_event(&record, &dims, &actions),
            Err(ValidationError::MissingField("source_event_id"))
        );

        let mut record = shot(0, 1, 2);
        record.game_id = None;
        assert_eq!(
            resolve_event(&record, &dims, &actions),
            Err(ValidationError::MissingField("game_id"))
        );

        let mut record = shot(0, 1, 2);
        record.player_id = Some(99);
        assert_eq!(
            resolve_event(&record, &dims, &actions),
            Err(ValidationError::UnknownPlayer(99))
        );

        let mut record = shot(0, 1, 2);
        record.game_id = Some(555);
        assert_eq!(
            resolve_event(&record, &dims, &actions),
            Err(ValidationError::UnknownGame(555))
        );

        let empty = ActionDictionary::default();
        assert_eq!(
            resolve_event(&shot(0, 1, 2), &dims, &empty),
            Err(ValidationError::UnknownAction("ISO".into()))
        );
    }

    #[tokio::test]
    async fn test_resolve_event_derives_details() {
        let (_, actions) = seeded_store().await;
        let dims = dims();

        let event = resolve_event(&shot(0, 1, 3), &dims, &actions).unwrap();
        assert_eq!(event.team_id, Some(7));
        assert_eq!(
            event.detail,
            EventDetail::Shot(ShotDetail {
                points: 3,
                shot_result: "make".into()
            })
        );

        let event = resolve_event(&pass(1, 2, Some(2)), &dims, &actions).unwrap();
        assert!(matches!(
            event.detail,
            EventDetail::Pass(PassDetail {
                target_player_id: Some(2),
                completed_pass: true,
                ..
            })
        ));

        let event = resolve_event(&pass(2, 3, Some(42)), &dims, &actions).unwrap();
        assert!(matches!(
            event.detail,
            EventDetail::Pass(PassDetail {
                target_player_id: None,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_plan_batch_classification() {
        let (_, actions) = seeded_store().await;
        let dims = dims();
        let events: Vec<_> = [shot(0, 1, 2), shot(1, 2, 0), shot(2, 1, 2), shot(3, 3, 0)]
            .iter()
            .map(|r| resolve_event(r, &dims, &actions).unwrap())
            .collect();
        let moved = |event_id| EventUpdate {
            event_id,
            x_ft: Some(40.0),
            y_ft: None,
            action_id: events[0].action_id,
            team_id: Some(7),
        };
        let existing = HashMap::from([(2, moved(500)), (3, moved(501))]);

        let plan = plan_batch(&events, &existing, false);
        assert_eq!(
            plan.inserts.iter().map(|e| e.source_event_id).collect::<Vec<_>>(),
            vec![1]
        );
        assert_eq!(
            plan.updates.iter().map(|u| u.event_id).collect::<Vec<_>>(),
            vec![500, 501]
        );
        assert_eq!(plan.updates[0].x_ft, Some(1.0));
        assert_eq!(plan.skipped, 1);

        let plan = plan_batch(&events, &existing, true);
        assert_eq!(plan.inserts.len(), 1);
        assert!(plan.updates.is_empty());
        assert_eq!(plan.skipped, 3);
    }

    #[tokio::test]
    async fn test_plan_batch_skips_unchanged_rows() {
        let (_, actions) = seeded_store().await;
        let dims = dims();
        let events = vec![resolve_event(&shot(0, 2, 0), &dims, &actions).unwrap()];
        let existing = HashMap::from([(2, EventUpdate::for_event(500, &events[0]))]);

        let plan = plan_batch(&events, &existing, false);

        assert!(plan.inserts.is_empty());
        assert!(plan.updates.is_empty());
        assert_eq!(plan.skipped, 1);
    }

    #[tokio::test]
    async fn test_run_inserts_then_updates() {
        let (store, actions) = seeded_store().await;
        let dims = dims();
        let records = || vec![shot(0, 1, 2), pass(1, 2, Some(2)), shot(2, 3, 0)];

        let upserter = BatchUpserter::new(&store, &dims, &actions).with_options(UpsertOptions {
            batch_size: 2,
            ..Default::default()
        });

        let first = upserter.run(records()).await.unwrap();
        assert_eq!(first.events_inserted, 3);
        assert_eq!(first.shot_rows, 2);
        assert_eq!(first.pass_rows, 1);
        assert_eq!(first.events_skipped, 0);

        // identical input changes nothing
        let second = upserter.run(records()).await.unwrap();
        assert_eq!(second.events_inserted, 0);
        assert_eq!(second.events_updated, 0);
        assert_eq!(second.events_skipped, 3);

        let moved = records()
            .into_iter()
            .map(|mut r| {
                r.x_ft = Some(9.5);
                r.action = ActionCode::PostUp;
                r
            })
            .collect::<Vec<_>>();
        let third = upserter.run(moved).await.unwrap();
        assert_eq!(third.events_inserted, 0);
        assert_eq!(third.events_updated, 3);
        assert_eq!(third.shot_rows + third.pass_rows, 0);
        assert_eq!(store.event_count(), 3);

        let stored = store.event_by_source(1).unwrap();
        assert_eq!(stored.x_ft, Some(9.5));
        assert_eq!(stored.action_id, actions.id_for(ActionCode::PostUp).unwrap());
    }

    #[tokio::test]
    async fn test_no_update_skips_existing() {
        let (store, actions) = seeded_store().await;
        let dims = dims();
        let upserter = BatchUpserter::new(&store, &dims, &actions).with_options(UpsertOptions {
            no_update: true,
            ..Default::default()
        });

        upserter.run(vec![shot(0, 1, 2)]).await.unwrap();
        let rerun = upserter.run(vec![shot(0, 1, 2), shot(1, 2, 2)]).await.unwrap();

        assert_eq!(rerun.events_inserted, 1);
        assert_eq!(rerun.events_skipped, 1);
        assert_eq!(rerun.events_updated, 0);
    }

    #[tokio::test]
    async fn test_dry_run_never_touches_store() {
        let (store, actions) = seeded_store().await;
        let dims = Dimensions::default();
        let mut invalid = shot(1, 2, 0);
        invalid.player_id = None;

        let metrics = BatchUpserter::new(&store, &dims, &actions)
            .with_options(UpsertOptions {
                dry_run: true,
                batch_size: 1,
                ..Default::default()
            })
            .run(vec![shot(0, 1, 2), invalid])
            .await
            .unwrap();

        assert_eq!(metrics.events_skipped, 2);
        assert_eq!(metrics.events_inserted + metrics.events_updated, 0);
        assert_eq!(metrics.errors_parsed, 0);
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_records_are_counted_and_dropped() {
        let (store, actions) = seeded_store().await;
        let dims = dims();
        let mut unknown_game = shot(1, 2, 0);
        unknown_game.game_id = Some(999);

        let metrics = BatchUpserter::new(&store, &dims, &actions)
            .run(vec![shot(0, 1, 2), unknown_game, pass(2, 3, Some(77))])
            .await
            .unwrap();

        assert_eq!(metrics.errors_parsed, 1);
        assert_eq!(metrics.events_inserted, 2);
        assert_eq!(metrics.events_processed(), 2);
        assert_eq!(metrics.warnings_emitted, 1);
    }

    #[tokio::test]
    async fn test_strict_mode_aborts_on_invalid_record() {
        let (store, actions) = seeded_store().await;
        let dims = dims();
        let mut missing = shot(1, 2, 0);
        missing.source_event_id = None;

        let err = BatchUpserter::new(&store, &dims, &actions)
            .with_options(UpsertOptions {
                strict: true,
                batch_size: 1,
                ..Default::default()
            })
            .run(vec![shot(0, 1, 2), missing, shot(2, 3, 0)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EtlError::Validation {
                seq: 1,
                source: ValidationError::MissingField("source_event_id")
            }
        ));
        // the first batch was already committed
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let (store, actions) = seeded_store().await;
        let dims = dims();
        store.fail_next(StoreErrorKind::SerializationFailure, 2);

        let metrics = BatchUpserter::new(&store, &dims, &actions)
            .with_retry(fast_retry())
            .run(vec![shot(0, 1, 2), shot(1, 2, 0)])
            .await
            .unwrap();

        assert_eq!(metrics.retry_attempts, 2);
        assert_eq!(metrics.events_inserted, 2);
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_aborts_and_keeps_earlier_batches() {
        let (store, actions) = seeded_store().await;
        let dims = dims();
        let upserter = BatchUpserter::new(&store, &dims, &actions)
            .with_retry(fast_retry())
            .with_options(UpsertOptions {
                batch_size: 1,
                ..Default::default()
            });

        upserter.run(vec![shot(0, 1, 2)]).await.unwrap();
        store.fail_next(StoreErrorKind::Other, 1);
        let err = upserter
            .run(vec![shot(0, 2, 2), shot(1, 3, 2)])
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::Storage(ref e) if e.kind == StoreErrorKind::Other));
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_batches() {
        let (store, actions) = seeded_store().await;
        let dims = dims();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = BatchUpserter::new(&store, &dims, &actions)
            .with_cancellation(cancel)
            .run(vec![shot(0, 1, 2)])
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::Interrupted));
        assert_eq!(store.event_count(), 0);
    }
}
