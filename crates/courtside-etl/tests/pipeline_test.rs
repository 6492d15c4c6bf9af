//! End-to-end pipeline runs against the in-memory store

mod common;

use chrono::NaiveDate;
use common::{options, raw_dir, write_dataset, FixtureShape};
use courtside_etl::actions::ActionCode;
use courtside_etl::dimensions::DateFilter;
use courtside_etl::retry::RetryPolicy;
use courtside_etl::store::StoreErrorKind;
use courtside_etl::upsert::UpsertOptions;
use courtside_etl::{
    EtlError, EventStore, MemoryEventStore, Pipeline, PipelineOptions, Stage, Summary,
};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn with_limit(base: PipelineOptions, limit: u64) -> PipelineOptions {
    PipelineOptions {
        limit: Some(limit),
        ..base
    }
}

fn dry_run(base: PipelineOptions) -> PipelineOptions {
    PipelineOptions {
        upsert: UpsertOptions {
            dry_run: true,
            ..base.upsert
        },
        ..base
    }
}

fn no_update(base: PipelineOptions) -> PipelineOptions {
    PipelineOptions {
        upsert: UpsertOptions {
            no_update: true,
            ..base.upsert
        },
        ..base
    }
}

#[tokio::test]
async fn test_dry_run_with_limit_writes_no_events() {
    let dir = raw_dir(FixtureShape::default());
    let store = MemoryEventStore::new();

    let metrics = Pipeline::new(&store, dry_run(with_limit(options(&dir), 50)))
        .run()
        .await
        .unwrap();

    assert_eq!(metrics.events_processed(), 50);
    assert_eq!(metrics.events_inserted, 0);
    assert_eq!(metrics.events_updated, 0);
    assert_eq!(metrics.events_skipped, 50);
    assert_eq!(store.write_calls(), 0);
    assert_eq!(store.event_count(), 0);

    let report = Summary::new(&metrics, true).to_string();
    assert!(report.contains("Events processed: 50\n"));
    assert!(report.contains("Events inserted: 0\n"));
    assert!(report.contains("Mode: DRY RUN - No data written"));
}

#[tokio::test]
async fn test_first_run_inserts_everything() {
    let dir = raw_dir(FixtureShape::default());
    let store = MemoryEventStore::new();

    let metrics = Pipeline::new(&store, with_limit(options(&dir), 100))
        .run()
        .await
        .unwrap();

    assert_eq!(
        metrics.events_inserted + metrics.events_updated + metrics.events_skipped,
        100
    );
    assert_eq!(metrics.events_inserted, 100);
    assert_eq!(metrics.events_skipped, 0);
    assert_eq!(metrics.errors_parsed, 0);
    assert_eq!(
        metrics.shot_rows + metrics.pass_rows + metrics.turnover_rows,
        100
    );
    assert_eq!(store.event_count(), 100);
}

#[tokio::test]
async fn test_rerun_detects_existing_events() {
    let dir = raw_dir(FixtureShape::default());
    let store = MemoryEventStore::new();
    let opts = with_limit(options(&dir), 100);

    Pipeline::new(&store, opts.clone()).run().await.unwrap();
    let rerun = Pipeline::new(&store, opts.clone()).run().await.unwrap();

    assert_eq!(rerun.events_inserted, 0);
    assert_eq!(rerun.events_skipped, 100);
    assert_eq!(rerun.actions_created, 0);
    assert_eq!(store.event_count(), 100);

    let insert_only = Pipeline::new(&store, no_update(opts)).run().await.unwrap();
    assert_eq!(insert_only.events_inserted, 0);
    assert_eq!(insert_only.events_skipped, 100);
    assert_eq!(insert_only.events_updated, 0);
}

#[tokio::test]
async fn test_changed_input_updates_whitelisted_columns() {
    let shape = FixtureShape {
        players: 2,
        shots: 2,
        passes: 0,
        turnovers: 0,
    };
    let dir = TempDir::new().unwrap();
    let (teams, mut players, games) = common::dataset(shape);
    write_dataset(&dir, &teams, &players, &games);

    let store = MemoryEventStore::new();
    Pipeline::new(&store, options(&dir)).run().await.unwrap();

    let first_shot = &mut players[0]["shots"][0];
    let source_id = first_shot["id"].as_i64().unwrap();
    first_shot["shot_loc_x"] = json!(22.5);
    first_shot["action_type"] = json!("dribbleHandoff");
    first_shot["points"] = json!(3);
    write_dataset(&dir, &teams, &players, &games);

    let metrics = Pipeline::new(&store, options(&dir)).run().await.unwrap();

    assert_eq!(metrics.events_updated, 1);
    assert_eq!(metrics.events_skipped, 3);
    assert_eq!(metrics.events_inserted, 0);
    assert_eq!(metrics.shot_rows, 0);
    // unknown label
    assert_eq!(metrics.warnings_emitted, 1);

    let stored = store.event_by_source(source_id).unwrap();
    assert_eq!(stored.x_ft, Some(22.5));
    let unknown = store
        .load_actions()
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.code == "UNKNOWN")
        .unwrap();
    assert_eq!(stored.action_id, unknown.id);
    // detail rows are never re-derived on update
    let detail = store.shot_detail(stored.event_id).unwrap();
    assert_eq!(detail.points, 0);
    assert_eq!(detail.shot_result, "miss");
}

#[tokio::test]
async fn test_since_after_all_games_processes_no_events() {
    let shape = FixtureShape::default();
    let dir = raw_dir(shape);
    let store = MemoryEventStore::new();
    let opts = PipelineOptions {
        filter: DateFilter::new(NaiveDate::from_ymd_opt(2030, 1, 1), None),
        ..options(&dir)
    };

    let metrics = Pipeline::new(&store, opts).run().await.unwrap();

    assert_eq!(metrics.games_upserted, 0);
    assert_eq!(metrics.events_processed(), 0);
    assert_eq!(metrics.errors_parsed, shape.total_events() as u64);
    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn test_date_window_keeps_only_matching_games() {
    let dir = raw_dir(FixtureShape::default());
    let store = MemoryEventStore::new();
    let opts = PipelineOptions {
        filter: DateFilter::new(
            NaiveDate::from_ymd_opt(2023, 12, 1),
            NaiveDate::from_ymd_opt(2023, 12, 1),
        ),
        ..options(&dir)
    };

    let metrics = Pipeline::new(&store, opts).run().await.unwrap();

    assert_eq!(metrics.games_upserted, 1);
    assert!(metrics.events_inserted > 0);
    assert!(store.events().iter().all(|e| e.game_id == 11));
    assert_eq!(
        metrics.events_inserted + metrics.errors_parsed,
        FixtureShape::default().total_events() as u64
    );
}

#[tokio::test]
async fn test_stored_events_keep_invariants() {
    let dir = raw_dir(FixtureShape::default());
    let store = MemoryEventStore::new();

    Pipeline::new(&store, options(&dir)).run().await.unwrap();
    Pipeline::new(&store, options(&dir)).run().await.unwrap();

    let events = store.events();
    let sources: HashSet<i64> = events.iter().map(|e| e.source_event_id).collect();
    assert_eq!(sources.len(), events.len());

    let counts = store.counts();
    assert!(counts.details() <= counts.events);

    let known: HashSet<i32> = store
        .load_actions()
        .await
        .unwrap()
        .into_iter()
        .filter(|a| ActionCode::from_code(&a.code).is_some())
        .map(|a| a.id)
        .collect();
    assert_eq!(known.len(), ActionCode::ALL.len());
    assert!(events.iter().all(|e| known.contains(&e.action_id)));
}

#[tokio::test]
async fn test_missing_file_fails_before_any_write() {
    let dir = raw_dir(FixtureShape::default());
    std::fs::remove_file(dir.path().join("games.json")).unwrap();
    let store = MemoryEventStore::new();

    let err = Pipeline::new(&store, options(&dir)).run().await.unwrap_err();

    assert!(err.is_input_error());
    assert!(err.to_string().contains("games.json"));
    assert!(store.load_actions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_player_with_unknown_team_aborts() {
    let dir = TempDir::new().unwrap();
    let (teams, mut players, games) = common::dataset(FixtureShape::default());
    players[3]["team_id"] = json!(77);
    write_dataset(&dir, &teams, &players, &games);
    let store = MemoryEventStore::new();

    let err = Pipeline::new(&store, options(&dir)).run().await.unwrap_err();

    assert!(matches!(
        err,
        EtlError::MissingReference {
            player_id: 103,
            team_id: Some(77)
        }
    ));
    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn test_invalid_records_are_counted_or_fatal_in_strict_mode() {
    let dir = TempDir::new().unwrap();
    let (teams, mut players, games) = common::dataset(FixtureShape::default());
    players[0]["shots"][1]["game_id"] = json!(null);
    players[2]["passes"][0]["game_id"] = json!(4242);
    write_dataset(&dir, &teams, &players, &games);

    let store = MemoryEventStore::new();
    let metrics = Pipeline::new(&store, options(&dir)).run().await.unwrap();
    assert_eq!(metrics.errors_parsed, 2);
    assert_eq!(
        metrics.events_inserted,
        FixtureShape::default().total_events() as u64 - 2
    );

    let strict = PipelineOptions {
        upsert: UpsertOptions {
            strict: true,
            ..UpsertOptions::default()
        },
        ..options(&dir)
    };
    let fresh = MemoryEventStore::new();
    let err = Pipeline::new(&fresh, strict).run().await.unwrap_err();
    assert!(matches!(err, EtlError::Validation { .. }));
}

#[tokio::test]
async fn test_warnings_are_counted() {
    let dir = TempDir::new().unwrap();
    let (teams, mut players, games) = common::dataset(FixtureShape::default());
    players[0]["shots"][0]["action_type"] = json!("alleyOop");
    players[0]["shots"][1]["shot_loc_x"] = json!(250.0);
    players[0]["shots"][2]["shot_loc_y"] = json!("baseline");
    players[1]["passes"][0]["target_player_id"] = json!(999);
    write_dataset(&dir, &teams, &players, &games);
    let store = MemoryEventStore::new();

    let metrics = Pipeline::new(&store, options(&dir)).run().await.unwrap();

    assert_eq!(metrics.warnings_emitted, 4);
    assert_eq!(metrics.errors_parsed, 0);
    let shot = store
        .event_by_source(players[0]["shots"][1]["id"].as_i64().unwrap())
        .unwrap();
    assert_eq!(shot.x_ft, Some(250.0));
    let pass = store
        .event_by_source(players[1]["passes"][0]["id"].as_i64().unwrap())
        .unwrap();
    assert_eq!(store.pass_detail(pass.event_id).unwrap().target_player_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let dir = raw_dir(FixtureShape::default());
    let store = MemoryEventStore::new();
    store.fail_next(StoreErrorKind::Deadlock, 2);

    let metrics = Pipeline::new(&store, options(&dir)).run().await.unwrap();

    assert_eq!(metrics.retry_attempts, 2);
    assert_eq!(
        metrics.events_inserted,
        FixtureShape::default().total_events() as u64
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_keeps_committed_batches() {
    let dir = raw_dir(FixtureShape::default());
    let store = MemoryEventStore::new();
    let opts = PipelineOptions {
        upsert: UpsertOptions {
            batch_size: 40,
            ..UpsertOptions::default()
        },
        ..options(&dir)
    };

    let first = Pipeline::new(&store, with_limit(opts.clone(), 40))
        .run()
        .await
        .unwrap();
    assert_eq!(first.events_inserted, 40);

    // one retry allowed, two failures queued
    store.fail_next(StoreErrorKind::ConnectionLost, 2);
    let err = Pipeline::new(&store, opts.clone())
        .with_retry(RetryPolicy::new(1, Duration::from_millis(10)))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, EtlError::Storage(ref e) if e.kind == StoreErrorKind::ConnectionLost));
    assert_eq!(store.event_count(), 40);

    let resumed = Pipeline::new(&store, opts).run().await.unwrap();
    assert_eq!(resumed.events_skipped, 40);
    assert_eq!(resumed.events_inserted, 110);
    assert_eq!(store.event_count(), 150);
}

#[tokio::test]
async fn test_cancellation_stops_before_writing() {
    let dir = raw_dir(FixtureShape::default());
    let store = MemoryEventStore::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = Pipeline::new(&store, options(&dir))
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::Interrupted));
    assert_eq!(store.write_calls(), 0);
}

#[tokio::test]
async fn test_only_events_without_dimensions_rejects_everything() {
    let dir = raw_dir(FixtureShape::default());
    let store = MemoryEventStore::new();
    let opts = PipelineOptions {
        stage: Stage::Events,
        ..options(&dir)
    };

    let metrics = Pipeline::new(&store, opts).run().await.unwrap();

    assert_eq!(metrics.events_processed(), 0);
    assert_eq!(
        metrics.errors_parsed,
        FixtureShape::default().total_events() as u64
    );
}
