//! Run counters

use crate::store::BatchOutcome;
use std::time::{Duration, Instant};

/// Counters for one run
///
/// Each stage returns its own value and the pipeline merges them, so no
/// stage mutates shared state.
#[derive(Debug, Clone)]
pub struct EtlMetrics {
    pub actions_created: u64,
    pub teams_upserted: u64,
    pub players_upserted: u64,
    pub games_upserted: u64,
    pub events_inserted: u64,
    pub events_updated: u64,
    pub events_skipped: u64,
    pub shot_rows: u64,
    pub pass_rows: u64,
    pub turnover_rows: u64,
    pub warnings_emitted: u64,
    pub errors_parsed: u64,
    pub retry_attempts: u64,
    started: Instant,
}

impl Default for EtlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EtlMetrics {
    pub fn new() -> Self {
        Self {
            actions_created: 0,
            teams_upserted: 0,
            players_upserted: 0,
            games_upserted: 0,
            events_inserted: 0,
            events_updated: 0,
            events_skipped: 0,
            shot_rows: 0,
            pass_rows: 0,
            turnover_rows: 0,
            warnings_emitted: 0,
            errors_parsed: 0,
            retry_attempts: 0,
            started: Instant::now(),
        }
    }

    /// Inserted + updated + skipped. Records dropped by validation are not
    /// processed; they show up in `errors_parsed`.
    pub fn events_processed(&self) -> u64 {
        self.events_inserted + self.events_updated + self.events_skipped
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn events_per_second(&self) -> f64 {
        self.rate_over(self.elapsed())
    }

    /// Throughput for a given elapsed time; zero when no time has passed
    pub fn rate_over(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.events_processed() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn record_batch(&mut self, outcome: &BatchOutcome) {
        self.events_inserted += outcome.inserted;
        self.events_updated += outcome.updated;
        self.events_skipped += outcome.skipped;
        self.shot_rows += outcome.shot_rows;
        self.pass_rows += outcome.pass_rows;
        self.turnover_rows += outcome.turnover_rows;
    }

    /// Add another stage's counters; the earlier start time wins
    pub fn merge(&mut self, other: &EtlMetrics) {
        self.actions_created += other.actions_created;
        self.teams_upserted += other.teams_upserted;
        self.players_upserted += other.players_upserted;
        self.games_upserted += other.games_upserted;
        self.events_inserted += other.events_inserted;
        self.events_updated += other.events_updated;
        self.events_skipped += other.events_skipped;
        self.shot_rows += other.shot_rows;
        self.pass_rows += other.pass_rows;
        self.turnover_rows += other.turnover_rows;
        self.warnings_emitted += other.warnings_emitted;
        self.errors_parsed += other.errors_parsed;
        self.retry_attempts += other.retry_attempts;
        self.started = self.started.min(other.started);
    }
}
