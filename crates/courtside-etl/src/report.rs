//! End-of-run summary
//!
//! The labels below are parsed by smoke checks; keep them stable.

use crate::metrics::EtlMetrics;
use std::fmt;
use std::time::Duration;

const BANNER_WIDTH: usize = 60;

pub struct Summary<'a> {
    metrics: &'a EtlMetrics,
    elapsed: Duration,
    dry_run: bool,
}

impl<'a> Summary<'a> {
    /// Freeze the elapsed time now so every line reports the same instant
    pub fn new(metrics: &'a EtlMetrics, dry_run: bool) -> Self {
        Self {
            metrics,
            elapsed: metrics.elapsed(),
            dry_run,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.metrics;
        let banner = "=".repeat(BANNER_WIDTH);

        writeln!(f)?;
        writeln!(f, "{banner}")?;
        writeln!(f, "ETL SUMMARY")?;
        writeln!(f, "{banner}")?;
        writeln!(f, "Actions created: {}", m.actions_created)?;
        writeln!(f, "Teams upserted: {}", m.teams_upserted)?;
        writeln!(f, "Players upserted: {}", m.players_upserted)?;
        writeln!(f, "Games upserted: {}", m.games_upserted)?;
        writeln!(f, "Events processed: {}", m.events_processed())?;
        writeln!(f, "Events inserted: {}", m.events_inserted)?;
        writeln!(f, "Events updated: {}", m.events_updated)?;
        writeln!(f, "Events skipped: {}", m.events_skipped)?;
        writeln!(f, "Shot events: {}", m.shot_rows)?;
        writeln!(f, "Pass events: {}", m.pass_rows)?;
        writeln!(f, "Turnover events: {}", m.turnover_rows)?;
        writeln!(f, "Warnings emitted: {}", m.warnings_emitted)?;
        writeln!(f, "Errors parsed: {}", m.errors_parsed)?;
        writeln!(f, "Retry attempts: {}", m.retry_attempts)?;
        writeln!(f, "Total time: {:.2} seconds", self.elapsed.as_secs_f64())?;
        writeln!(f, "Events/second: {:.2}", m.rate_over(self.elapsed))?;
        if self.dry_run {
            writeln!(f, "Mode: DRY RUN - No data written")?;
        }
        write!(f, "{banner}")
    }
}
