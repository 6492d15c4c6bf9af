//! Command-line interface

use crate::dimensions::DateFilter;
use crate::pipeline::{PipelineOptions, Stage};
use crate::upsert::{UpsertOptions, DEFAULT_BATCH_SIZE};
use chrono::NaiveDate;
use clap::Parser;
use courtside_common::CourtsideError;
use std::path::PathBuf;

/// Courtside ETL - load raw basketball extracts into PostgreSQL
///
/// Re-running over the same input is safe: events already stored are
/// updated (or skipped with --no-update) rather than duplicated.
#[derive(Parser, Debug)]
#[command(name = "courtside-etl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Validate and count records without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of event records to process
    #[arg(long, value_name = "N")]
    pub limit: Option<u64>,

    /// Number of events per transaction
    #[arg(
        long,
        value_name = "N",
        default_value_t = DEFAULT_BATCH_SIZE as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub batch_size: u64,

    /// Only run this stage
    #[arg(long, value_enum, default_value_t = Stage::All)]
    pub only: Stage,

    /// Clear event and event detail tables before loading (destructive)
    #[arg(long)]
    pub truncate: bool,

    /// Only load games on or after this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub since: Option<NaiveDate>,

    /// Only load games on or before this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub until: Option<NaiveDate>,

    /// Resume an earlier run (runs are idempotent, so this is the default behaviour)
    #[arg(long)]
    pub resume: bool,

    /// Abort on the first invalid record instead of skipping it
    #[arg(long)]
    pub strict: bool,

    /// Insert new events only; leave existing events untouched
    #[arg(long)]
    pub no_update: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory holding teams.json, players.json and games.json
    #[arg(long, value_name = "PATH", default_value = "raw_data")]
    pub raw_dir: PathBuf,

    /// Print the CLI reference as Markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

impl Cli {
    pub fn date_filter(&self) -> DateFilter {
        DateFilter::new(self.since, self.until)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            raw_dir: self.raw_dir.clone(),
            stage: self.only,
            limit: self.limit,
            filter: self.date_filter(),
            upsert: UpsertOptions {
                batch_size: usize::try_from(self.batch_size).unwrap_or(usize::MAX),
                dry_run: self.dry_run,
                no_update: self.no_update,
                strict: self.strict,
            },
            truncate: self.truncate,
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, CourtsideError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| CourtsideError::InvalidDate(value.to_string()))
}
