//! End-to-end ETL run: actions, dimensions, then events
//!
//! Stages run strictly in order on a single task. Stages that are not
//! selected with `--only` read what is already stored instead of writing,
//! so a later stage always sees the dimension rows it needs.

use crate::actions::ActionDictionary;
use crate::dimensions::{DateFilter, DimensionResolver, DimensionSelection};
use crate::error::{EtlError, Result};
use crate::metrics::EtlMetrics;
use crate::normalize::EventNormalizer;
use crate::raw::{check_inputs, RawDataset};
use crate::retry::RetryPolicy;
use crate::store::EventStore;
use crate::upsert::{BatchUpserter, UpsertOptions};
use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Which part of the pipeline writes during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Stage {
    Actions,
    Teams,
    Players,
    Games,
    Events,
    #[default]
    All,
}

impl Stage {
    pub fn runs_actions(&self) -> bool {
        matches!(self, Stage::Actions | Stage::All)
    }

    pub fn runs_events(&self) -> bool {
        matches!(self, Stage::Events | Stage::All)
    }

    pub fn dimension_selection(&self) -> DimensionSelection {
        match self {
            Stage::All => DimensionSelection::ALL,
            Stage::Teams => DimensionSelection {
                teams: true,
                ..DimensionSelection::NONE
            },
            Stage::Players => DimensionSelection {
                players: true,
                ..DimensionSelection::NONE
            },
            Stage::Games => DimensionSelection {
                games: true,
                ..DimensionSelection::NONE
            },
            Stage::Actions | Stage::Events => DimensionSelection::NONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Actions => "actions",
            Stage::Teams => "teams",
            Stage::Players => "players",
            Stage::Games => "games",
            Stage::Events => "events",
            Stage::All => "all",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub raw_dir: PathBuf,
    pub stage: Stage,
    /// Cap on the number of event records read
    pub limit: Option<u64>,
    pub filter: DateFilter,
    pub upsert: UpsertOptions,
    /// Clear the fact and detail tables before loading
    pub truncate: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("raw_data"),
            stage: Stage::All,
            limit: None,
            filter: DateFilter::default(),
            upsert: UpsertOptions::default(),
            truncate: false,
        }
    }
}

pub struct Pipeline<'a, S: EventStore + ?Sized> {
    store: &'a S,
    options: PipelineOptions,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a, S: EventStore + ?Sized> Pipeline<'a, S> {
    pub fn new(store: &'a S, options: PipelineOptions) -> Self {
        Self {
            store,
            options,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run the selected stages and return the merged counters
    pub async fn run(&self) -> Result<EtlMetrics> {
        let mut metrics = EtlMetrics::new();
        let options = &self.options;

        check_inputs(&options.raw_dir)?;
        let dataset = RawDataset::load(&options.raw_dir)?;
        info!(
            teams = dataset.teams.len(),
            players = dataset.players.len(),
            games = dataset.games.len(),
            events = dataset.event_count(),
            stage = %options.stage,
            "Raw data loaded"
        );

        if options.truncate {
            if options.upsert.dry_run {
                warn!("Ignoring --truncate in dry-run mode");
            } else {
                warn!("Truncating event tables");
                self.store.truncate_facts().await?;
            }
        }

        self.checkpoint()?;
        let actions = if options.stage.runs_actions() {
            let (actions, created) = ActionDictionary::ensure(self.store).await?;
            metrics.actions_created += created;
            actions
        } else {
            ActionDictionary::load(self.store).await?
        };

        self.checkpoint()?;
        let (dims, dim_metrics) = DimensionResolver::new(self.store)
            .load(&dataset, &options.filter, options.stage.dimension_selection())
            .await?;
        metrics.merge(&dim_metrics);

        if options.stage.runs_events() {
            self.checkpoint()?;
            let mut events = EventNormalizer::open(&options.raw_dir, options.limit)?;

            let upserter = BatchUpserter::new(self.store, &dims, &actions)
                .with_options(options.upsert)
                .with_retry(self.retry)
                .with_cancellation(self.cancel.clone());
            let result = upserter.run(&mut events).await;

            metrics.warnings_emitted += events.stats().warnings;
            metrics.merge(&result?);
        }

        Ok(metrics)
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EtlError::Interrupted);
        }
        Ok(())
    }
}
