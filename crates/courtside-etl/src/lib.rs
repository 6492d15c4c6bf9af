//! Courtside ETL Library
//!
//! Idempotent, batch-oriented loader for per-player basketball event extracts
//! (shots, passes, turnovers).
//!
//! # Overview
//!
//! - **Actions**: closed vocabulary of offensive action codes ([`actions`])
//! - **Dimensions**: teams, players, games and the season they belong to ([`dimensions`])
//! - **Normalization**: lazy traversal of raw records with coordinate checks ([`normalize`])
//! - **Upsert**: batched writes keyed on the source event id ([`upsert`])
//! - **Storage**: PostgreSQL and in-memory implementations of [`store::EventStore`]
//!
//! # Example
//!
//! ```no_run
//! use courtside_etl::{MemoryEventStore, Pipeline, PipelineOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = MemoryEventStore::new();
//!     let metrics = Pipeline::new(&store, PipelineOptions::default()).run().await?;
//!     println!("{} events inserted", metrics.events_inserted);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod actions;
pub mod cli;
pub mod config;
pub mod db;
pub mod dimensions;
pub mod error;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod raw;
pub mod report;
pub mod retry;
pub mod store;
pub mod upsert;

// Re-export commonly used types
pub use cli::Cli;
pub use error::{EtlError, Result, ValidationError};
pub use metrics::EtlMetrics;
pub use pipeline::{Pipeline, PipelineOptions, Stage};
pub use report::Summary;
pub use store::{EventStore, MemoryEventStore, PgEventStore};
