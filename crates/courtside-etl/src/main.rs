//! Courtside ETL - Main entry point

use clap::Parser;
use courtside_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use courtside_etl::config::EtlConfig;
use courtside_etl::raw::check_inputs;
use courtside_etl::store::EventStore;
use courtside_etl::{db, Cli, EtlError, EtlMetrics, MemoryEventStore, PgEventStore, Pipeline, Summary};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Handle markdown help generation
    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    // Console plus logs/etl.<date>; environment variables take precedence
    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Both)
        .log_file_prefix("etl")
        .build();
    let log_config = match log_config.with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid logging environment: {e}");
            LogConfig::default()
        },
    };
    let guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        },
    };

    let code = match run(&cli).await {
        Ok(()) => 0,
        Err(EtlError::Interrupted) => {
            info!("ETL process interrupted by user");
            1
        },
        Err(e) if e.is_input_error() => {
            error!("{e}");
            1
        },
        Err(e) => {
            error!("ETL process failed: {e}");
            1
        },
    };

    // process::exit skips destructors; flush the file writer first
    drop(guard);
    process::exit(code);
}

async fn run(cli: &Cli) -> courtside_etl::Result<()> {
    // Missing extracts are reported before anything touches the database
    check_inputs(&cli.raw_dir)?;

    info!("Starting ETL process...");
    info!("Raw data directory: {}", cli.raw_dir.display());
    info!("Batch size: {}", cli.batch_size);
    info!("Dry run: {}", cli.dry_run);
    info!("No update mode: {}", cli.no_update);
    if cli.resume {
        info!("Resuming: events already stored are detected by source id");
    }

    let config = EtlConfig::from_env()?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(cancel.clone()));

    let metrics = if cli.dry_run {
        // Dimension rows still need ids for validation; keep them off the database
        let store = MemoryEventStore::new();
        run_pipeline(&store, cli, &config, cancel).await?
    } else {
        let pool = db::create_pool(config.require_database()?).await?;
        db::health_check(&pool).await?;
        if config.run_migrations {
            db::run_migrations(&pool).await?;
        }

        let store = PgEventStore::new(pool.clone());
        let result = run_pipeline(&store, cli, &config, cancel).await;
        pool.close().await;
        result?
    };

    println!("{}", Summary::new(&metrics, cli.dry_run));
    info!("ETL process completed successfully");

    Ok(())
}

async fn run_pipeline<S: EventStore>(
    store: &S,
    cli: &Cli,
    config: &EtlConfig,
    cancel: CancellationToken,
) -> courtside_etl::Result<EtlMetrics> {
    Pipeline::new(store, cli.pipeline_options())
        .with_retry(config.retry.policy())
        .with_cancellation(cancel)
        .run()
        .await
}

/// Cancel the run on Ctrl+C; the batch in flight still commits or rolls back
async fn cancel_on_interrupt(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, stopping after the current batch");
            cancel.cancel();
        },
        Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
    }
}
