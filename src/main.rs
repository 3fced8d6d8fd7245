//! Tidewatch main entry point
//!
//! This is the command-line interface for the Tidewatch crawl orchestrator.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tidewatch::config::{load_config_with_hash, Config};
use tidewatch::crawler::RunOutcome;
use tidewatch::output::print_status_report;
use tidewatch::scheduler::{jitter, next_fire, next_pipeline_run};
use tidewatch::AppContext;
use tracing_subscriber::EnvFilter;

/// Tidewatch: a scheduled multi-source crawl orchestrator
///
/// Tidewatch keeps one recurring crawl job per configured source, stores
/// every batch incrementally and runs a daily processing pipeline over the
/// results.
#[derive(Parser, Debug)]
#[command(name = "tidewatch")]
#[command(version = "1.0.0")]
#[command(about = "A scheduled multi-source crawl orchestrator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show each source's next crawl without crawling
    #[arg(long, conflicts_with_all = ["crawl", "pipeline", "status"])]
    dry_run: bool,

    /// Crawl one source now, print the result as JSON and exit
    #[arg(long, value_name = "SOURCE_ID", conflicts_with_all = ["dry_run", "pipeline", "status"])]
    crawl: Option<String>,

    /// Run the pipeline once, print the result as JSON and exit
    #[arg(long, conflicts_with_all = ["dry_run", "crawl", "status"])]
    pipeline: bool,

    /// Show runtime state and recent crawls, then exit
    #[arg(long, conflicts_with_all = ["dry_run", "crawl", "pipeline"])]
    status: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let app = AppContext::new(config).context("failed to initialize")?;
    let result = if let Some(source_id) = cli.crawl.as_deref() {
        handle_crawl(&app, source_id).await
    } else if cli.pipeline {
        handle_pipeline(&app).await
    } else if cli.status {
        handle_status(&app)
    } else {
        handle_run(&app).await
    };
    app.shutdown().await;
    result
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("tidewatch=info,warn"),
            1 => EnvFilter::new("tidewatch=debug,info"),
            2 => EnvFilter::new("tidewatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the schedule
fn handle_dry_run(config: &Config) {
    let now = Utc::now();
    println!("=== Tidewatch Dry Run ===\n");

    println!("Scheduler:");
    println!("  UTC offset: {:+}h", config.scheduler.utc_offset_hours);
    println!("  Jitter: up to {}s", config.scheduler.jitter_seconds);
    println!("  Crawl timeout: {}s", config.scheduler.crawl_timeout_seconds);

    println!("\nFetch:");
    println!("  Timeout: {}s", config.fetch.timeout_seconds);
    println!("  Attempts: {}", config.fetch.max_retries);
    println!("  Per-host delay: {}ms", config.fetch.min_request_delay_ms);

    println!("\nBrowser:");
    println!("  Max pages: {}", config.browser.max_pages);
    println!("  Headless: {}", config.browser.headless);

    println!("\nStorage:");
    println!("  Backend: {:?}", config.storage.backend);
    println!("  Data dir: {}", config.storage.data_dir);

    println!("\nPipeline:");
    if config.pipeline.enabled {
        println!(
            "  Next run: {}",
            next_pipeline_run(now, config.pipeline.hour, config.pipeline.minute, &config.scheduler)
        );
    } else {
        println!("  Disabled");
    }
    for stage in &config.pipeline.stages {
        let endpoint = stage.resolve_endpoint();
        println!(
            "  - {} ({})",
            stage.name,
            endpoint.as_deref().unwrap_or("no endpoint, will be skipped")
        );
    }

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        let state = if source.is_enabled {
            let next = next_fire(source.schedule, now, &config.scheduler)
                + jitter(config.scheduler.jitter_seconds);
            format!("next {}", next.format("%Y-%m-%d %H:%M"))
        } else {
            "disabled".to_string()
        };
        println!(
            "  - {} [{}] {} via {} ({})",
            source.id,
            source.dimension,
            source.schedule,
            source.strategy_key(),
            state
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Handles --crawl: one source, result printed as JSON
async fn handle_crawl(app: &AppContext, source_id: &str) -> anyhow::Result<()> {
    match app.crawl_now(source_id).await? {
        RunOutcome::Completed(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        RunOutcome::AlreadyRunning => anyhow::bail!("{} is already being crawled", source_id),
        RunOutcome::Misconfigured(e) => Err(e.into()),
    }
}

/// Handles --pipeline: one full run, result printed as JSON
async fn handle_pipeline(app: &AppContext) -> anyhow::Result<()> {
    let result = app
        .run_pipeline_now()
        .await
        .context("pipeline is already running")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Handles --status: runtime state and the latest crawls
fn handle_status(app: &AppContext) -> anyhow::Result<()> {
    println!("Data dir: {}\n", app.config().storage.data_dir);
    let report = app.status_report(20)?;
    print_status_report(&report);
    Ok(())
}

/// Runs the scheduler until Ctrl-C
async fn handle_run(app: &AppContext) -> anyhow::Result<()> {
    app.start();
    tracing::info!("Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");
    Ok(())
}
