//! cadence-ingest - command-line wrapper around the library service
//!
//! Each subcommand opens the store, runs one operation, prints its report as
//! JSON on stdout, forces a final snapshot flush, and exits. Ctrl+C during a
//! scan or analysis requests cooperative cancellation.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use cadence_common::config::CadenceConfig;
use cadence_common::db::Store;
use cadence_common::logging::init_tracing;
use cadence_ingest::services::{AnalysisOutcome, JobKind, ScanOutcome};
use cadence_ingest::LibraryService;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

/// Command-line arguments for cadence-ingest
#[derive(Parser, Debug)]
#[command(name = "cadence-ingest")]
#[command(about = "Scan, analyze, and build stations from an audio library")]
#[command(version)]
struct Args {
    /// Config file (overrides CADENCE_CONFIG and the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides database.path)
    #[arg(long, global = true, env = "CADENCE_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover new and changed audio files under a directory
    Scan {
        root: PathBuf,
        /// Only scan the top-level directory
        #[arg(long)]
        no_recursive: bool,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Allowed extensions (repeatable); defaults to scan.extensions
        #[arg(long = "ext")]
        extensions: Vec<String>,
    },
    /// Analyze pending tracks
    Analyze {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Reset every track to pending and analyze the whole library
    Reanalyze,
    /// Run the consistency pass
    Reconcile,
    /// Build a station from a seed track
    Station {
        seed: i64,
        /// Station length including the seed
        #[arg(long)]
        size: Option<usize>,
        /// Save the station as a playlist with this name
        #[arg(long)]
        save: Option<String>,
    },
    /// Show track counts per analysis status
    Status,
    /// Force a snapshot flush of an in-memory store
    Flush,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel the job of `kind` on Ctrl+C
fn cancel_on_interrupt(library: &LibraryService, kind: JobKind) -> tokio::task::JoinHandle<()> {
    let library = library.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(kind = %kind, "Interrupt received, cancelling job");
            library.cancel(kind);
        }
    })
}

async fn run(library: &LibraryService, command: Command) -> Result<()> {
    match command {
        Command::Scan {
            root,
            no_recursive,
            batch_size,
            extensions,
        } => {
            let mut request = library.scan_request(root);
            if no_recursive {
                request.recursive = false;
            }
            if let Some(batch_size) = batch_size {
                request.batch_size = batch_size;
            }
            if !extensions.is_empty() {
                request.extensions = extensions;
            }

            let interrupt = cancel_on_interrupt(library, JobKind::Scan);
            let report = library.scan(request).await?;
            interrupt.abort();

            print_json(&report)?;
            if report.status == ScanOutcome::Failed {
                bail!("Scan failed: {}", report.error.unwrap_or_default());
            }
        }
        Command::Analyze { limit } => {
            let mut request = library.analysis_request();
            if limit.is_some() {
                request.limit = limit;
            }

            let interrupt = cancel_on_interrupt(library, JobKind::Analysis);
            let report = library.analyze_pending(request).await?;
            interrupt.abort();

            print_json(&report)?;
            if matches!(report.status, AnalysisOutcome::Failed | AnalysisOutcome::CircuitOpen) {
                bail!("Analysis stopped: {}", report.error.unwrap_or_default());
            }
        }
        Command::Reanalyze => {
            let interrupt = cancel_on_interrupt(library, JobKind::Analysis);
            let report = library.reanalyze_all(library.analysis_request()).await?;
            interrupt.abort();

            print_json(&report)?;
            if matches!(report.status, AnalysisOutcome::Failed | AnalysisOutcome::CircuitOpen) {
                bail!("Re-analysis stopped: {}", report.error.unwrap_or_default());
            }
        }
        Command::Reconcile => {
            print_json(&library.reconcile().await?)?;
        }
        Command::Station { seed, size, save } => {
            let station = library.create_station(seed, size).await?;
            print_json(&station)?;
            if let Some(name) = save {
                let playlist_id = library.save_station_as_playlist(&station, &name).await?;
                info!(playlist_id, name = %name, "Playlist saved");
            }
        }
        Command::Status => {
            let counts = library.count_by_status().await?;
            print_json(&serde_json::json!({
                "pending": counts.pending,
                "analyzed": counts.analyzed,
                "failed": counts.failed,
                "total": counts.total(),
            }))?;
        }
        Command::Flush => {
            let outcome = library.flush(true).await?;
            info!(?outcome, "Flush requested");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = CadenceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database.path = database;
    }
    config.validate()?;
    init_tracing(&config.logging)?;

    info!("Starting cadence-ingest {}", env!("CARGO_PKG_VERSION"));
    info!(database = %config.database.path.display(), in_memory = config.database.in_memory, "Opening store");

    let store = Store::open(config.database.store_options(&config.retry))
        .await
        .context("Failed to open database")?;
    let library = LibraryService::new(store.clone(), config);

    let result = run(&library, args.command).await;

    if let Err(e) = store.flush(true).await {
        tracing::error!(error = %e, "Final snapshot flush failed");
    }
    store.close().await;

    result
}
