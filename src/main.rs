//! Presence Analytics Agent CLI
//!
//! Shelf occupancy analytics from proximity radar samples.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, RecvTimeoutError};
use presence_analytics_agent::{
    config::Config,
    core::IngestionOrchestrator,
    ingress,
    persistence::{JsonLinesStore, PersistencePort, RetryPolicy, RetryingStore, SharedPort},
    stats::{create_shared_stats, Counter, IngestSnapshot},
    IngestDispatcher, OutcomeSink, PipelineError, Region, VERSION,
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "presence-agent")]
#[command(version = VERSION)]
#[command(about = "Shelf occupancy analytics from proximity radar samples", long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a JSONL file of samples in order
    Replay {
        /// Input file, one JSON sample per line
        #[arg(long, short)]
        input: PathBuf,

        /// Region definitions (JSON array)
        #[arg(long)]
        regions: Option<PathBuf>,

        /// Output directory for records and session summaries
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Read JSONL samples from stdin until EOF or Ctrl+C
    Listen {
        /// Region definitions (JSON array)
        #[arg(long)]
        regions: Option<PathBuf>,

        /// Output directory for records and session summaries
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show cumulative ingest statistics
    Status,

    /// Show configuration
    Config,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::config_path);

    match cli.command {
        Commands::Replay {
            input,
            regions,
            output,
        } => cmd_replay(&config_path, &input, regions, output),
        Commands::Listen { regions, output } => cmd_listen(&config_path, regions, output),
        Commands::Status => cmd_status(&config_path),
        Commands::Config => cmd_config(&config_path),
        Commands::InitConfig { force } => cmd_init_config(&config_path, force),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_from(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    config
        .ensure_directories()
        .context("creating data directories")?;
    Ok(config)
}

/// JSONL store behind the retry policy, plus the regions it serves.
fn open_store(
    config: &Config,
    regions: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(SharedPort, Vec<Region>)> {
    let dir = output.unwrap_or_else(|| config.export_path.clone());
    let regions_path = regions.unwrap_or_else(|| config.regions_path());
    let store = JsonLinesStore::open(&dir)
        .with_context(|| format!("opening store in {}", dir.display()))?
        .with_regions_file(&regions_path);
    let store = RetryingStore::new(store, RetryPolicy::from(&config.retry));

    let regions = store
        .list_regions()
        .with_context(|| format!("loading regions from {}", regions_path.display()))?;
    if regions.is_empty() {
        tracing::warn!(path = %regions_path.display(), "no regions defined, records will carry no region");
    } else {
        tracing::info!(count = regions.len(), "regions loaded");
    }
    println!("Writing records and sessions to {dir:?}");

    Ok((Arc::new(store), regions))
}

fn cmd_replay(
    config_path: &Path,
    input: &Path,
    regions: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let (port, regions) = open_store(&config, regions, output)?;
    let stats = create_shared_stats(Some(config.stats_path()));
    let sink = OutcomeSink::new(port, stats.clone());

    let file = std::fs::File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let sweep_every = chrono::Duration::from_std(config.worker.sweep_interval)
        .unwrap_or_else(|_| chrono::Duration::seconds(1));
    let default_device_id = config.default_device_id.clone();
    let mut orchestrator = IngestionOrchestrator::new(config, regions);
    let mut last_sweep: Option<DateTime<Utc>> = None;
    let mut last_seen: Option<DateTime<Utc>> = None;

    for (idx, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.context("reading input")?;
        if line.trim().is_empty() {
            continue;
        }
        stats.record(Counter::Received);

        let sample = match ingress::parse_line(&line, Utc::now(), &default_device_id) {
            Ok(sample) => sample,
            Err(e) => {
                stats.record(Counter::Rejected);
                eprintln!("line {}: rejected: {e}", idx + 1);
                continue;
            }
        };

        // Sweep on sample time first, so a departure after a long gap
        // cannot end a session that had already gone idle.
        let now = sample.timestamp;
        let due = last_sweep.map_or(true, |t| now - t >= sweep_every);
        if due {
            if let Err(e) = sink.accept_forced(&orchestrator.sweep(now)) {
                report_write_failure(idx + 1, &e);
            }
            last_sweep = Some(now);
        }

        match orchestrator.process(&sample) {
            Ok(outcome) => {
                if let Err(e) = sink.accept(&outcome) {
                    report_write_failure(idx + 1, &e);
                }
            }
            Err(e) => {
                stats.record(Counter::Rejected);
                eprintln!("line {}: rejected: {e}", idx + 1);
                continue;
            }
        }
        last_seen = Some(last_seen.map_or(now, |t| t.max(now)));
    }

    if let Some(end) = last_seen {
        if let Err(e) = sink.accept_forced(&orchestrator.close_all(end)) {
            report_write_failure(0, &e);
        }
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }
    println!();
    println!("{}", stats.summary());
    Ok(())
}

/// Retryable failures mean the store was down; the rest were refused outright.
fn report_write_failure(line: usize, err: &PipelineError) {
    let kind = if err.is_retryable() { "store unavailable, not persisted" } else { "write rejected" };
    if line == 0 {
        eprintln!("shutdown: {kind}: {err}");
    } else {
        eprintln!("line {line}: {kind}: {err}");
    }
}

fn cmd_listen(config_path: &Path, regions: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let (port, regions) = open_store(&config, regions, output)?;
    let stats = create_shared_stats(Some(config.stats_path()));
    let mut dispatcher = IngestDispatcher::new(config, regions, OutcomeSink::new(port, stats.clone()));

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    // stdin blocks, so it gets its own thread; EOF drops the sender.
    let (tx, rx) = bounded::<String>(1024);
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("Listening for samples on stdin. Press Ctrl+C to stop.");

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => {
                if let Err(e) = dispatcher.dispatch_line(&line) {
                    tracing::warn!(error = %e, "sample not dispatched");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!();
    println!("Stopping...");
    dispatcher.shutdown();

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }
    println!("{}", stats.summary());
    Ok(())
}

fn cmd_status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Presence Analytics Agent Status");
    println!("===============================");
    println!();
    println!("Configuration:");
    println!("  Config file: {config_path:?}");
    println!("  Default device: {}", config.default_device_id);
    println!(
        "  Presence / absence: {:.1}m / {:.1}m",
        config.presence.presence_threshold_m, config.presence.absence_threshold_m
    );
    println!("  Regions file: {:?}", config.regions_path());
    println!("  Export path: {:?}", config.export_path);
    println!();

    let stats_path = config.stats_path();
    if !stats_path.exists() {
        println!("No previous run data found.");
        return Ok(());
    }

    let content = std::fs::read_to_string(&stats_path)
        .with_context(|| format!("reading {}", stats_path.display()))?;
    let stats: IngestSnapshot = serde_json::from_str(&content).context("parsing stats")?;
    println!("Cumulative Statistics (as of {}):", stats.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Samples received: {}", stats.received);
    println!("  Samples rejected: {}", stats.rejected);
    println!("  Samples skipped: {}", stats.skipped);
    println!("  Samples processed: {}", stats.processed);
    println!("  Samples shed: {}", stats.shed);
    println!("  Sessions started: {}", stats.sessions_started);
    println!("  Sessions completed: {}", stats.sessions_completed);
    println!("  Sessions discarded: {}", stats.sessions_discarded);
    println!("  Sessions force-closed: {}", stats.sessions_force_closed);
    println!("  Persistence failures: {}", stats.persistence_failures);
    Ok(())
}

fn cmd_config(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {config_path:?}");
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    Config::default().save_to(config_path)?;
    println!("Wrote default configuration to {config_path:?}");
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
