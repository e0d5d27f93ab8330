//! Command-line interface for arec.
//!
//! Provides commands for running the daemon, inspecting the spool,
//! and driving single recovery, eviction and upload passes by hand.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use fs2::FileExt;
use serde::Serialize;

use crate::config::paths::Layout;
use crate::config::Config;
use crate::core::{
    storage_guard, Collaborators, ConnectivityMonitor, Daemon, ScheduleWindow,
    ShutdownCoordinator, Uploader,
};
use crate::domain::SegmentNaming;
use crate::spool::{RecoveryScan, SortOrder, SpoolStore};

/// arec - Audio capture daemon with a durable upload spool
#[derive(Parser, Debug)]
#[command(name = "arec")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (overrides AREC_CONFIG and the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the capture daemon until SIGINT/SIGTERM
    Run,

    /// Show spool depth and usage
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Reconcile leftovers from an unclean stop
    Recover,

    /// Evict the oldest segments until the spool fits its budget
    Enforce,

    /// Run one upload pass over the spool
    Flush,

    /// Probe reachability and classify the link
    Check,

    /// Show resolved configuration (debug)
    Config,
}

impl Commands {
    /// Whether this command runs the long-lived daemon
    pub fn is_daemon(&self) -> bool {
        matches!(self, Commands::Run)
    }
}

impl Cli {
    pub async fn execute(self, config: Config) -> Result<()> {
        match self.command {
            Commands::Run => run_daemon(config).await,
            Commands::Status { json } => show_status(&config, json).await,
            Commands::Recover => recover(&config).await,
            Commands::Enforce => enforce(&config).await,
            Commands::Flush => flush(&config).await,
            Commands::Check => check(&config).await,
            Commands::Config => show_config(&config),
        }
    }
}

/// Take the single-instance lock; held until the returned file drops
fn acquire_lock(layout: &Layout) -> Result<File> {
    std::fs::create_dir_all(&layout.home)
        .with_context(|| format!("Cannot create directory: {}", layout.home.display()))?;

    let lock_path = layout.lock_file();
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

    file.try_lock_exclusive().with_context(|| {
        format!(
            "Another arec instance is running (lock held on {})",
            lock_path.display()
        )
    })?;

    Ok(file)
}

async fn open_store(config: &Config, layout: &Layout) -> Result<SpoolStore> {
    let store = SpoolStore::open(layout.pending.clone(), config.naming()).await?;
    Ok(store)
}

/// Run the daemon in the foreground
async fn run_daemon(config: Config) -> Result<()> {
    let layout = Layout::from_config(&config);
    let _lock = acquire_lock(&layout)?;

    tracing::info!("Starting arec (home: {})", layout.home.display());
    if let Some(ref path) = config.config_file {
        tracing::info!("Config: {}", path.display());
    }

    let collaborators = Collaborators::system(&config, &layout);
    let daemon = Daemon::bootstrap(config, collaborators).await?;

    let recovery = daemon.recovery();
    if !recovery.is_noop() {
        tracing::info!(
            "Recovered {} segment(s), discarded {}, cleared {} marker(s)",
            recovery.recovered,
            recovery.discarded,
            recovery.markers_cleared
        );
    }

    let report = daemon.run().await?;
    if report.forced > 0 {
        tracing::warn!("{} task(s) were aborted during shutdown", report.forced);
    }

    Ok(())
}

/// Snapshot of the spool for `arec status`
#[derive(Debug, Serialize)]
struct StatusReport {
    home: PathBuf,
    spool: PathBuf,
    target: Option<String>,
    schedule: String,
    queued: usize,
    queued_bytes: u64,
    budget_bytes: u64,
    usage_percent: f64,
    oldest: Option<String>,
    newest: Option<String>,
    oldest_modified: Option<DateTime<Local>>,
    quarantined: usize,
    quarantined_bytes: u64,
    recording: Vec<String>,
}

async fn collect_status(config: &Config) -> Result<StatusReport> {
    let layout = Layout::from_config(config);
    let store = SpoolStore::new(layout.pending.clone(), config.naming());

    let segments = store.list(SortOrder::OldestFirst).await?;
    let queued_bytes: u64 = segments.iter().map(|s| s.size).sum();

    let failed = SpoolStore::new(layout.failed.clone(), config.naming())
        .list(SortOrder::OldestFirst)
        .await?;
    let quarantined_bytes: u64 = failed.iter().map(|s| s.size).sum();

    let budget_bytes = config.storage_budget();
    let used_bytes = storage_guard(config, &layout).usage(&store).await?;
    let usage_percent = if budget_bytes == 0 {
        0.0
    } else {
        used_bytes as f64 * 100.0 / budget_bytes as f64
    };

    let mut recording = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(&layout.home).await {
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if SegmentNaming::is_marker(&path) {
                if let Some(name) = path.file_name() {
                    recording.push(name.to_string_lossy().into_owned());
                }
            }
        }
    }
    recording.sort();

    Ok(StatusReport {
        home: layout.home.clone(),
        spool: layout.pending.clone(),
        target: config.cloud.target.clone(),
        schedule: ScheduleWindow::from(&config.schedule).to_string(),
        queued: segments.len(),
        queued_bytes,
        budget_bytes,
        usage_percent,
        oldest: segments.first().map(|s| s.name()),
        newest: segments.last().map(|s| s.name()),
        oldest_modified: segments.first().map(|s| DateTime::<Local>::from(s.modified)),
        quarantined: failed.len(),
        quarantined_bytes,
        recording,
    })
}

async fn show_status(config: &Config, json: bool) -> Result<()> {
    let status = collect_status(config).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?
        );
        return Ok(());
    }

    println!("Home:      {}", status.home.display());
    println!("Spool:     {}", status.spool.display());
    println!(
        "Target:    {}",
        status.target.as_deref().unwrap_or("(none - local storage only)")
    );
    println!("Schedule:  {}", status.schedule);
    println!();
    println!(
        "Queued:    {} file(s), {:.1} MB of {:.1} MB ({:.1}%)",
        status.queued,
        mb(status.queued_bytes),
        mb(status.budget_bytes),
        status.usage_percent
    );
    if let (Some(oldest), Some(newest)) = (&status.oldest, &status.newest) {
        println!("Oldest:    {}", oldest);
        println!("Newest:    {}", newest);
    }
    if status.quarantined > 0 {
        println!(
            "Failed:    {} file(s), {:.1} MB",
            status.quarantined,
            mb(status.quarantined_bytes)
        );
    }
    if status.recording.is_empty() {
        println!("Recording: (idle)");
    } else {
        for marker in &status.recording {
            println!("Recording: {}", marker);
        }
    }

    Ok(())
}

async fn recover(config: &Config) -> Result<()> {
    let layout = Layout::from_config(config);
    let _lock = acquire_lock(&layout)?;
    let store = open_store(config, &layout).await?;

    let report = RecoveryScan::new(&layout.home, &store)
        .with_min_viable_bytes(config.segments.min_viable_bytes)
        .run()
        .await?;

    if report.is_noop() {
        eprintln!("Nothing to recover");
    } else {
        eprintln!(
            "Recovered {} segment(s), discarded {}, cleared {} marker(s)",
            report.recovered, report.discarded, report.markers_cleared
        );
    }

    Ok(())
}

async fn enforce(config: &Config) -> Result<()> {
    let layout = Layout::from_config(config);
    let _lock = acquire_lock(&layout)?;
    let store = open_store(config, &layout).await?;

    let guard = storage_guard(config, &layout);
    let report = guard.enforce(&store).await?;

    eprintln!(
        "Spool: {:.1} MB -> {:.1} MB (budget {:.1} MB), evicted {} file(s)",
        mb(report.size_before),
        mb(report.size_after),
        mb(guard.budget()),
        report.evicted.len()
    );
    for name in &report.evicted {
        eprintln!("  - {}", name);
    }

    Ok(())
}

async fn flush(config: &Config) -> Result<()> {
    let Some(ref target) = config.cloud.target else {
        anyhow::bail!("No cloud target configured; nothing to flush");
    };

    let layout = Layout::from_config(config);
    let _lock = acquire_lock(&layout)?;
    let store = open_store(config, &layout).await?;
    let collaborators = Collaborators::system(config, &layout);

    let monitor = ConnectivityMonitor::from_config(
        config,
        collaborators.probe.clone(),
        collaborators.transfer.clone(),
    );
    let shutdown = ShutdownCoordinator::new(&layout.home, store.clone(), config.grace_period());
    let cancel = shutdown.token();

    let uploader = Uploader::new(
        store,
        Arc::new(monitor),
        collaborators.transfer,
        target.clone(),
        config.upload_policy(),
    )
    .with_quarantine_dir(layout.failed.clone())
    .with_cancellation(cancel.clone());

    let pass = uploader.process_batch();
    tokio::pin!(pass);

    let report = tokio::select! {
        report = &mut pass => report?,
        signal = ShutdownCoordinator::wait_for_signal() => {
            tracing::info!("Received {}, stopping after current transfers", signal);
            cancel.cancel();
            pass.await?
        }
    };

    if !report.reachable {
        eprintln!("Remote unreachable; {} file(s) stay queued", report.backlog);
        return Ok(());
    }

    eprintln!(
        "Uploaded {}/{} ({} exhausted, {} quarantined, {} skipped, {} cancelled); {} network, {} worker(s)",
        report.uploaded,
        report.selected,
        report.exhausted,
        report.quarantined,
        report.skipped,
        report.cancelled,
        report.class.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()),
        report.workers
    );

    Ok(())
}

async fn check(config: &Config) -> Result<()> {
    let layout = Layout::from_config(config);
    let collaborators = Collaborators::system(config, &layout);
    let monitor =
        ConnectivityMonitor::from_config(config, collaborators.probe, collaborators.transfer);

    let Some(target) = monitor.target() else {
        eprintln!("No cloud target configured; segments stay in {}", layout.pending.display());
        return Ok(());
    };

    if !monitor.check_reachable().await {
        eprintln!("Unreachable: {}", target);
        std::process::exit(1);
    }

    let class = monitor.classify_speed().await;
    let policy = config.upload_policy();
    let retry = policy.retry_for(class);
    eprintln!("Reachable: {}", target);
    eprintln!(
        "Network:   {} ({} attempt(s), {}s apart, {} worker(s))",
        class,
        retry.max_attempts,
        retry.retry_delay_secs,
        policy.workers_for(class)
    );

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config(config: &Config) -> Result<()> {
    let layout = Layout::from_config(config);

    println!(
        "# Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("# Spool:       {}", layout.pending.display());
    println!("# Log file:    {}", layout.log_file().display());
    print!(
        "{}",
        serde_yaml::to_string(config).context("Failed to serialize config")?
    );

    Ok(())
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
