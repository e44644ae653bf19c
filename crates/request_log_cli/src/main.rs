#![forbid(unsafe_code)]

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use request_log::{
    IngestError, IngestionRun, Scheduler, SchedulerState, SqliteRecordStore, StoreError,
    SCHEDULE_SETTINGS,
};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::{changed_settings, AppConfig, ConfigError};

#[derive(Debug, Parser)]
#[command(name = "request-log-ingest", version)]
#[command(about = "Ingest request log lines into a deduplicated SQLite store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest the log file once and print the run summary as JSON.
    RunOnce(ConfigArgs),
    /// Ingest on the configured schedule until interrupted, following config file changes.
    Serve(ConfigArgs),
}

#[derive(Debug, clap::Args)]
struct ConfigArgs {
    /// Path to the TOML config file.
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open record store: {0}")]
    Store(#[from] StoreError),
    #[error("ingestion run failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("failed to encode run summary: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("failed to listen for interrupt: {0}")]
    Signal(#[source] std::io::Error),
}

fn main() -> Result<(), Error> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::RunOnce(args) => run_once(args),
        Command::Serve(args) => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?
            .block_on(serve(args)),
    }
}

/// Logs go to stderr so `run-once` output on stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn ingestion_run(config: &AppConfig) -> Result<IngestionRun, Error> {
    let store = Arc::new(SqliteRecordStore::open(&config.database)?);
    Ok(IngestionRun::new(&config.log_file, store).with_config(config.ingest_config()))
}

fn run_once(args: ConfigArgs) -> Result<(), Error> {
    let config = AppConfig::load(&args.config)?;
    let summary = ingestion_run(&config)?.run()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn serve(args: ConfigArgs) -> Result<(), Error> {
    let mut config = AppConfig::load(&args.config)?;
    let job = Arc::new(ingestion_run(&config)?);

    let mut scheduler = Scheduler::new(job);
    if let Some(limit) = config.run_timeout() {
        scheduler = scheduler.with_run_timeout(limit);
    }
    // Invalid settings are logged by the scheduler; keep serving so a fixed config can be
    // picked up.
    let _ = scheduler.apply_settings(&config.schedule);
    if scheduler.state() == SchedulerState::Stopped {
        info!("log ingestion is disabled; waiting for configuration changes");
    }

    let mut poll = tokio::time::interval(config.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    poll.tick().await;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            signal = &mut interrupt => {
                signal.map_err(Error::Signal)?;
                info!("interrupt received; shutting down");
                break;
            }
            _ = poll.tick() => {
                match AppConfig::load(&args.config) {
                    Ok(next) => {
                        apply_changes(&mut scheduler, &config, &next);
                        config = next;
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to reload config; keeping the previous one");
                    }
                }
            }
        }
    }

    let stats = scheduler.shutdown().await;
    info!(
        runs_completed = stats.runs_completed,
        runs_failed = stats.runs_failed,
        firings_skipped = stats.firings_skipped,
        "scheduler stopped"
    );
    Ok(())
}

/// What a config reload did to the running process.
#[derive(Debug, Default, PartialEq, Eq)]
struct AppliedChanges {
    /// Scheduler restarts triggered by schedule settings.
    reconfigures: usize,
    /// Changed settings that only apply after a restart.
    deferred: Vec<&'static str>,
}

fn apply_changes(scheduler: &mut Scheduler, old: &AppConfig, new: &AppConfig) -> AppliedChanges {
    let mut applied = AppliedChanges::default();
    for name in changed_settings(old, new) {
        // One restart covers every schedule setting that changed together.
        if applied.reconfigures > 0 && SCHEDULE_SETTINGS.contains(&name) {
            continue;
        }
        if scheduler.on_setting_changed(name, &new.schedule) {
            applied.reconfigures += 1;
        } else {
            warn!(setting = name, "setting change takes effect after a restart");
            applied.deferred.push(name);
        }
    }
    applied
}
