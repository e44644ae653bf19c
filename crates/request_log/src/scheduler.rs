use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::error::IngestError;
use crate::run::{IngestionRun, RunSummary};
use crate::schedule::{next_fire, ScheduleError, ScheduleSettings, ScheduleSpec, SCHEDULE_SETTINGS};

/// The unit of work a [`Scheduler`] fires. Runs on the blocking thread pool.
pub trait IngestJob: Send + Sync + 'static {
    fn run_once(&self) -> Result<RunSummary, IngestError>;
}

impl IngestJob for IngestionRun {
    fn run_once(&self) -> Result<RunSummary, IngestError> {
        self.run()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SchedulerStats {
    pub runs_completed: u64,
    /// Runs that returned an error, panicked, or hit the watchdog timeout.
    pub runs_failed: u64,
    /// Firings dropped because the previous run had not finished.
    pub firings_skipped: u64,
    pub last_summary: Option<RunSummary>,
}

struct Worker {
    spec: ScheduleSpec,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// State shared by every worker task this scheduler spawns.
#[derive(Clone)]
struct FiringContext {
    job: Arc<dyn IngestJob>,
    run_gate: Arc<tokio::sync::Mutex<()>>,
    stats: Arc<Mutex<SchedulerStats>>,
    run_timeout: Option<Duration>,
}

/// Background loop that fires an [`IngestJob`] on a [`ScheduleSpec`] cadence.
///
/// At most one job runs at a time. Each worker awaits its own run before waiting for the next
/// firing, and a run gate shared across restarts makes a firing skip when a run started by an
/// earlier worker is still in flight. Stopping only cancels future firings.
///
/// `start`, `reconfigure` and `apply_settings` spawn tasks and must be called inside a tokio
/// runtime.
pub struct Scheduler {
    ctx: FiringContext,
    worker: Option<Worker>,
    retired: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn IngestJob>) -> Self {
        Self {
            ctx: FiringContext {
                job,
                run_gate: Arc::new(tokio::sync::Mutex::new(())),
                stats: Arc::new(Mutex::new(SchedulerStats::default())),
                run_timeout: None,
            },
            worker: None,
            retired: Vec::new(),
        }
    }

    /// Abandon runs that take longer than `limit`. The loop keeps going; the abandoned run keeps
    /// the gate until it really returns.
    pub fn with_run_timeout(mut self, limit: Duration) -> Self {
        self.ctx.run_timeout = Some(limit);
        self
    }

    pub fn state(&self) -> SchedulerState {
        if self.worker.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub fn spec(&self) -> Option<ScheduleSpec> {
        self.worker.as_ref().map(|worker| worker.spec)
    }

    pub fn stats(&self) -> SchedulerStats {
        lock(&self.ctx.stats).clone()
    }

    /// Installs `spec` and begins the wait/fire cycle. Starting a running scheduler replaces its
    /// cadence, as [`Scheduler::reconfigure`] does.
    pub fn start(&mut self, spec: ScheduleSpec) {
        if self.worker.is_some() {
            debug!("scheduler already running; restarting with the new cadence");
            self.stop();
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let span = info_span!("scheduler", cadence = %spec);
        let handle = tokio::spawn(drive(self.ctx.clone(), spec, stop_rx).instrument(span));
        info!(cadence = %spec, "log ingestion scheduler started");
        self.worker = Some(Worker {
            spec,
            stop_tx,
            handle,
        });
    }

    /// Cancels future firings. A run already in flight finishes and is recorded.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.stop_tx.send(true);
        self.retired.retain(|handle| !handle.is_finished());
        self.retired.push(worker.handle);
        info!(cadence = %worker.spec, "log ingestion scheduler stopped");
    }

    /// Replaces the cadence. The old timer is torn down and a fresh one installed; an in-flight
    /// run is unaffected and the new cadence applies from the next firing.
    pub fn reconfigure(&mut self, spec: ScheduleSpec) {
        self.stop();
        self.start(spec);
    }

    /// Brings the scheduler in line with `settings`: stopped when disabled, restarted otherwise.
    /// Invalid settings also stop it, so no schedule is installed until they are fixed.
    pub fn apply_settings(&mut self, settings: &ScheduleSettings) -> Result<(), ScheduleError> {
        match ScheduleSpec::from_settings(settings) {
            Ok(Some(spec)) => {
                self.reconfigure(spec);
                Ok(())
            }
            Ok(None) => {
                if self.worker.is_some() {
                    info!("log ingestion disabled");
                }
                self.stop();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "invalid schedule settings; no schedule installed");
                self.stop();
                Err(err)
            }
        }
    }

    /// Reacts to a change notification for the setting `name`. Returns whether the setting is
    /// schedule-affecting; other settings are ignored.
    pub fn on_setting_changed(&mut self, name: &str, settings: &ScheduleSettings) -> bool {
        if !SCHEDULE_SETTINGS.contains(&name) {
            debug!(setting = name, "ignoring change to a setting that does not affect the schedule");
            return false;
        }
        info!(setting = name, "schedule setting changed; reconfiguring");
        // Errors are logged by apply_settings.
        let _ = self.apply_settings(settings);
        true
    }

    /// Stops the scheduler and waits for every worker, including any run still in flight, to
    /// finish. Returns the final counters.
    pub async fn shutdown(mut self) -> SchedulerStats {
        self.stop();
        for handle in self.retired.drain(..) {
            if let Err(err) = handle.await {
                error!(error = %err, "scheduler worker ended abnormally");
            }
        }
        self.stats()
    }
}

fn lock(stats: &Mutex<SchedulerStats>) -> MutexGuard<'_, SchedulerStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn drive(ctx: FiringContext, spec: ScheduleSpec, mut stop_rx: watch::Receiver<bool>) {
    loop {
        let now = Utc::now();
        let due = next_fire(&spec, now);
        let wait = (due - now).to_std().unwrap_or_default();
        debug!(due = %due, "waiting for next firing");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            // A stop signal or a dropped scheduler both end the loop.
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }
        ctx.fire().await;
    }
    debug!("scheduler worker exiting");
}

impl FiringContext {
    async fn fire(&self) {
        let permit = match Arc::clone(&self.run_gate).try_lock_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("previous ingestion run still in progress; skipping this firing");
                lock(&self.stats).firings_skipped += 1;
                return;
            }
        };

        let job = Arc::clone(&self.job);
        let span = Span::current();
        let run = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            span.in_scope(|| job.run_once())
        });

        let joined = match self.run_timeout {
            None => run.await,
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(joined) => joined,
                Err(_) => {
                    error!(
                        timeout_ms = limit.as_millis() as u64,
                        "ingestion run exceeded its time limit; abandoning it"
                    );
                    lock(&self.stats).runs_failed += 1;
                    return;
                }
            },
        };

        let mut stats = lock(&self.stats);
        match joined {
            Ok(Ok(summary)) => {
                stats.runs_completed += 1;
                stats.last_summary = Some(summary);
            }
            Ok(Err(err)) => {
                error!(error = %err, "ingestion run failed");
                stats.runs_failed += 1;
            }
            Err(err) => {
                error!(error = %err, "ingestion run panicked");
                stats.runs_failed += 1;
            }
        }
    }
}
