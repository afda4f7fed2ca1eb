//! # Scan Scheduler
//!
//! Fires sweeps on a recurring [`Cadence`].
//!
//! A single timer loop wakes once per second ([`TICK`]) and only *dispatches*: every due
//! job gets its own task, and the sweep itself runs in a further task so that a panic
//! or a [`DiscoveryError::PoolFatal`] is contained to that job. A job still running
//! when it comes due again is skipped for that slot.
//!
//! [`ScanScheduler::stop`] ends the timer loop only; sweeps already running finish and
//! report as usual. [`ScanScheduler::wait_idle`] waits for them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, Span, info_span};

use vortex_common::config::SweepOptions;
use vortex_common::error::DiscoveryError;
use vortex_common::network::address_space::AddressSpace;
use vortex_common::network::sweep::{SweepResult, SweepSummary};
use vortex_common::{debug, error, info, success, warn};

use crate::discovery::DiscoveryCoordinator;

mod cadence;

pub use cadence::Cadence;

/// Polling granularity of the timer loop.
pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("a job named '{0}' already exists")]
    DuplicateJobId(String),

    #[error("no job named '{0}'")]
    UnknownJobId(String),

    #[error("invalid cadence '{spec}': {reason}")]
    InvalidCadence { spec: String, reason: String },

    /// The target or the sweep options were rejected.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

impl SchedulerError {
    pub fn invalid_cadence(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCadence {
            spec: spec.into(),
            reason: reason.into(),
        }
    }
}

/// How the most recent firing of a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(SweepSummary),
    Failed(String),
}

/// Snapshot of a job, as returned by [`ScanScheduler::list_jobs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: String,
    pub cadence: Cadence,
    /// Normalized CIDR of the swept block.
    pub target: String,
    pub enabled: bool,
    pub running: bool,
    pub runs: u64,
    pub last_run: Option<DateTime<Local>>,
    pub next_run: Option<DateTime<Local>>,
    pub last_result_summary: Option<JobOutcome>,
}

/// Delivered to the report sink after every firing.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub started_at: DateTime<Local>,
    pub outcome: Result<SweepResult, String>,
}

/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub cadence: Option<Cadence>,
    pub enabled: Option<bool>,
}

struct JobSlot {
    /// Distinguishes a re-added job from the one it replaced.
    generation: u64,
    meta: ScheduledJob,
    space: Arc<AddressSpace>,
    options: Arc<SweepOptions>,
}

struct Ticker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    coordinator: Arc<DiscoveryCoordinator>,
    defaults: SweepOptions,
    jobs: Mutex<HashMap<String, JobSlot>>,
    reports: Mutex<Option<mpsc::UnboundedSender<JobReport>>>,
    ticker: Mutex<Option<Ticker>>,
    slots: AtomicU64,
    /// Runs launched but not yet finished.
    active: watch::Sender<usize>,
}

/// Cheap to clone; clones drive the same set of jobs.
#[derive(Clone)]
pub struct ScanScheduler {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScanScheduler {
    /// `defaults` apply to every job added without its own options.
    pub fn new(coordinator: Arc<DiscoveryCoordinator>, defaults: SweepOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                coordinator,
                defaults,
                jobs: Mutex::new(HashMap::new()),
                reports: Mutex::new(None),
                ticker: Mutex::new(None),
                slots: AtomicU64::new(0),
                active: watch::channel(0).0,
            }),
        }
    }

    /// Routes every subsequent [`JobReport`] to the returned receiver, replacing any previous one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<JobReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.inner.reports) = Some(tx);
        rx
    }

    pub fn add_job(
        &self,
        id: impl Into<String>,
        cadence: Cadence,
        target: &str,
    ) -> Result<ScheduledJob, SchedulerError> {
        let options = self.inner.defaults.clone();
        self.add_job_with_options(id, cadence, target, options)
    }

    pub fn add_job_with_options(
        &self,
        id: impl Into<String>,
        cadence: Cadence,
        target: &str,
        options: SweepOptions,
    ) -> Result<ScheduledJob, SchedulerError> {
        let id = id.into();
        cadence.validate()?;
        options.validate()?;
        let space = AddressSpace::from_cidr(target)?;

        let mut jobs = lock(&self.inner.jobs);
        if jobs.contains_key(&id) {
            return Err(SchedulerError::DuplicateJobId(id));
        }

        let meta = ScheduledJob {
            id: id.clone(),
            cadence,
            target: space.to_string(),
            enabled: true,
            running: false,
            runs: 0,
            last_run: None,
            next_run: cadence.next_after(&Local::now()),
            last_result_summary: None,
        };
        info!(job = %id, "scheduled {} on {}", meta.target, meta.cadence);

        jobs.insert(
            id,
            JobSlot {
                generation: self.inner.slots.fetch_add(1, Ordering::Relaxed) + 1,
                meta: meta.clone(),
                space: Arc::new(space),
                options: Arc::new(options),
            },
        );
        Ok(meta)
    }

    /// Drops the job from future firings. A run already in progress completes.
    pub fn remove_job(&self, id: &str) -> Result<ScheduledJob, SchedulerError> {
        let slot = lock(&self.inner.jobs)
            .remove(id)
            .ok_or_else(|| SchedulerError::UnknownJobId(id.to_string()))?;
        info!(job = %id, "removed");
        Ok(slot.meta)
    }

    pub fn update_job(&self, id: &str, update: JobUpdate) -> Result<ScheduledJob, SchedulerError> {
        if let Some(cadence) = &update.cadence {
            cadence.validate()?;
        }

        let mut jobs = lock(&self.inner.jobs);
        let slot = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::UnknownJobId(id.to_string()))?;

        if let Some(cadence) = update.cadence {
            slot.meta.cadence = cadence;
            slot.meta.next_run = cadence.next_after(&Local::now());
        }
        if let Some(enabled) = update.enabled {
            // Slots missed while disabled are not made up.
            if enabled && !slot.meta.enabled {
                slot.meta.next_run = slot.meta.cadence.next_after(&Local::now());
            }
            slot.meta.enabled = enabled;
        }
        debug!(job = %id, "updated: {} enabled={}", slot.meta.cadence, slot.meta.enabled);
        Ok(slot.meta.clone())
    }

    /// Copies of every job's metadata, ordered by id.
    pub fn list_jobs(&self) -> Vec<ScheduledJob> {
        let mut snapshot: Vec<ScheduledJob> = lock(&self.inner.jobs)
            .values()
            .map(|slot| slot.meta.clone())
            .collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    /// Spawns the timer loop. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut ticker = lock(&self.inner.ticker);
        if ticker.is_some() {
            debug!("scheduler already running");
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = tick.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        ScanScheduler { inner }.dispatch_due(Local::now());
                    }
                }
            }
            debug!("scheduler loop stopped");
        });

        info!("scheduler started");
        *ticker = Some(Ticker { stop, handle });
    }

    /// Stops future firings and waits for the timer loop to exit.
    pub async fn stop(&self) {
        let ticker = lock(&self.inner.ticker).take();
        let Some(ticker) = ticker else {
            return;
        };
        let _ = ticker.stop.send(true);
        if let Err(e) = ticker.handle.await {
            warn!("scheduler loop ended abnormally: {e}");
        }
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.ticker).is_some()
    }

    /// Number of sweeps currently in flight.
    pub fn active_runs(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Resolves once no sweep is in flight. Their reports are delivered by then.
    pub async fn wait_idle(&self) {
        let mut active = self.inner.active.subscribe();
        let _ = active.wait_for(|running| *running == 0).await;
    }

    /// Fires every enabled job whose next run is at or before `now`.
    /// Returns the ids that were started.
    pub fn dispatch_due(&self, now: DateTime<Local>) -> Vec<String> {
        let due: Vec<(String, u64, Arc<AddressSpace>, Arc<SweepOptions>)> = {
            let mut jobs = lock(&self.inner.jobs);
            jobs.values_mut()
                .filter_map(|slot| {
                    let meta = &mut slot.meta;
                    if !meta.enabled || meta.next_run.is_none_or(|next| next > now) {
                        return None;
                    }
                    meta.next_run = meta.cadence.next_after(&now);
                    if meta.running {
                        warn!(job = %meta.id, "previous run still in progress, skipping this slot");
                        return None;
                    }
                    meta.running = true;
                    Some((
                        meta.id.clone(),
                        slot.generation,
                        Arc::clone(&slot.space),
                        Arc::clone(&slot.options),
                    ))
                })
                .collect()
        };

        due.into_iter()
            .map(|(id, generation, space, options)| {
                self.launch(id.clone(), generation, space, options, now);
                id
            })
            .collect()
    }

    /// Fires a job immediately, outside its cadence.
    ///
    /// `Ok(None)` when the job is already running.
    pub fn run_now(&self, id: &str) -> Result<Option<JoinHandle<()>>, SchedulerError> {
        let (generation, space, options) = {
            let mut jobs = lock(&self.inner.jobs);
            let slot = jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::UnknownJobId(id.to_string()))?;
            if slot.meta.running {
                return Ok(None);
            }
            slot.meta.running = true;
            (slot.generation, Arc::clone(&slot.space), Arc::clone(&slot.options))
        };
        Ok(Some(self.launch(id.to_string(), generation, space, options, Local::now())))
    }

    fn launch(
        &self,
        id: String,
        generation: u64,
        space: Arc<AddressSpace>,
        options: Arc<SweepOptions>,
        started_at: DateTime<Local>,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let span = info_span!("job", id = %id);
        inner.active.send_modify(|running| *running += 1);

        tokio::spawn(
            async move {
                info!("sweeping {space}");
                let coordinator = Arc::clone(&inner.coordinator);
                let sweep = tokio::spawn(
                    async move { coordinator.run_sweep(&space, &options).await }
                        .instrument(Span::current()),
                );

                let outcome = match sweep.await {
                    Ok(Ok(result)) => {
                        success!(
                            "{} alive, {} open ports",
                            result.summary.alive,
                            result.summary.open_ports
                        );
                        Ok(result)
                    }
                    Ok(Err(e)) => {
                        error!("sweep failed: {e}");
                        Err(e.to_string())
                    }
                    Err(e) => {
                        error!("sweep task crashed: {e}");
                        Err(e.to_string())
                    }
                };

                inner.finish(&id, generation, started_at, outcome);
            }
            .instrument(span),
        )
    }
}

impl Inner {
    fn finish(
        &self,
        id: &str,
        generation: u64,
        started_at: DateTime<Local>,
        outcome: Result<SweepResult, String>,
    ) {
        match lock(&self.jobs).get_mut(id) {
            Some(slot) if slot.generation == generation => slot.record(started_at, &outcome),
            Some(_) => debug!("job was replaced while running, result not recorded"),
            None => debug!("job was removed while running"),
        }

        let report = JobReport {
            job_id: id.to_string(),
            started_at,
            outcome,
        };
        let mut sink = lock(&self.reports);
        let delivered = match sink.as_ref() {
            Some(tx) => tx.send(report).is_ok(),
            None => true,
        };
        if !delivered {
            debug!("report receiver dropped");
            *sink = None;
        }
        drop(sink);

        self.active.send_modify(|running| *running = running.saturating_sub(1));
    }
}

impl JobSlot {
    fn record(&mut self, started_at: DateTime<Local>, outcome: &Result<SweepResult, String>) {
        self.meta.running = false;
        self.meta.runs += 1;
        self.meta.last_run = Some(started_at);
        self.meta.last_result_summary = Some(match outcome {
            Ok(result) => JobOutcome::Completed(result.summary.clone()),
            Err(message) => JobOutcome::Failed(message.clone()),
        });
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
