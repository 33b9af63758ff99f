use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tickr_core::config::SchedulerConfig;
use tickr_core::types::is_weekend;
use tickr_queue::TaskQueue;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    registry::{Job, JobRegistry},
    schedule::BoundaryTracker,
    status::JobStatusStore,
    types::{Boundary, BoundaryState, JobContext, JobOutput, Trigger},
};

/// Daily boundary scheduler.
///
/// Owns its boundary state, so several independent schedulers can coexist
/// (e.g. in tests). Jobs execute inline on the task driving [`run`].
///
/// [`run`]: Scheduler::run
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    tracker: Mutex<BoundaryTracker>,
    tz: Tz,
    tick: Duration,
    queue: TaskQueue,
    status: JobStatusStore,
    /// Guards the one-time start-up sequence against concurrent callers.
    initialized: tokio::sync::Mutex<bool>,
}

impl Scheduler {
    /// Build a scheduler over `registry`.
    ///
    /// Fails when the time zone is unknown, the boundaries are inverted, or a
    /// job is scheduled at a time that is neither boundary (it could never fire).
    pub fn new(registry: JobRegistry, config: &SchedulerConfig, queue: TaskQueue) -> Result<Self> {
        let tz = config.tz()?;
        let tracker = BoundaryTracker::new(config.market_open, config.market_close)?;

        for job in registry.list() {
            if let Some(time) = job.schedule.iter().find(|t| tracker.boundary_at(**t).is_none()) {
                return Err(SchedulerError::Config(format!(
                    "job {} is scheduled at {time}, which is neither the open ({}) nor the close ({}) boundary",
                    job.name, config.market_open, config.market_close
                )));
            }
        }

        let status = JobStatusStore::new(queue.cache().clone());
        Ok(Self {
            registry: Arc::new(registry),
            tracker: Mutex::new(tracker),
            tz,
            tick: Duration::from_secs(config.tick_secs.max(1)),
            queue,
            status,
            initialized: tokio::sync::Mutex::new(false),
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn status(&self) -> &JobStatusStore {
        &self.status
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn boundary_state(&self, boundary: Boundary) -> BoundaryState {
        self.tracker
            .lock()
            .expect("boundary tracker poisoned")
            .state(boundary)
    }

    /// Main event loop: start-up jobs, then one boundary check per tick until
    /// `shutdown` broadcasts `true`. The first tick fires immediately.
    ///
    /// Stopping never interrupts a job that is already executing.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(tz = %self.tz, tick_secs = self.tick.as_secs(), "scheduler started");
        self.initialize().await;

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_at(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run every `run_on_init` job once. Later and concurrent calls are no-ops.
    /// Returns how many jobs were started.
    pub async fn initialize(&self) -> usize {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return 0;
        }
        *initialized = true;

        let now = Utc::now();
        let mut started = 0;
        for job in self.registry.list().into_iter().filter(|j| j.run_on_init) {
            started += 1;
            if let Err(e) = self.invoke(&job, Trigger::Init, now).await {
                error!(job = %job.name, "start-up job failed: {e}");
            }
        }
        info!(jobs = started, "scheduler start-up sequence complete");
        started
    }

    /// Evaluate the boundaries at `now` and dispatch the jobs of whichever
    /// boundary fires. Job failures are logged; they are retried at the job's
    /// next scheduled boundary, never immediately.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Option<Boundary> {
        let local = now.with_timezone(&self.tz);
        let (boundary, at) = {
            let mut tracker = self.tracker.lock().expect("boundary tracker poisoned");
            let boundary = tracker.evaluate(local.naive_local())?;
            (boundary, tracker.time_of(boundary))
        };

        let date = local.date_naive();
        info!(%boundary, %date, "market boundary crossed");
        for job in self.registry.scheduled_at(at) {
            if job.skip_weekends && is_weekend(date) {
                info!(job = %job.name, %date, "weekend, skipping job");
                continue;
            }
            if let Err(e) = self.invoke(&job, Trigger::Boundary(boundary), now).await {
                error!(job = %job.name, %boundary, "scheduled job failed: {e}");
            }
        }
        Some(boundary)
    }

    /// Run a job by name right now, outside its schedule.
    pub async fn run_job(&self, name: &str) -> Result<JobOutput> {
        let job = self
            .registry
            .get(name)
            .ok_or_else(|| SchedulerError::JobNotFound {
                name: name.to_string(),
            })?;
        self.invoke(&job, Trigger::Manual, Utc::now()).await
    }

    async fn invoke(&self, job: &Job, trigger: Trigger, now: DateTime<Utc>) -> Result<JobOutput> {
        let _guard = job.begin()?;

        // Status keys are for operators only; a cache hiccup must not block the job.
        if let Err(e) = self.status.record_run(&job.name, now).await {
            warn!(job = %job.name, "failed to record last run: {e}");
        }

        let ctx = JobContext {
            queue: self.queue.clone(),
            trigger,
            now: now.with_timezone(&self.tz),
        };
        info!(job = %job.name, %trigger, "running job");

        let output = job
            .handler()
            .run(&ctx)
            .await
            .map_err(|source| SchedulerError::JobFailed {
                name: job.name.clone(),
                source,
            })?;

        if let Err(e) = self.status.record_completion(&job.name, Utc::now()).await {
            warn!(job = %job.name, "failed to record completion: {e}");
        }
        info!(
            job = %job.name,
            tasks = output.tasks.len(),
            summary = output.summary.as_deref().unwrap_or(""),
            "job finished"
        );
        Ok(output)
    }
}
