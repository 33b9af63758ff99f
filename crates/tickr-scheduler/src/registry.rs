use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tickr_core::TimeOfDay;
use tracing::info;

use crate::error::{Result, SchedulerError};
use crate::types::JobHandler;

/// A registered job: its callable, when it runs, and whether it is running now.
pub struct Job {
    pub name: String,
    /// Times of day (scheduler time zone) at which the job fires.
    pub schedule: Vec<TimeOfDay>,
    pub skip_weekends: bool,
    pub run_on_init: bool,
    handler: Arc<dyn JobHandler>,
    running: AtomicBool,
}

impl Job {
    pub fn new(name: &str, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            name: name.to_string(),
            schedule: Vec::new(),
            skip_weekends: false,
            run_on_init: false,
            handler,
            running: AtomicBool::new(false),
        }
    }

    pub fn at(mut self, time: TimeOfDay) -> Self {
        self.schedule.push(time);
        self.schedule.sort_unstable();
        self.schedule.dedup();
        self
    }

    pub fn skip_weekends(mut self) -> Self {
        self.skip_weekends = true;
        self
    }

    pub fn run_on_init(mut self) -> Self {
        self.run_on_init = true;
        self
    }

    pub fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn runs_at(&self, time: TimeOfDay) -> bool {
        self.schedule.contains(&time)
    }

    /// Claim the re-entrancy guard. The flag is released when the returned
    /// guard is dropped.
    pub(crate) fn begin(&self) -> Result<RunGuard<'_>> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyRunning {
                name: self.name.clone(),
            });
        }
        Ok(RunGuard { job: self })
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("skip_weekends", &self.skip_weekends)
            .field("run_on_init", &self.run_on_init)
            .field("running", &self.is_running())
            .finish()
    }
}

pub(crate) struct RunGuard<'a> {
    job: &'a Job,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.job.running.store(false, Ordering::Release);
    }
}

/// Name → job table. Lives as long as the process; there is no removal.
#[derive(Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job. Duplicate names fail fast instead of overwriting.
    pub fn register(&mut self, job: Job) -> Result<()> {
        if self.jobs.contains_key(&job.name) {
            return Err(SchedulerError::DuplicateJob { name: job.name });
        }
        info!(
            job = %job.name,
            schedule = ?job.schedule.iter().map(ToString::to_string).collect::<Vec<_>>(),
            skip_weekends = job.skip_weekends,
            run_on_init = job.run_on_init,
            "job registered"
        );
        self.jobs.insert(job.name.clone(), Arc::new(job));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs.get(name).cloned()
    }

    /// All jobs, sorted by name.
    pub fn list(&self) -> Vec<Arc<Job>> {
        self.jobs.values().cloned().collect()
    }

    /// Jobs whose schedule contains `time`, sorted by name.
    pub fn scheduled_at(&self, time: TimeOfDay) -> Vec<Arc<Job>> {
        self.jobs
            .values()
            .filter(|job| job.runs_at(time))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobContext, JobOutput};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn run(&self, _ctx: &JobContext) -> anyhow::Result<JobOutput> {
            Ok(JobOutput::default())
        }
    }

    fn t(h: u8, m: u8) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = JobRegistry::new();
        registry.register(Job::new("a", Arc::new(Noop))).unwrap();
        let err = registry.register(Job::new("a", Arc::new(Noop))).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob { ref name } if name == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn list_is_name_sorted() {
        let mut registry = JobRegistry::new();
        for name in ["update_securities", "backfill", "simple_update_securities"] {
            registry.register(Job::new(name, Arc::new(Noop))).unwrap();
        }
        let names: Vec<String> = registry.list().iter().map(|j| j.name.clone()).collect();
        assert_eq!(names, vec!["backfill", "simple_update_securities", "update_securities"]);
    }

    #[test]
    fn scheduled_at_filters_by_time() {
        let mut registry = JobRegistry::new();
        registry.register(Job::new("open_job", Arc::new(Noop)).at(t(9, 30))).unwrap();
        registry
            .register(Job::new("both", Arc::new(Noop)).at(t(16, 0)).at(t(9, 30)))
            .unwrap();
        let at_open: Vec<String> = registry.scheduled_at(t(9, 30)).iter().map(|j| j.name.clone()).collect();
        assert_eq!(at_open, vec!["both", "open_job"]);
        assert_eq!(registry.scheduled_at(t(16, 0)).len(), 1);
        assert_eq!(registry.get("both").unwrap().schedule, vec![t(9, 30), t(16, 0)]);
    }

    #[test]
    fn run_guard_blocks_reentry_until_dropped() {
        let job = Job::new("guarded", Arc::new(Noop));
        let guard = job.begin().unwrap();
        assert!(job.is_running());
        assert!(matches!(job.begin(), Err(SchedulerError::AlreadyRunning { .. })));
        drop(guard);
        assert!(!job.is_running());
        assert!(job.begin().is_ok());
    }
}
