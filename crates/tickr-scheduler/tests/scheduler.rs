// Scheduler behaviour driven with explicit instants.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use tickr_core::config::SchedulerConfig;
use tickr_core::TimeOfDay;
use tickr_queue::{SqliteCache, TaskArgs, TaskQueue};
use tickr_scheduler::{
    Boundary, BoundaryState, Job, JobContext, JobHandler, JobOutput, JobRegistry, Scheduler,
    SchedulerError, Trigger,
};

#[derive(Default)]
struct Counter {
    calls: AtomicUsize,
    triggers: std::sync::Mutex<Vec<Trigger>>,
}

#[async_trait]
impl JobHandler for Counter {
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<JobOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.triggers.lock().unwrap().push(ctx.trigger);
        Ok(JobOutput::summary("counted"))
    }
}

struct Failing;

#[async_trait]
impl JobHandler for Failing {
    async fn run(&self, _ctx: &JobContext) -> anyhow::Result<JobOutput> {
        anyhow::bail!("upstream unavailable")
    }
}

struct Enqueuer;

#[async_trait]
impl JobHandler for Enqueuer {
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<JobOutput> {
        let id = ctx.queue.enqueue("refillTrainerQueue", TaskArgs::new()).await?;
        Ok(JobOutput::enqueued(vec![id]))
    }
}

fn open() -> TimeOfDay {
    TimeOfDay::new(9, 30).unwrap()
}

fn close() -> TimeOfDay {
    TimeOfDay::new(16, 0).unwrap()
}

fn queue() -> TaskQueue {
    TaskQueue::new(Arc::new(SqliteCache::open_in_memory().unwrap()))
}

/// Wall-clock instant in New York, converted to UTC.
fn ny(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    New_York
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

#[tokio::test]
async fn boundary_jobs_fire_once_per_day() {
    let open_counter = Arc::new(Counter::default());
    let close_counter = Arc::new(Counter::default());
    let mut registry = JobRegistry::new();
    registry.register(Job::new("at_open", open_counter.clone()).at(open())).unwrap();
    registry.register(Job::new("at_close", close_counter.clone()).at(close())).unwrap();
    let scheduler = Scheduler::new(registry, &SchedulerConfig::default(), queue()).unwrap();

    // Monday 2024-06-10, one tick every 15 minutes
    for quarter in 0..96 {
        scheduler.tick_at(ny(2024, 6, 10, quarter / 4, (quarter % 4) * 15)).await;
    }
    assert_eq!(open_counter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(close_counter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        open_counter.triggers.lock().unwrap().as_slice(),
        &[Trigger::Boundary(Boundary::Open)]
    );
    assert!(matches!(scheduler.boundary_state(Boundary::Close), BoundaryState::Fired(_)));
    assert_eq!(scheduler.boundary_state(Boundary::Open), BoundaryState::Pending);
}

#[tokio::test]
async fn weekend_flag_suppresses_job_but_not_boundary() {
    let weekday_only = Arc::new(Counter::default());
    let every_day = Arc::new(Counter::default());
    let mut registry = JobRegistry::new();
    registry
        .register(Job::new("weekday_only", weekday_only.clone()).at(open()).skip_weekends())
        .unwrap();
    registry.register(Job::new("every_day", every_day.clone()).at(open())).unwrap();
    let scheduler = Scheduler::new(registry, &SchedulerConfig::default(), queue()).unwrap();

    // Saturday 2024-06-08
    assert_eq!(scheduler.tick_at(ny(2024, 6, 8, 10, 0)).await, Some(Boundary::Open));
    assert_eq!(weekday_only.calls.load(Ordering::SeqCst), 0);
    assert_eq!(every_day.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_job_records_run_but_not_completion() {
    let mut registry = JobRegistry::new();
    registry.register(Job::new("flaky", Arc::new(Failing)).at(close())).unwrap();
    let scheduler = Scheduler::new(registry, &SchedulerConfig::default(), queue()).unwrap();

    assert_eq!(scheduler.tick_at(ny(2024, 6, 10, 16, 1)).await, Some(Boundary::Close));
    assert!(scheduler.status().last_run("flaky").await.unwrap().is_some());
    assert!(scheduler.status().last_completion("flaky").await.unwrap().is_none());

    let err = scheduler.run_job("flaky").await.unwrap_err();
    assert!(matches!(err, SchedulerError::JobFailed { ref name, .. } if name == "flaky"));
    assert!(err.to_string().contains("upstream unavailable"));
}

#[tokio::test]
async fn init_jobs_run_once_even_with_concurrent_callers() {
    let counter = Arc::new(Counter::default());
    let mut registry = JobRegistry::new();
    registry.register(Job::new("startup", counter.clone()).run_on_init()).unwrap();
    registry.register(Job::new("not_startup", Arc::new(Counter::default()))).unwrap();
    let scheduler = Arc::new(Scheduler::new(registry, &SchedulerConfig::default(), queue()).unwrap());

    let a = tokio::spawn({
        let s = scheduler.clone();
        async move { s.initialize().await }
    });
    let b = tokio::spawn({
        let s = scheduler.clone();
        async move { s.initialize().await }
    });
    let total = a.await.unwrap() + b.await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(counter.triggers.lock().unwrap().as_slice(), &[Trigger::Init]);
}

#[tokio::test]
async fn manual_run_returns_enqueued_tasks_and_records_completion() {
    let mut registry = JobRegistry::new();
    registry.register(Job::new("enqueuer", Arc::new(Enqueuer))).unwrap();
    let q = queue();
    let scheduler = Scheduler::new(registry, &SchedulerConfig::default(), q.clone()).unwrap();

    let output = scheduler.run_job("enqueuer").await.unwrap();
    assert_eq!(output.tasks.len(), 1);
    assert!(q.poll(&output.tasks[0]).await.is_ok());
    assert!(scheduler.status().last_completion("enqueuer").await.unwrap().is_some());

    assert!(matches!(
        scheduler.run_job("missing").await,
        Err(SchedulerError::JobNotFound { .. })
    ));
}

#[tokio::test]
async fn schedule_off_boundary_is_config_error() {
    let mut registry = JobRegistry::new();
    registry
        .register(Job::new("noon", Arc::new(Counter::default())).at(TimeOfDay::new(12, 0).unwrap()))
        .unwrap();
    let err = Scheduler::new(registry, &SchedulerConfig::default(), queue()).err().unwrap();
    assert!(matches!(err, SchedulerError::Config(_)));
}

#[tokio::test]
async fn unknown_timezone_is_config_error() {
    let config = SchedulerConfig {
        timezone: "Nowhere/Special".to_string(),
        ..SchedulerConfig::default()
    };
    let err = Scheduler::new(JobRegistry::new(), &config, queue()).err().unwrap();
    assert!(matches!(err, SchedulerError::Config(_)));
}

#[tokio::test]
async fn run_loop_stops_on_shutdown_signal() {
    let counter = Arc::new(Counter::default());
    let mut registry = JobRegistry::new();
    registry.register(Job::new("startup", counter.clone()).run_on_init()).unwrap();
    let scheduler = Arc::new(Scheduler::new(registry, &SchedulerConfig::default(), queue()).unwrap());

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn({
        let s = scheduler.clone();
        async move { s.run(rx).await }
    });
    while counter.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    tx.send(true).unwrap();
    handle.await.unwrap();
}
