use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tickr_queue::{TaskId, TaskQueue};

/// One of the two daily trigger points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    Open,
    Close,
}

impl Boundary {
    pub fn other(self) -> Boundary {
        match self {
            Boundary::Open => Boundary::Close,
            Boundary::Close => Boundary::Open,
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Boundary::Open => "open",
            Boundary::Close => "close",
        };
        write!(f, "{s}")
    }
}

/// Per-boundary state within the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "date", rename_all = "snake_case")]
pub enum BoundaryState {
    /// Armed: fires the next time its window is observed.
    Pending,
    /// Already dispatched on this exchange date.
    Fired(NaiveDate),
}

/// Why a job is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Scheduler start-up, for jobs flagged `run_on_init`.
    Init,
    Boundary(Boundary),
    /// Operator request (`jobctl run`).
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Init => write!(f, "init"),
            Trigger::Boundary(b) => write!(f, "{b}"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Everything a job gets when invoked.
#[derive(Clone)]
pub struct JobContext {
    /// Where to hand off long-running work.
    pub queue: TaskQueue,
    pub trigger: Trigger,
    /// Invocation time in the scheduler's time zone.
    pub now: DateTime<Tz>,
}

impl JobContext {
    /// Exchange calendar date of this invocation.
    pub fn date(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

/// What a job hands back: any tasks it enqueued plus a one-line summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub tasks: Vec<TaskId>,
    pub summary: Option<String>,
}

impl JobOutput {
    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            tasks: Vec::new(),
            summary: Some(text.into()),
        }
    }

    pub fn enqueued(tasks: Vec<TaskId>) -> Self {
        Self {
            tasks,
            summary: None,
        }
    }
}

/// The callable behind a registered job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<JobOutput>;
}
