use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// Arguments forwarded to a task handler.
pub type TaskArgs = serde_json::Map<String, serde_json::Value>;

/// Opaque task identifier (UUID v4 string). Doubles as the task record's cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Envelope is on the queue, no worker has picked it up.
    Queued,
    /// A worker popped the envelope and is executing the handler.
    Running,
    Completed,
    Failed,
    /// Withdrawn before a worker started it.
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// One entry of a task's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Wire record pushed onto the work queue. Consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    pub id: TaskId,
    pub func: String,
    #[serde(default)]
    pub args: TaskArgs,
}

/// Persisted task record, stored as JSON under its [`TaskId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub function: String,
    #[serde(default)]
    pub args: TaskArgs,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<TaskLog>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Renewed by the worker on every log append while running.
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn queued(id: TaskId, function: &str, args: TaskArgs, now: DateTime<Utc>) -> Self {
        Self {
            id,
            function: function.to_string(),
            args,
            status: TaskStatus::Queued,
            result: None,
            error: None,
            logs: Vec::new(),
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
            lease_expires_at: None,
        }
    }

    /// `queued → running`. `started_at` is only ever written once.
    pub fn start(&mut self, now: DateTime<Utc>, lease: Duration) -> Result<()> {
        self.check(TaskStatus::Running, self.status == TaskStatus::Queued)?;
        self.status = TaskStatus::Running;
        self.started_at.get_or_insert(now);
        self.lease_expires_at = Some(now + lease);
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> Result<()> {
        self.check(TaskStatus::Completed, self.status == TaskStatus::Running)?;
        self.result = Some(result);
        self.finish(TaskStatus::Completed, now);
        Ok(())
    }

    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.check(TaskStatus::Failed, self.status == TaskStatus::Running)?;
        self.error = Some(error.to_string());
        self.finish(TaskStatus::Failed, now);
        Ok(())
    }

    /// `queued → cancelled`. A running task belongs to its worker.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.check(TaskStatus::Cancelled, self.status == TaskStatus::Queued)?;
        self.finish(TaskStatus::Cancelled, now);
        Ok(())
    }

    pub fn append_log(
        &mut self,
        level: LogLevel,
        message: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) {
        self.logs.push(TaskLog {
            timestamp: now,
            level,
            message: message.to_string(),
        });
        if self.status == TaskStatus::Running {
            self.lease_expires_at = Some(now + lease);
        }
        self.updated_at = now;
    }

    /// A running task whose worker stopped renewing its lease.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running
            && self.lease_expires_at.is_some_and(|expiry| expiry < now)
    }

    fn finish(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.ended_at.get_or_insert(now);
        self.lease_expires_at = None;
        self.updated_at = now;
    }

    fn check(&self, to: TaskStatus, allowed: bool) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition {
                id: self.id.to_string(),
                from: self.status,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::queued(TaskId::new(), "refill", TaskArgs::new(), Utc::now())
    }

    #[test]
    fn started_at_set_once() {
        let mut t = task();
        let first = Utc::now();
        t.start(first, Duration::seconds(60)).unwrap();
        assert_eq!(t.started_at, Some(first));
        // a second start is rejected and leaves the timestamp alone
        assert!(t.start(first + Duration::seconds(5), Duration::seconds(60)).is_err());
        assert_eq!(t.started_at, Some(first));
    }

    #[test]
    fn exactly_one_terminal_state() {
        let mut t = task();
        let now = Utc::now();
        t.start(now, Duration::seconds(60)).unwrap();
        t.complete(serde_json::json!({"rows": 3}), now).unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert!(t.fail("late failure", now).is_err());
        assert!(t.cancel(now).is_err());
        assert!(t.error.is_none());
        assert_eq!(t.ended_at, Some(now));
    }

    #[test]
    fn cannot_complete_without_running() {
        let mut t = task();
        let err = t.complete(serde_json::Value::Null, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: TaskStatus::Queued,
                to: TaskStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn queued_task_can_be_cancelled() {
        let mut t = task();
        t.cancel(Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert!(t.started_at.is_none());
        assert!(t.ended_at.is_some());
    }

    #[test]
    fn running_task_cannot_be_cancelled() {
        let mut t = task();
        let now = Utc::now();
        t.start(now, Duration::seconds(60)).unwrap();
        let err = t.cancel(now).unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: TaskStatus::Running,
                to: TaskStatus::Cancelled,
                ..
            }
        ));
        assert_eq!(t.status, TaskStatus::Running);
        assert!(t.ended_at.is_none());
    }

    #[test]
    fn lease_expiry_marks_stale() {
        let mut t = task();
        let now = Utc::now();
        t.start(now, Duration::seconds(30)).unwrap();
        assert!(!t.is_stale(now + Duration::seconds(10)));
        assert!(t.is_stale(now + Duration::seconds(31)));

        t.append_log(LogLevel::Info, "still going", now + Duration::seconds(20), Duration::seconds(30));
        assert!(!t.is_stale(now + Duration::seconds(31)));
    }

    #[test]
    fn record_serialises_camel_case() {
        let t = task();
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains(r#""status":"queued""#));
        assert!(json.contains(r#""createdAt""#));
        assert!(!json.contains(r#""result""#));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in ["queued", "running", "completed", "failed", "cancelled"] {
            let status: TaskStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("paused".parse::<TaskStatus>().is_err());
    }
}
