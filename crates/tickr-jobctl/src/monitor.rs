use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use chrono::Utc;
use tickr_queue::{QueueError, Task, TaskId, TaskQueue, TaskStatus};
use tokio::time::Instant;

/// Where each watched task ended up when the monitor stopped.
#[derive(Debug, Default)]
pub struct MonitorReport {
    /// Tasks that reached a terminal state.
    pub finished: Vec<Task>,
    /// Running tasks whose worker lease expired.
    pub stale: Vec<Task>,
    /// IDs the task store does not know.
    pub missing: Vec<TaskId>,
    /// Still queued or running when the timeout hit.
    pub timed_out: Vec<TaskId>,
}

impl MonitorReport {
    pub fn all_completed(&self) -> bool {
        self.stale.is_empty()
            && self.missing.is_empty()
            && self.timed_out.is_empty()
            && self.finished.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// One line per task that did not complete.
    pub fn problems(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for task in &self.finished {
            if task.status != TaskStatus::Completed {
                lines.push(format!(
                    "{} {}: {}",
                    task.id,
                    task.status,
                    task.error.as_deref().unwrap_or("no error recorded")
                ));
            }
        }
        lines.extend(self.stale.iter().map(|t| format!("{} stale: worker lease expired", t.id)));
        lines.extend(self.missing.iter().map(|id| format!("{id} not found")));
        lines.extend(self.timed_out.iter().map(|id| format!("{id} incomplete at timeout")));
        lines
    }
}

/// Polls task records until they finish, printing new log lines as they appear.
///
/// The timeout is client-side only; tasks keep running after it expires.
pub struct TaskMonitor {
    queue: TaskQueue,
    poll_interval: Duration,
    timeout: Duration,
}

impl TaskMonitor {
    pub fn new(queue: TaskQueue, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            queue,
            poll_interval,
            timeout,
        }
    }

    pub async fn watch<W: Write>(&self, ids: &[TaskId], out: &mut W) -> anyhow::Result<MonitorReport> {
        let deadline = Instant::now() + self.timeout;
        let mut printed: HashMap<TaskId, usize> = HashMap::new();
        let mut pending: Vec<TaskId> = ids.to_vec();
        let mut report = MonitorReport::default();

        loop {
            let mut still_pending = Vec::new();
            for id in pending {
                let task = match self.queue.poll(&id).await {
                    Ok(task) => task,
                    Err(QueueError::NotFound { .. }) => {
                        writeln!(out, "{id}: not found")?;
                        report.missing.push(id);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                let seen = printed.entry(id.clone()).or_default();
                for log in task.logs.iter().skip(*seen) {
                    writeln!(
                        out,
                        "[{}] {:<5} {}: {}",
                        log.timestamp.format("%H:%M:%S"),
                        log.level,
                        task.function,
                        log.message
                    )?;
                }
                *seen = task.logs.len();

                if task.status.is_terminal() {
                    writeln!(out, "{id} {} {}", task.function, task.status)?;
                    report.finished.push(task);
                } else if task.is_stale(Utc::now()) {
                    writeln!(out, "{id} {} appears stuck (worker lease expired)", task.function)?;
                    report.stale.push(task);
                } else {
                    still_pending.push(id);
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for id in &pending {
                    writeln!(out, "{id}: still not finished after {}s", self.timeout.as_secs())?;
                }
                report.timed_out = pending;
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        out.flush()?;
        Ok(report)
    }
}
