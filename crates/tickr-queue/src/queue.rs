use std::sync::Arc;

use chrono::{Duration, Utc};
use tickr_core::config::{DEFAULT_LEASE_SECS, DEFAULT_QUEUE_KEY};
use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::error::{QueueError, Result};
use crate::types::{LogLevel, QueueEnvelope, Task, TaskArgs, TaskId};

/// Producer, consumer and poller view of the work queue.
///
/// Cheap to clone; all clones share the same cache handle.
#[derive(Clone)]
pub struct TaskQueue {
    cache: Arc<dyn SharedCache>,
    queue_key: String,
    lease: Duration,
}

impl TaskQueue {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self {
            cache,
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            lease: Duration::seconds(DEFAULT_LEASE_SECS as i64),
        }
    }

    pub fn with_queue_key(mut self, key: &str) -> Self {
        self.queue_key = key.to_string();
        self
    }

    pub fn with_lease_secs(mut self, secs: u64) -> Self {
        self.lease = Duration::seconds(secs as i64);
        self
    }

    pub fn cache(&self) -> &Arc<dyn SharedCache> {
        &self.cache
    }

    /// Create a `queued` task record and push its envelope onto the queue tail.
    ///
    /// Returns as soon as both are written; never waits for a worker.
    pub async fn enqueue(&self, function: &str, args: TaskArgs) -> Result<TaskId> {
        let id = TaskId::new();
        let task = Task::queued(id.clone(), function, args.clone(), Utc::now());
        let envelope = QueueEnvelope {
            id: id.clone(),
            func: function.to_string(),
            args,
        };
        let record = serde_json::to_string(&task)?;
        let entry = serde_json::to_string(&envelope)?;

        self.cache
            .set_and_push(id.as_str(), &record, &self.queue_key, &entry)
            .await?;
        info!(task_id = %id, function, "task enqueued");
        Ok(id)
    }

    /// Take the oldest envelope off the queue, if any.
    pub async fn pop(&self) -> Result<Option<QueueEnvelope>> {
        match self.cache.pop_front(&self.queue_key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Pending envelopes, oldest first. Entries that fail to parse are skipped.
    pub async fn pending(&self) -> Result<Vec<QueueEnvelope>> {
        let raw = self.cache.list(&self.queue_key).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    warn!(error = %e, "unparseable queue entry");
                    None
                }
            })
            .collect())
    }

    /// Read-only snapshot of a task record.
    pub async fn poll(&self, id: &TaskId) -> Result<Task> {
        let raw = self
            .cache
            .get(id.as_str())
            .await?
            .ok_or_else(|| QueueError::NotFound { id: id.to_string() })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// `queued → running`, stamping `startedAt` and the first lease.
    pub async fn start(&self, id: &TaskId) -> Result<Task> {
        let lease = self.lease;
        self.modify(id, |task| task.start(Utc::now(), lease)).await
    }

    pub async fn log(&self, id: &TaskId, level: LogLevel, message: &str) -> Result<Task> {
        let lease = self.lease;
        self.modify(id, |task| {
            task.append_log(level, message, Utc::now(), lease);
            Ok(())
        })
        .await
    }

    pub async fn complete(&self, id: &TaskId, result: serde_json::Value) -> Result<Task> {
        self.modify(id, |task| task.complete(result, Utc::now())).await
    }

    pub async fn fail(&self, id: &TaskId, error: &str) -> Result<Task> {
        self.modify(id, |task| task.fail(error, Utc::now())).await
    }

    /// Withdraw a still-queued task. A worker that later pops its envelope
    /// skips it; a task that is already running is rejected with
    /// [`QueueError::InvalidTransition`].
    pub async fn cancel(&self, id: &TaskId) -> Result<Task> {
        let task = self.modify(id, |task| task.cancel(Utc::now())).await?;
        info!(task_id = %id, "task cancelled");
        Ok(task)
    }

    // Read-modify-write. Once a task is running only its worker writes it;
    // before that, a cancel and a worker's `start` can still interleave.
    async fn modify<F>(&self, id: &TaskId, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let mut task = self.poll(id).await?;
        f(&mut task)?;
        let record = serde_json::to_string(&task)?;
        self.cache.set(id.as_str(), &record).await?;
        debug!(task_id = %id, status = %task.status, "task record updated");
        Ok(task)
    }
}
