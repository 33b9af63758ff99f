use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{QueueError, Result};
use crate::handler::{HandlerRegistry, TaskContext};
use crate::queue::TaskQueue;
use crate::types::{QueueEnvelope, TaskStatus};

/// Pops envelopes and executes them against a [`HandlerRegistry`].
///
/// Several workers (in one process or many) may share a queue; each popped
/// envelope is processed by exactly one of them.
pub struct Worker {
    queue: TaskQueue,
    handlers: Arc<HandlerRegistry>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(queue: TaskQueue, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            queue,
            handlers,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Main loop. Stops between tasks once `shutdown` is cancelled; a task
    /// already executing always runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(handlers = ?self.handlers.names(), "queue worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!("queue worker error: {e}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        info!("queue worker shutting down");
    }

    /// Pop and execute at most one envelope. Returns the final status of the
    /// task processed, or `None` when the queue was empty.
    pub async fn process_next(&self) -> Result<Option<TaskStatus>> {
        let Some(envelope) = self.queue.pop().await? else {
            return Ok(None);
        };
        self.execute(envelope).await.map(Some)
    }

    async fn execute(&self, envelope: QueueEnvelope) -> Result<TaskStatus> {
        let id = envelope.id.clone();

        match self.queue.poll(&id).await {
            Ok(task) if task.status == TaskStatus::Cancelled => {
                info!(task_id = %id, "skipping cancelled task");
                return Ok(TaskStatus::Cancelled);
            }
            Ok(_) => {}
            Err(QueueError::NotFound { .. }) => {
                // Record evicted from the cache; nobody can observe the outcome.
                warn!(task_id = %id, func = %envelope.func, "dropping envelope without task record");
                return Err(QueueError::NotFound { id: id.to_string() });
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.queue.start(&id).await {
            // The envelope is already off the list; nothing will retry it.
            error!(task_id = %id, func = %envelope.func, "popped task could not be started, re-enqueue it: {e}");
            return Err(e);
        }
        info!(task_id = %id, func = %envelope.func, "task started");

        let Some(handler) = self.handlers.get(&envelope.func) else {
            let message = format!("no handler registered for function {:?}", envelope.func);
            warn!(task_id = %id, "{message}");
            self.queue.fail(&id, &message).await?;
            return Ok(TaskStatus::Failed);
        };

        let ctx = TaskContext::new(self.queue.clone(), id.clone());
        let args = envelope.args;
        // Spawned so a panicking handler still leaves a failed record behind.
        let outcome = tokio::spawn(async move { handler.handle(&ctx, &args).await }).await;

        let status = match outcome {
            Ok(Ok(result)) => {
                self.queue.complete(&id, result).await?;
                TaskStatus::Completed
            }
            Ok(Err(e)) => {
                warn!(task_id = %id, error = %e, "task failed");
                self.queue.fail(&id, &format!("{e:#}")).await?;
                TaskStatus::Failed
            }
            Err(join) => {
                error!(task_id = %id, error = %join, "task handler panicked");
                self.queue.fail(&id, &format!("handler panicked: {join}")).await?;
                TaskStatus::Failed
            }
        };
        info!(task_id = %id, %status, "task finished");
        Ok(status)
    }
}
