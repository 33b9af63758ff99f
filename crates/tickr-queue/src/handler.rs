use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{QueueError, Result};
use crate::queue::TaskQueue;
use crate::types::{LogLevel, TaskArgs, TaskId};

/// Executes one kind of queued task, identified by its function name.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Returns the payload stored as the task's `result`; an error is stored
    /// as its `error` string.
    async fn handle(&self, ctx: &TaskContext, args: &TaskArgs) -> anyhow::Result<serde_json::Value>;
}

/// What a handler gets besides its args: a way to append task log lines.
#[derive(Clone)]
pub struct TaskContext {
    queue: TaskQueue,
    task_id: TaskId,
}

impl TaskContext {
    pub fn new(queue: TaskQueue, task_id: TaskId) -> Self {
        Self { queue, task_id }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub async fn info(&self, message: &str) {
        self.append(LogLevel::Info, message).await;
    }

    pub async fn warn(&self, message: &str) {
        self.append(LogLevel::Warn, message).await;
    }

    pub async fn error(&self, message: &str) {
        self.append(LogLevel::Error, message).await;
    }

    // A lost log line must not fail the task itself.
    async fn append(&self, level: LogLevel, message: &str) {
        if let Err(e) = self.queue.log(&self.task_id, level, message).await {
            warn!(task_id = %self.task_id, error = %e, "failed to append task log");
        }
    }
}

/// Function name → handler table consulted by workers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A second handler under the same name is a
    /// configuration error, never a silent replacement.
    pub fn register(&mut self, name: &str, handler: Arc<dyn TaskHandler>) -> Result<()> {
        if self.handlers.contains_key(name) {
            return Err(QueueError::DuplicateHandler {
                name: name.to_string(),
            });
        }
        info!(function = name, "task handler registered");
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered function names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
