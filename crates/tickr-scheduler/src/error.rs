use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid boundaries, unknown time zone, or a schedule that can never fire.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two jobs were registered under the same name.
    #[error("Duplicate job: {name}")]
    DuplicateJob { name: String },

    /// No job with the given name is registered.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// The job is still executing from a previous invocation.
    #[error("Job already running: {name}")]
    AlreadyRunning { name: String },

    /// The job's handler returned an error.
    #[error("Job {name} failed: {source:#}")]
    JobFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Queue or cache failure (status keys, enqueued work).
    #[error(transparent)]
    Queue(#[from] tickr_queue::QueueError),
}

impl From<tickr_core::CoreError> for SchedulerError {
    fn from(e: tickr_core::CoreError) -> Self {
        SchedulerError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
