use thiserror::Error;

/// Terminal failure of a task or of the future it resolves.
///
/// Cloneable because every continuation attached to a future receives its
/// own copy of the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The job returned an error explicitly.
    #[error("task failed: {0}")]
    Failed(String),

    /// The job panicked; the runtime caught the unwind.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The future was cancelled before it was resolved.
    #[error("future was cancelled")]
    Cancelled,

    /// The owning actor closed before the job could run.
    #[error("actor {0} is closed")]
    ActorClosed(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A write-once future was resolved a second time.
    #[error("future has already been resolved")]
    FutureAlreadyResolved,

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn thread {name}: {reason}")]
    ThreadSpawn { name: String, reason: String },
}
