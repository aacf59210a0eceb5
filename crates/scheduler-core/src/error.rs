use thiserror::Error;

/// Public error boundary for every fallible scheduler operation.
///
/// Handler failures never surface here — they're captured onto the task
/// record (`status = failed`, `error.*`) by the execution engine instead.
/// A missing task or an empty filter match is likewise not an error: both
/// are represented as `Ok(None)`/`TaskFilter`'s own construction guarantees,
/// never as a variant here.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("failed to serialize task payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
