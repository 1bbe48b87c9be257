use thiserror::Error;

/// Top-level error type for the Sprocket scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression is malformed or describes no future fire times.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    /// The definition carries no executor closure and cannot be scheduled.
    #[error("task {0} has no executor bound")]
    MissingExecutor(i64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
