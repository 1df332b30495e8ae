//! Structured error handling for the polling scheduler.

/// Errors surfaced by the scheduler and its components.
///
/// Task callbacks report failures as [`PollerError::TaskFailed`]; everything
/// a callback raises is caught at the execution-step boundary and surfaced
/// through error stats and alerts rather than propagated to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollerError {
    /// A task callback rejected. The message is used for failure
    /// classification and alerting.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// An operation referenced a task id with no live registration.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// A task configuration failed validation.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A best-effort notification could not be delivered.
    #[error("Notification error: {0}")]
    NotificationError(String),
}

impl PollerError {
    /// Convenience constructor for callback failures.
    pub fn task_failed(msg: impl Into<String>) -> Self {
        PollerError::TaskFailed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PollerError>;
