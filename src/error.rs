//! Error types for taskmill.

use crate::task::TaskStatus;

/// Top-level error type for the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

/// Scheduler-related errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler is shutting down, no new tasks accepted")]
    ShuttingDown,

    #[error("Worker pool size must be at least 1")]
    NoWorkers,
}

/// Task state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Cannot transition task from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// Result type alias for the scheduler.
pub type Result<T> = std::result::Result<T, Error>;
