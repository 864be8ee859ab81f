//! Task contract — status machine, priority, lifecycle listener, and the
//! reusable [`TaskState`] bookkeeping that concrete tasks embed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a worker.
    Waiting,
    /// Currently executing on a worker.
    Processing,
    /// Completed successfully.
    Finished,
    /// Failed; `error_message()` carries the reason.
    Error,
    /// Canceled before or during execution.
    Canceled,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Waiting, Processing) | (Waiting, Canceled) |
            (Processing, Finished) | (Processing, Error) | (Processing, Canceled) |
            // a fault boundary may flag a task that never started
            (Waiting, Error)
        )
    }

    /// Check if this is a terminal status. No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }

    /// Check if the task is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

/// Scheduling priority. Governs queue ordering among tasks that are not yet
/// assigned; it never preempts work already handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// A unit of asynchronous, cancelable, progress-reporting work.
///
/// `run()` is invoked exactly once, by exactly one worker, and must drive the
/// task to a terminal status itself — expected failures are caught inside
/// `run()` and recorded via the task's own state, not propagated. The
/// scheduler relays terminal statuses to listeners; it never interprets them.
///
/// Most implementations embed a [`TaskState`] and delegate the state-keeping
/// methods to it.
#[async_trait]
pub trait Task: Send + Sync {
    /// Human-readable description, shown in queue projections.
    fn description(&self) -> String;

    /// Fractional completion in `[0.0, 1.0]` (work done / work total).
    /// Expected to be non-decreasing while processing.
    fn progress(&self) -> f64;

    /// Current status.
    fn status(&self) -> TaskStatus;

    /// Failure reason; `Some` if and only if status is [`TaskStatus::Error`].
    fn error_message(&self) -> Option<String>;

    /// Result payload, meaningful only once status is [`TaskStatus::Finished`].
    fn result(&self) -> Option<serde_json::Value> {
        None
    }

    /// Request cooperative cancellation. A waiting task transitions to
    /// [`TaskStatus::Canceled`] immediately and is never started; a processing
    /// task is expected to poll its cancellation flag and exit promptly. No
    /// forced interruption is provided.
    fn cancel(&self);

    /// Force the task into [`TaskStatus::Error`] with the given message.
    /// Called by the worker fault boundary when a failure escapes `run()`;
    /// not intended for normal task logic.
    fn set_error(&self, message: String);

    /// Execute the task to completion. Invoked exactly once.
    async fn run(&self);
}

/// Lifecycle callbacks, invoked synchronously on the scheduler's dispatch
/// task: `task_started` at the moment of worker assignment, strictly before
/// execution begins; `task_finished` once a terminal status is observed,
/// strictly before the task leaves the queue.
///
/// Implementations must not block: a slow listener delays assignment and
/// reaping for every other queued task.
pub trait TaskListener: Send + Sync {
    fn task_started(&self, task: &Arc<dyn Task>);
    fn task_finished(&self, task: &Arc<dyn Task>);
}

#[derive(Debug)]
struct StateInner {
    status: TaskStatus,
    error: Option<String>,
}

/// Shared bookkeeping for a task's status, progress, and cancellation flag.
///
/// Concrete tasks embed one of these and delegate the [`Task`] state-keeping
/// methods to it, which gives them the legal transition rules for free:
///
/// - `start()` — Waiting → Processing, exactly once
/// - `finish()` — Processing → Finished
/// - `set_error()` — any active status → Error
/// - `cancel()` — Waiting → Canceled immediately; Processing raises the
///   advisory flag observable through `is_cancel_requested()`
#[derive(Debug)]
pub struct TaskState {
    inner: Mutex<StateInner>,
    cancel_requested: AtomicBool,
    /// Progress stored as f64 bits.
    progress: AtomicU64,
}

impl TaskState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                status: TaskStatus::Waiting,
                error: None,
            }),
            cancel_requested: AtomicBool::new(false),
            progress: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.inner.lock().expect("task state poisoned").status
    }

    /// Failure reason, set together with the Error status.
    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().expect("task state poisoned").error.clone()
    }

    /// Mark the task as processing. Fails if the task is not waiting — a
    /// cancel may have won the race, in which case `run()` should return
    /// without doing any work.
    pub fn start(&self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Processing, None)
    }

    /// Mark the task as finished.
    pub fn finish(&self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Finished, None)
    }

    /// Mark the task as canceled from inside `run()`, after observing the
    /// cancellation flag.
    pub fn mark_canceled(&self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Canceled, None)
    }

    /// Force the Error status with a message. A no-op once terminal, so the
    /// designed failure path always wins over the fault boundary.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().expect("task state poisoned");
        if inner.status.is_terminal() {
            return;
        }
        inner.status = TaskStatus::Error;
        inner.error = Some(message.into());
    }

    /// Request cancellation. Waiting tasks transition to Canceled immediately
    /// and will never be assigned; processing tasks only get the advisory
    /// flag raised.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().expect("task state poisoned");
        if inner.status == TaskStatus::Waiting {
            inner.status = TaskStatus::Canceled;
        }
    }

    /// Check whether cancellation was requested. Long-running `run()` bodies
    /// poll this between units of work.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Record fractional completion, clamped to `[0.0, 1.0]`.
    pub fn set_progress(&self, fraction: f64) {
        self.progress
            .store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }

    /// Current fractional completion.
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::SeqCst))
    }

    fn transition(&self, target: TaskStatus, error: Option<String>) -> Result<(), TaskError> {
        let mut inner = self.inner.lock().expect("task state poisoned");
        if !inner.status.can_transition_to(target) {
            return Err(TaskError::InvalidTransition {
                from: inner.status,
                to: target,
            });
        }
        inner.status = target;
        if error.is_some() {
            inner.error = error;
        }
        Ok(())
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}
