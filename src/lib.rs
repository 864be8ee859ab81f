//! taskmill — bounded-pool task scheduler.
//!
//! Callers submit units of asynchronous, cancelable, progress-reporting work
//! ([`Task`]); a fixed pool of workers executes them under priority ordering
//! with a stable FIFO tie-break; [`TaskListener`]s observe lifecycle
//! transitions and a [`QueueObserver`] receives coarse queue-activity
//! signals. Priority ordering is best-effort: it governs which waiting task
//! is assigned next and never preempts running work.

pub mod config;
pub mod error;
pub mod observer;
mod queue;
pub mod scheduler;
pub mod task;
mod worker;

pub use config::SchedulerConfig;
pub use error::{Error, Result, SchedulerError, TaskError};
pub use observer::QueueObserver;
pub use queue::TaskRow;
pub use scheduler::Scheduler;
pub use task::{Task, TaskListener, TaskPriority, TaskState, TaskStatus};
