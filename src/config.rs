//! Configuration types.

use std::time::Duration;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker tasks in the pool. Fixed at construction.
    pub num_workers: usize,
    /// Dispatch loop polling interval. A safety net only — submissions,
    /// completions, and priority changes wake the loop immediately, so this
    /// bounds latency rather than defining it.
    pub poll_interval: Duration,
    /// Maximum time `shutdown()` waits for in-flight tasks to honor their
    /// cancellation request before abandoning them.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
