//! Scheduler — owns the task queue and the fixed worker pool, and runs the
//! dispatch loop that assigns, reaps, and notifies.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::observer::QueueObserver;
use crate::queue::{TaskQueue, TaskRow, WrappedTask};
use crate::task::{Task, TaskListener, TaskPriority};
use crate::worker::WorkerHandle;

/// Accepts tasks from any caller, executes them on a bounded worker pool in
/// priority order, and relays lifecycle transitions to listeners.
///
/// Construction spawns the worker pool and the dispatch task; the pool size
/// is fixed for the scheduler's lifetime. Dropping the scheduler without
/// calling [`shutdown`](Self::shutdown) leaves those tasks running until the
/// runtime itself stops.
pub struct Scheduler {
    queue: Arc<TaskQueue>,
    workers: Arc<Vec<WorkerHandle>>,
    wake: Arc<Notify>,
    stop: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    observer: Option<Arc<dyn QueueObserver>>,
    shutdown_timeout: Duration,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with no observer.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::build(config, None)
    }

    /// Create a scheduler that reports queue activity to `observer`.
    pub fn with_observer(
        config: SchedulerConfig,
        observer: Arc<dyn QueueObserver>,
    ) -> Result<Self, SchedulerError> {
        Self::build(config, Some(observer))
    }

    fn build(
        config: SchedulerConfig,
        observer: Option<Arc<dyn QueueObserver>>,
    ) -> Result<Self, SchedulerError> {
        if config.num_workers == 0 {
            return Err(SchedulerError::NoWorkers);
        }

        let queue = Arc::new(TaskQueue::new());
        let wake = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());
        let stopping = Arc::new(AtomicBool::new(false));

        let workers: Arc<Vec<WorkerHandle>> = Arc::new(
            (0..config.num_workers)
                .map(|id| WorkerHandle::spawn(id, wake.clone(), stop.clone(), stopping.clone()))
                .collect(),
        );

        info!(workers = config.num_workers, "scheduler started");

        let dispatch = tokio::spawn(dispatch_loop(
            queue.clone(),
            workers.clone(),
            wake.clone(),
            stopping.clone(),
            observer.clone(),
            config.poll_interval,
        ));

        Ok(Self {
            queue,
            workers,
            wake,
            stop,
            stopping,
            observer,
            shutdown_timeout: config.shutdown_timeout,
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    /// Submit a task at normal priority with no listener.
    pub async fn submit(&self, task: Arc<dyn Task>) -> Result<(), SchedulerError> {
        self.submit_with(task, TaskPriority::Normal, None).await
    }

    /// Submit a task with an explicit priority and optional listener. Safe to
    /// call from any task or thread; wakes the dispatch loop immediately.
    pub async fn submit_with(
        &self,
        task: Arc<dyn Task>,
        priority: TaskPriority,
        listener: Option<Arc<dyn TaskListener>>,
    ) -> Result<(), SchedulerError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        debug!(task = %task.description(), %priority, "adding task to the queue");
        self.queue.push(task, priority, listener).await;

        if let Some(observer) = &self.observer {
            isolated("show_progress", || observer.show_progress());
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Change a queued task's priority. Affects only future assignment
    /// ordering; a task already handed to a worker keeps running. A task no
    /// longer in the queue is a logged no-op.
    pub async fn set_priority(&self, task: &Arc<dyn Task>, priority: TaskPriority) {
        if self.queue.reprioritize(task, priority).await {
            debug!(task = %task.description(), %priority, "task reprioritized");
            self.wake.notify_one();
        } else {
            debug!(task = %task.description(), "set_priority on a task no longer queued");
        }
    }

    /// Positional access into the queue, for external tabular projections.
    pub async fn task_at(&self, index: usize) -> Option<Arc<dyn Task>> {
        self.queue.task_at(index).await
    }

    /// Point-in-time tabular projection of the queue, in queue order.
    /// [`QueueObserver::queue_refreshed`] signals when it is worth re-reading.
    pub async fn table_view(&self) -> Vec<TaskRow> {
        self.queue.rows().await
    }

    /// Number of entries currently queued or running.
    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    /// Whether the scheduler has no pending or running work.
    pub async fn is_idle(&self) -> bool {
        self.queue.is_empty().await
    }

    /// Shut down: stop accepting submissions, cancel every queued task
    /// (waiting tasks transition to Canceled immediately, running tasks get
    /// the advisory flag), wait up to the configured timeout for the queue to
    /// drain, then stop the dispatch loop and workers. In-flight tasks that
    /// outlive the timeout are abandoned.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("scheduler shutting down");

        for entry in self.queue.snapshot().await {
            entry.task.cancel();
        }
        self.wake.notify_one();

        let drain = async {
            while !self.queue.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let drained = tokio::time::timeout(self.shutdown_timeout, drain)
            .await
            .is_ok();
        if !drained {
            warn!("shutdown timed out waiting for in-flight tasks, abandoning them");
        }

        self.stop.notify_waiters();
        self.wake.notify_one();

        let handle = self.dispatch.lock().expect("dispatch handle poisoned").take();
        if let Some(mut handle) = handle {
            if drained {
                if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                    .await
                    .is_err()
                {
                    handle.abort();
                }
            } else {
                handle.abort();
            }
        }

        for worker in self.workers.iter() {
            worker.stop(Duration::from_secs(1)).await;
        }

        info!("scheduler shutdown complete");
    }
}

/// One dispatch pass per wakeup or poll interval, forever:
///
/// 1. Suspend while the queue is empty.
/// 2. Snapshot the queue and walk it in priority order. Terminal entries are
///    reaped (listener notified, entry removed) — this check runs before any
///    assignment attempt, so a task canceled while waiting is never started.
///    Unassigned entries go to the first idle worker in fixed index order; the
///    fixed scan biases load toward low-index workers, a documented
///    deterministic property.
/// 3. Signal the observer: queue drained or queue changed.
/// 4. Wait for the poll interval or the next wakeup, whichever comes first.
async fn dispatch_loop(
    queue: Arc<TaskQueue>,
    workers: Arc<Vec<WorkerHandle>>,
    wake: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    observer: Option<Arc<dyn QueueObserver>>,
    poll_interval: Duration,
) {
    loop {
        while queue.is_empty().await {
            if stopping.load(Ordering::SeqCst) {
                debug!("dispatch loop exiting");
                return;
            }
            wake.notified().await;
        }

        let draining = stopping.load(Ordering::SeqCst);
        let snapshot = queue.snapshot().await;

        for entry in snapshot {
            let status = entry.task.status();

            if status.is_terminal() {
                debug!(task = %entry.task.description(), %status, "reaping finished task");
                notify_finished(&entry);
                queue.remove(entry.id).await;
                continue;
            }

            if !entry.is_assigned() && !draining {
                if let Some(worker) = workers.iter().find(|w| w.is_idle()) {
                    debug!(
                        task = %entry.task.description(),
                        worker = worker.id(),
                        "assigning task to worker"
                    );
                    notify_started(&entry);
                    if worker.assign(entry.task.clone()) {
                        queue.mark_assigned(entry.id, worker.id()).await;
                    }
                }
            }
        }

        if let Some(observer) = &observer {
            if queue.is_empty().await {
                isolated("hide_progress", || observer.hide_progress());
            } else {
                isolated("queue_refreshed", || observer.queue_refreshed());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = wake.notified() => {}
        }
    }
}

fn notify_started(entry: &WrappedTask) {
    if let Some(listener) = &entry.listener {
        isolated_listener("task_started", entry, || listener.task_started(&entry.task));
    }
}

fn notify_finished(entry: &WrappedTask) {
    if let Some(listener) = &entry.listener {
        isolated_listener("task_finished", entry, || {
            listener.task_finished(&entry.task)
        });
    }
}

/// Run a listener callback behind a panic boundary so a faulty listener
/// cannot stall or kill the dispatch loop.
fn isolated_listener(callback: &str, entry: &WrappedTask, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(
            task = %entry.task.description(),
            callback,
            "task listener panicked, ignoring"
        );
    }
}

/// Same boundary for observer callbacks.
fn isolated(callback: &str, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(callback, "queue observer panicked, ignoring");
    }
}
