//! Worker pool member — a long-lived execution context that runs at most one
//! task at a time.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::task::Task;

/// Handle to one worker: its busy flag, assignment channel, and join handle.
///
/// Only the dispatch loop assigns, so the busy flag has a single writer on
/// the `false → true` edge and the worker itself clears it. The channel has
/// capacity 1; an idle worker always has room for exactly one assignment.
pub(crate) struct WorkerHandle {
    id: usize,
    busy: Arc<AtomicBool>,
    tx: mpsc::Sender<Arc<dyn Task>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Spawn a worker loop and return its handle.
    ///
    /// `wake` is notified after every task completion so the dispatch loop
    /// reaps promptly; `stop`/`stopping` drive shutdown.
    pub fn spawn(
        id: usize,
        wake: Arc<Notify>,
        stop: Arc<Notify>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Arc<dyn Task>>(1);
        let busy = Arc::new(AtomicBool::new(false));

        let join = tokio::spawn(worker_loop(
            id,
            rx,
            busy.clone(),
            wake,
            stop,
            stopping,
        ));

        Self {
            id,
            busy,
            tx,
            join: Mutex::new(Some(join)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether this worker holds no task.
    pub fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::SeqCst)
    }

    /// Hand a task to this worker. Marks the worker busy first, so the
    /// dispatch pass never assigns it a second task before execution begins.
    pub fn assign(&self, task: Arc<dyn Task>) -> bool {
        self.busy.store(true, Ordering::SeqCst);
        if self.tx.try_send(task).is_err() {
            // channel full or closed; both mean the worker cannot take work
            self.busy.store(false, Ordering::SeqCst);
            warn!(worker = self.id, "failed to hand task to worker");
            return false;
        }
        true
    }

    /// Wait briefly for the worker loop to exit, then abort it.
    pub async fn stop(&self, grace: Duration) {
        let handle = self.join.lock().expect("worker join poisoned").take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!(worker = self.id, "worker did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

/// The worker event loop: park on the assignment channel, run each task to
/// completion inside a fault boundary, clear the busy flag, repeat.
///
/// The worker never evaluates task status to decide lifecycle — reaping is
/// the dispatch loop's job. It only hardens against two misbehaviors the
/// designed path does not allow: a panic escaping `run()`, and a `run()` that
/// returns without reaching a terminal status. Both are converted into the
/// Error status and the worker stays alive and idle.
async fn worker_loop(
    id: usize,
    mut rx: mpsc::Receiver<Arc<dyn Task>>,
    busy: Arc<AtomicBool>,
    wake: Arc<Notify>,
    stop: Arc<Notify>,
    stopping: Arc<AtomicBool>,
) {
    loop {
        let task = tokio::select! {
            assignment = rx.recv() => match assignment {
                Some(task) => task,
                None => break,
            },
            _ = stop.notified() => break,
        };

        debug!(worker = id, task = %task.description(), "worker executing task");

        let outcome = AssertUnwindSafe(task.run()).catch_unwind().await;
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            error!(
                worker = id,
                task = %task.description(),
                panic = %message,
                "task panicked, converting to error status"
            );
            task.set_error(format!("task panicked: {message}"));
        } else if !task.status().is_terminal() {
            warn!(
                worker = id,
                task = %task.description(),
                "task returned without a terminal status"
            );
            task.set_error("task returned without reaching a terminal status".to_string());
        }

        busy.store(false, Ordering::SeqCst);
        wake.notify_one();

        if stopping.load(Ordering::SeqCst) {
            break;
        }
    }

    debug!(worker = id, "worker stopped");
}

/// Best-effort extraction of a panic payload's message.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskState, TaskStatus};
    use async_trait::async_trait;

    struct PanickingTask {
        state: TaskState,
    }

    #[async_trait]
    impl Task for PanickingTask {
        fn description(&self) -> String {
            "panicking task".to_string()
        }

        fn progress(&self) -> f64 {
            self.state.progress()
        }

        fn status(&self) -> TaskStatus {
            self.state.status()
        }

        fn error_message(&self) -> Option<String> {
            self.state.error_message()
        }

        fn cancel(&self) {
            self.state.cancel();
        }

        fn set_error(&self, message: String) {
            self.state.set_error(message);
        }

        async fn run(&self) {
            let _ = self.state.start();
            panic!("boom");
        }
    }

    struct ForgetfulTask {
        state: TaskState,
    }

    #[async_trait]
    impl Task for ForgetfulTask {
        fn description(&self) -> String {
            "forgetful task".to_string()
        }

        fn progress(&self) -> f64 {
            self.state.progress()
        }

        fn status(&self) -> TaskStatus {
            self.state.status()
        }

        fn error_message(&self) -> Option<String> {
            self.state.error_message()
        }

        fn cancel(&self) {
            self.state.cancel();
        }

        fn set_error(&self, message: String) {
            self.state.set_error(message);
        }

        async fn run(&self) {
            // starts but never reaches a terminal status
            let _ = self.state.start();
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not met within timeout"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn panic_becomes_error_status_and_worker_survives() {
        let wake = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let worker = WorkerHandle::spawn(0, wake, stop, stopping);

        let task: Arc<dyn Task> = Arc::new(PanickingTask {
            state: TaskState::new(),
        });
        assert!(worker.assign(task.clone()));

        wait_until(|| task.status() == TaskStatus::Error).await;
        assert!(task.error_message().unwrap().contains("boom"));

        wait_until(|| worker.is_idle()).await;

        // worker must still accept and run further work
        let next: Arc<dyn Task> = Arc::new(ForgetfulTask {
            state: TaskState::new(),
        });
        assert!(worker.assign(next.clone()));
        wait_until(|| next.status().is_terminal()).await;

        worker.stop(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn non_terminal_return_is_forced_to_error() {
        let wake = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let worker = WorkerHandle::spawn(0, wake, stop, stopping);

        let task: Arc<dyn Task> = Arc::new(ForgetfulTask {
            state: TaskState::new(),
        });
        assert!(worker.assign(task.clone()));

        wait_until(|| task.status() == TaskStatus::Error).await;
        assert!(
            task.error_message()
                .unwrap()
                .contains("terminal status")
        );

        worker.stop(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn stop_notify_ends_idle_worker() {
        let wake = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let worker = WorkerHandle::spawn(0, wake, stop.clone(), stopping.clone());

        // give the loop a moment to park on the channel
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopping.store(true, Ordering::SeqCst);
        stop.notify_waiters();

        worker.stop(Duration::from_secs(1)).await;
    }
}
