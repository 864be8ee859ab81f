//! Priority-ordered task queue — the single source of truth for what is
//! pending or running.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::task::{Task, TaskListener, TaskPriority, TaskStatus};

/// A queue entry binding a task to its priority, optional listener, and
/// assignment state. Exists only inside the core; a wrapped task is bound to
/// at most one worker at any instant.
#[derive(Clone)]
pub(crate) struct WrappedTask {
    /// Queue-entry identity, used for idempotent removal.
    pub id: Uuid,
    /// Submission order, the FIFO tie-break within equal priority.
    pub seq: u64,
    pub task: Arc<dyn Task>,
    pub priority: TaskPriority,
    pub listener: Option<Arc<dyn TaskListener>>,
    /// Index of the worker this entry is bound to, if any.
    pub assigned_to: Option<usize>,
    pub submitted_at: DateTime<Utc>,
}

impl WrappedTask {
    pub fn is_assigned(&self) -> bool {
        self.assigned_to.is_some()
    }
}

/// One row of the queue's tabular projection.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRow {
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: f64,
    pub submitted_at: DateTime<Utc>,
}

/// Thread-safe, priority-ordered collection of [`WrappedTask`] entries.
///
/// Ordering is priority-descending with a stable FIFO tie-break. The dispatch
/// loop iterates [`snapshot`](Self::snapshot), never the live vector, so
/// concurrent mutation during a pass is safe and simply observed on the next
/// pass.
pub(crate) struct TaskQueue {
    entries: RwLock<Vec<WrappedTask>>,
    next_seq: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Append a task in priority/FIFO order. Visible to the next snapshot.
    pub async fn push(
        &self,
        task: Arc<dyn Task>,
        priority: TaskPriority,
        listener: Option<Arc<dyn TaskListener>>,
    ) -> Uuid {
        let wrapped = WrappedTask {
            id: Uuid::new_v4(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            task,
            priority,
            listener,
            assigned_to: None,
            submitted_at: Utc::now(),
        };
        let id = wrapped.id;

        let mut entries = self.entries.write().await;
        // insert before the first strictly-lower priority entry, which keeps
        // equal-priority entries in submission order
        let pos = entries
            .iter()
            .position(|e| e.priority < wrapped.priority)
            .unwrap_or(entries.len());
        entries.insert(pos, wrapped);
        id
    }

    /// Remove an entry by id. Idempotent: removing an absent entry is a no-op.
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() < before
    }

    /// Ordered, immutable point-in-time copy of the queue contents.
    pub async fn snapshot(&self) -> Vec<WrappedTask> {
        self.entries.read().await.clone()
    }

    /// Bind an entry to a worker. Ignores entries already removed.
    pub async fn mark_assigned(&self, id: Uuid, worker: usize) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.assigned_to = Some(worker);
        }
    }

    /// Update an entry's ordering key by task identity. Only affects future
    /// assignment ordering; an already-assigned entry keeps its worker.
    /// Returns whether the task was found.
    pub async fn reprioritize(&self, task: &Arc<dyn Task>, priority: TaskPriority) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.iter_mut().find(|e| Arc::ptr_eq(&e.task, task)) else {
            return false;
        };
        entry.priority = priority;
        // stable sort preserves submission order within equal priority
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        true
    }

    /// Positional access, for external tabular projections.
    pub async fn task_at(&self, index: usize) -> Option<Arc<dyn Task>> {
        self.entries.read().await.get(index).map(|e| e.task.clone())
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Project the queue into table rows, in queue order.
    pub async fn rows(&self) -> Vec<TaskRow> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| TaskRow {
                description: e.task.description(),
                priority: e.priority,
                status: e.task.status(),
                progress: e.task.progress(),
                submitted_at: e.submitted_at,
            })
            .collect()
    }
}
