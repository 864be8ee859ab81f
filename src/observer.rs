//! Progress-surfacing hook for external collaborators.

/// Receives coarse queue-activity signals from the scheduler.
///
/// This is the seam where a UI (or any other progress surface) plugs in: the
/// scheduler calls it without knowing anything about its concrete behavior,
/// and every method defaults to a no-op. Callbacks run on the dispatch task
/// and must return quickly.
pub trait QueueObserver: Send + Sync {
    /// There is queued or running work; a progress surface should appear.
    fn show_progress(&self) {}

    /// The queue drained; any progress surface can be hidden.
    fn hide_progress(&self) {}

    /// Queue contents changed during a dispatch pass; projections such as
    /// [`table_view`](crate::Scheduler::table_view) are worth re-reading.
    fn queue_refreshed(&self) {}
}
