//! Observer for the request queue, used to show VM activity in a UI.

/// Receives queue snapshots whenever a request is added or answered.
pub trait StatusListener: Send + Sync {
    /// `current` is the oldest unanswered command; `queued_behind` counts
    /// the requests waiting after it.
    fn vm_status(&self, current: Option<&str>, queued_behind: usize);
}
