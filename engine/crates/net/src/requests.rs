use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Tracks in-flight request work so shutdown can wait for it.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    tracker: TaskTracker,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Close the tracker and wait for every tracked task.
    /// There is no timeout: a task that never finishes blocks the caller.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
