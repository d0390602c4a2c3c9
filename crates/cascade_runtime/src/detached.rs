//! Detached (fire-and-forget) work.
//!
//! Async calls never report back to the execution that launched them. Their
//! only observable effect is a best-effort log line. They are still tracked
//! so the node can let them finish before exiting.

use std::future::Future;
use tokio_util::task::TaskTracker;

/// Tracker for detached tasks
#[derive(Debug, Clone, Default)]
pub struct DetachedTasks {
    tracker: TaskTracker,
}

impl DetachedTasks {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch `work` without waiting for it
    ///
    /// A failure is reported through tracing, tagged with `what`.
    pub fn submit<F, E>(&self, what: &'static str, work: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.tracker.spawn(async move {
            if let Err(err) = work.await {
                tracing::warn!(call = what, error = %err, "detached call failed");
            }
        });
    }

    /// Number of detached tasks still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every detached task launched so far
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_submitted_work() {
        let tasks = DetachedTasks::new();
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..3u64 {
            let done = Arc::clone(&done);
            tasks.submit("sleep", async move {
                tokio::time::sleep(Duration::from_millis(10 * (i + 1))).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            });
        }
        assert_eq!(tasks.pending(), 3);
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let tasks = DetachedTasks::new();
        tasks.submit("failing", async { Err::<(), _>("store unreachable") });
        tasks.drain().await;
    }
}
