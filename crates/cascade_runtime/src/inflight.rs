//! In-flight execution counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Process-wide count of executions currently running
///
/// Purely observational; nothing is ever refused based on it.
#[derive(Debug, Clone, Default)]
pub struct InflightCounter {
    count: Arc<AtomicI64>,
}

impl InflightCounter {
    /// Create a counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one execution until the returned guard is dropped
    #[must_use]
    pub fn enter(&self) -> InflightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InflightGuard {
            count: Arc::clone(&self.count),
        }
    }

    /// Current number of executions
    #[must_use]
    pub fn current(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Decrements the counter on drop
#[derive(Debug)]
pub struct InflightGuard {
    count: Arc<AtomicI64>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_tracks_scope() {
        let counter = InflightCounter::new();
        let a = counter.enter();
        {
            let _b = counter.clone().enter();
            assert_eq!(counter.current(), 2);
        }
        assert_eq!(counter.current(), 1);
        drop(a);
        assert_eq!(counter.current(), 0);
    }

    #[tokio::test]
    async fn test_guard_released_when_task_panics() {
        let counter = InflightCounter::new();
        let inner = counter.clone();
        let result = tokio::spawn(async move {
            let _guard = inner.enter();
            panic!("boom");
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.current(), 0);
    }
}
