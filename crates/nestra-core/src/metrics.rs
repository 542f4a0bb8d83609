//! Lightweight instrumentation counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters maintained by the dispatch router.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Total invocations, successful or not.
    pub dispatches: Counter,
    /// Invocations that failed and were reverted.
    pub dispatch_failures: Counter,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let metrics = RouterMetrics::new();
        metrics.dispatches.inc();
        metrics.dispatches.inc();
        metrics.dispatch_failures.inc();
        assert_eq!(metrics.dispatches.get(), 2);
        assert_eq!(metrics.dispatch_failures.get(), 1);
    }
}
