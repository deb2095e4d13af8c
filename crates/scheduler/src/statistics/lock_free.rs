use std::sync::atomic::{AtomicUsize, Ordering};

use taskman_core::{TaskProperties, TASK_PROPERTIES_COUNT};

use super::{TaskStatistics, TaskStatus};

/// Atomic counters, never blocking. Pays a fixed cost per update even when
/// uncontended, but scales best under heavy contention.
#[derive(Debug)]
pub struct LockFreeTaskStatistics {
    counters: [[AtomicUsize; TASK_PROPERTIES_COUNT]; 3],
}

impl LockFreeTaskStatistics {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| std::array::from_fn(|_| AtomicUsize::new(0))),
        }
    }

    fn counter(&self, status: TaskStatus, properties: TaskProperties) -> &AtomicUsize {
        &self.counters[status.index()][properties.index()]
    }
}

impl Default for LockFreeTaskStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStatistics for LockFreeTaskStatistics {
    fn increment_count(&self, status: TaskStatus, properties: TaskProperties, count: usize) {
        self.counter(status, properties).fetch_add(count, Ordering::AcqRel);
    }

    fn count(&self, status: TaskStatus, properties: TaskProperties) -> usize {
        self.counter(status, properties).load(Ordering::Acquire)
    }

    fn reset_all_counters(&self) {
        for counter in self.counters.iter().flatten() {
            counter.store(0, Ordering::Release);
        }
    }

    fn reset_counters_with_properties(&self, properties: TaskProperties) {
        for status in TaskStatus::ALL {
            self.counter(status, properties).store(0, Ordering::Release);
        }
    }
}
