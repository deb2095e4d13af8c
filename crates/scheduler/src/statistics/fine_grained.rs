use std::sync::Mutex;

use taskman_core::{TaskProperties, TASK_PROPERTIES_COUNT};

use super::{TaskStatistics, TaskStatus};
use crate::sync::lock;

/// One exclusive lock per (status, classification) counter. Updates to
/// different classifications never contend.
#[derive(Debug)]
pub struct FineGrainedTaskStatistics {
    counters: [[Mutex<usize>; TASK_PROPERTIES_COUNT]; 3],
}

impl FineGrainedTaskStatistics {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| std::array::from_fn(|_| Mutex::new(0))),
        }
    }

    fn counter(&self, status: TaskStatus, properties: TaskProperties) -> &Mutex<usize> {
        &self.counters[status.index()][properties.index()]
    }
}

impl Default for FineGrainedTaskStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStatistics for FineGrainedTaskStatistics {
    fn increment_count(&self, status: TaskStatus, properties: TaskProperties, count: usize) {
        *lock(self.counter(status, properties)) += count;
    }

    fn count(&self, status: TaskStatus, properties: TaskProperties) -> usize {
        *lock(self.counter(status, properties))
    }

    fn reset_all_counters(&self) {
        for counter in self.counters.iter().flatten() {
            *lock(counter) = 0;
        }
    }

    fn reset_counters_with_properties(&self, properties: TaskProperties) {
        for status in TaskStatus::ALL {
            *lock(self.counter(status, properties)) = 0;
        }
    }
}
