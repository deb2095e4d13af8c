use std::sync::Mutex;

use taskman_core::{TaskProperties, TASK_PROPERTIES_COUNT};

use super::{TaskStatistics, TaskStatus};
use crate::sync::lock;

/// One exclusive lock per status; every classification counter of a status
/// lives behind that status's lock.
#[derive(Debug)]
pub struct SimpleTaskStatistics {
    counters: [Mutex<[usize; TASK_PROPERTIES_COUNT]>; 3],
}

impl SimpleTaskStatistics {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| Mutex::new([0; TASK_PROPERTIES_COUNT])),
        }
    }
}

impl Default for SimpleTaskStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStatistics for SimpleTaskStatistics {
    fn increment_count(&self, status: TaskStatus, properties: TaskProperties, count: usize) {
        lock(&self.counters[status.index()])[properties.index()] += count;
    }

    fn count(&self, status: TaskStatus, properties: TaskProperties) -> usize {
        lock(&self.counters[status.index()])[properties.index()]
    }

    fn reset_all_counters(&self) {
        for counters in &self.counters {
            *lock(counters) = [0; TASK_PROPERTIES_COUNT];
        }
    }

    fn reset_counters_with_properties(&self, properties: TaskProperties) {
        for counters in &self.counters {
            lock(counters)[properties.index()] = 0;
        }
    }
}
