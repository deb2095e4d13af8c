//! Task lifecycle counters.
//!
//! Every classification has one counter per [`TaskStatus`]. Counters are
//! purely observational: the scheduler bumps them as tasks move between
//! states and only ever *waits* on them in
//! [`TaskScheduler::wait_for_finish_all_tasks_with_properties`](crate::TaskScheduler::wait_for_finish_all_tasks_with_properties).
//!
//! Three implementations share the [`TaskStatistics`] contract and differ
//! only in how they synchronize:
//! - [`SimpleTaskStatistics`]: one lock per status.
//! - [`FineGrainedTaskStatistics`]: one lock per (status, classification).
//! - [`LockFreeTaskStatistics`]: atomics with acquire/release ordering.

mod fine_grained;
mod lock_free;
mod simple;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use taskman_core::{StatisticsKind, TaskProperties};

pub use fine_grained::FineGrainedTaskStatistics;
pub use lock_free::LockFreeTaskStatistics;
pub use simple::SimpleTaskStatistics;

/// Lifecycle state a counter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted by a queue.
    Added,
    /// Run to completion by a worker.
    Executed,
    /// Taken out through the synchronous bypass path; the caller runs it.
    Popped,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Added, TaskStatus::Executed, TaskStatus::Popped];

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// Counter family keyed by (status, classification).
///
/// Invariant: for every classification `Added >= Executed + Popped`, as long
/// as increments follow the task's real lifecycle (Added before the task is
/// visible to consumers) and resets only happen while no task of the reset
/// classification is in flight.
pub trait TaskStatistics: Send + Sync + fmt::Debug {
    fn increment_count(&self, status: TaskStatus, properties: TaskProperties, count: usize);

    fn count(&self, status: TaskStatus, properties: TaskProperties) -> usize;

    fn reset_all_counters(&self);

    fn reset_counters_with_properties(&self, properties: TaskProperties);

    /// `Added - Executed - Popped` for one classification.
    ///
    /// Executed and Popped are read before Added: any completion we observe
    /// was preceded by its Added increment, so the difference never goes
    /// negative under concurrent updates.
    fn count_of_tasks_in_system_with_properties(&self, properties: TaskProperties) -> usize {
        let executed = self.count(TaskStatus::Executed, properties);
        let popped = self.count(TaskStatus::Popped, properties);
        let added = self.count(TaskStatus::Added, properties);
        debug_assert!(
            added >= executed + popped,
            "{properties}: added {added} < executed {executed} + popped {popped}"
        );
        added.saturating_sub(executed + popped)
    }

    /// Tasks accepted but not yet executed or popped, over all classifications.
    fn count_of_tasks_in_system(&self) -> usize {
        TaskProperties::all()
            .map(|p| self.count_of_tasks_in_system_with_properties(p))
            .sum()
    }

    /// Serializable view of every classification with non-zero counters.
    fn snapshot(&self) -> StatisticsSnapshot {
        let classifications: Vec<ClassificationCounts> = TaskProperties::all()
            .filter_map(|properties| {
                let executed = self.count(TaskStatus::Executed, properties);
                let popped = self.count(TaskStatus::Popped, properties);
                let added = self.count(TaskStatus::Added, properties);
                if added == 0 && executed == 0 && popped == 0 {
                    return None;
                }
                Some(ClassificationCounts {
                    properties,
                    added,
                    executed,
                    popped,
                    in_system: added.saturating_sub(executed + popped),
                })
            })
            .collect();
        let tasks_in_system = classifications.iter().map(|c| c.in_system).sum();
        StatisticsSnapshot {
            captured_at: Utc::now(),
            tasks_in_system,
            classifications,
        }
    }
}

/// Counters of one classification at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationCounts {
    pub properties: TaskProperties,
    pub added: usize,
    pub executed: usize,
    pub popped: usize,
    pub in_system: usize,
}

/// Point-in-time view of a [`TaskStatistics`] collector.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub tasks_in_system: usize,
    pub classifications: Vec<ClassificationCounts>,
}

impl StatisticsSnapshot {
    /// Counters for `properties`, if any were non-zero.
    pub fn get(&self, properties: TaskProperties) -> Option<&ClassificationCounts> {
        self.classifications.iter().find(|c| c.properties == properties)
    }
}

/// Build the collector selected by `kind`.
pub fn create_statistics(kind: StatisticsKind) -> Arc<dyn TaskStatistics> {
    match kind {
        StatisticsKind::Simple => Arc::new(SimpleTaskStatistics::new()),
        StatisticsKind::FineGrained => Arc::new(FineGrainedTaskStatistics::new()),
        StatisticsKind::LockFree => Arc::new(LockFreeTaskStatistics::new()),
    }
}
