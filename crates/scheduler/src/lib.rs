//! In-process task scheduler.
//!
//! Producers push classified [`Task`]s into per-classification
//! [`TaskQueue`]s, either directly or through [`TaskScheduler::add_task`].
//! The scheduler owns a fixed pool of worker threads that repeatedly fill a
//! small local batch from the registered queues (weighted by queue priority)
//! and run it. [`TaskStatistics`] collectors observe every task as it is
//! added, executed or popped.

pub mod error;
pub mod queue;
pub mod scheduler;
pub mod statistics;
mod sync;
mod worker;

pub use error::SchedulerError;
pub use queue::{TaskQueue, TaskQueueSubscriber};
pub use scheduler::{SchedulerLifecycle, TaskScheduler};
pub use statistics::{
    create_statistics, ClassificationCounts, FineGrainedTaskStatistics, LockFreeTaskStatistics,
    SimpleTaskStatistics, StatisticsSnapshot, TaskStatistics, TaskStatus,
};

pub use taskman_core::{
    SchedulerConfig, StatisticsKind, Task, TaskExecutionMode, TaskProperties, TaskQueueId,
    TaskType, VMType, DEFAULT_QUEUE_PRIORITY, MAX_QUEUE_PRIORITY, MIN_QUEUE_PRIORITY,
};
