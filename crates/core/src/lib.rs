pub mod config;
pub mod error;
pub mod properties;
pub mod task;

pub use config::{
    SchedulerConfig, StatisticsKind, DEFAULT_QUEUE_PRIORITY, DEFAULT_WORKER_BATCH_SIZE,
    MAX_QUEUE_PRIORITY, MIN_QUEUE_PRIORITY,
};
pub use error::ConfigError;
pub use properties::{
    TaskExecutionMode, TaskProperties, TaskQueueId, TaskType, VMType, TASK_PROPERTIES_COUNT,
};
pub use task::{Runnable, Task};
