use thiserror::Error;

use taskman_core::TaskQueueId;

use crate::scheduler::SchedulerLifecycle;

/// Misuse of the scheduler's registration and lifecycle contract.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("queue {0} is already registered")]
    DuplicateQueue(TaskQueueId),

    #[error("queue registration is closed (scheduler is {0})")]
    RegistrationClosed(SchedulerLifecycle),

    #[error("no queue registered for {0}")]
    QueueNotRegistered(TaskQueueId),

    #[error("scheduler is {actual}, expected {expected}")]
    InvalidLifecycle {
        expected: SchedulerLifecycle,
        actual: SchedulerLifecycle,
    },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
