use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, error, info};

use taskman_core::{SchedulerConfig, TaskProperties, TaskQueueId};

use crate::error::SchedulerError;
use crate::queue::{QueueCore, TaskQueue, TaskQueueSubscriber};
use crate::statistics::{create_statistics, TaskStatistics, TaskStatus};
use crate::sync::lock;
use crate::worker::WorkerThread;

/// Lifecycle of a [`TaskScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerLifecycle {
    /// Queues may be registered; no workers yet.
    Created,
    /// Workers are running.
    Initialized,
    /// `finalize` is draining the pool.
    Finalizing,
    /// Workers joined, queues unsubscribed.
    Finalized,
}

impl fmt::Display for SchedulerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerLifecycle::Created => "created",
            SchedulerLifecycle::Initialized => "initialized",
            SchedulerLifecycle::Finalizing => "finalizing",
            SchedulerLifecycle::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Everything guarded by the main scheduler lock.
pub(crate) struct SchedulerState {
    pub(crate) lifecycle: SchedulerLifecycle,
    /// Set once no work is left; fillers return empty-handed afterwards.
    pub(crate) shutdown: bool,
    /// Borrowed queues, keyed and iterated in id order.
    pub(crate) queues: BTreeMap<TaskQueueId, Arc<QueueCore>>,
    /// Tasks moved into worker batches and not yet reported back as run.
    pub(crate) tasks_in_workers: usize,
    pub(crate) rng: StdRng,
}

/// State shared between the handle, its workers and its queue subscriptions.
pub(crate) struct SchedulerShared {
    pub(crate) statistics: Arc<dyn TaskStatistics>,
    /// Serializes `fill_with_tasks` across workers. Always taken before `state`.
    pub(crate) pool_lock: Mutex<()>,
    pub(crate) state: Mutex<SchedulerState>,
    /// Fillers wait here for work or shutdown.
    pub(crate) work_available: Condvar,
    /// `finalize` and per-classification waiters wait here for progress.
    pub(crate) progress: Condvar,
}

/// Bridges queue notifications into the scheduler.
///
/// Holds a weak reference: queues outlive neither their owner's interest in
/// the scheduler nor the scheduler itself.
struct SchedulerSubscriber {
    shared: Weak<SchedulerShared>,
}

impl TaskQueueSubscriber for SchedulerSubscriber {
    fn on_task_accepted(&self, properties: TaskProperties) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .statistics
                .increment_count(TaskStatus::Added, properties, 1);
        }
    }

    fn on_task_added(&self, _properties: TaskProperties, _queue_size: usize, was_empty: bool) {
        // A filler only sleeps after seeing every queue empty under the
        // scheduler lock, so only the push that ends an empty period can
        // have a sleeper to wake.
        if !was_empty {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            let _state = lock(&shared.state);
            shared.work_available.notify_all();
        }
    }

    fn on_task_popped(&self, properties: TaskProperties, count: usize) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .statistics
                .increment_count(TaskStatus::Popped, properties, count);
            let _state = lock(&shared.state);
            shared.progress.notify_all();
        }
    }
}

/// The task scheduler.
///
/// Producers register their [`TaskQueue`]s while the scheduler is
/// [`Created`](SchedulerLifecycle::Created), then [`initialize`](Self::initialize)
/// starts the worker pool and [`finalize`](Self::finalize) drains and joins
/// it. Share the scheduler by wrapping it in an `Arc`; there is no global
/// instance.
pub struct TaskScheduler {
    pub(super) shared: Arc<SchedulerShared>,
    pub(super) config: SchedulerConfig,
    pub(super) workers: Mutex<Vec<WorkerThread>>,
}

impl TaskScheduler {
    /// Create a scheduler whose statistics collector is chosen by
    /// `config.statistics`.
    pub fn new(config: SchedulerConfig) -> Self {
        let statistics = create_statistics(config.statistics);
        Self::with_statistics(config, statistics)
    }

    /// Create a scheduler reporting into an existing statistics collector.
    pub fn with_statistics(config: SchedulerConfig, statistics: Arc<dyn TaskStatistics>) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        debug!(
            workers = config.resolved_worker_threads(),
            batch = config.worker_batch_size,
            statistics = %config.statistics,
            "task scheduler created"
        );
        Self {
            shared: Arc::new(SchedulerShared {
                statistics,
                pool_lock: Mutex::new(()),
                state: Mutex::new(SchedulerState {
                    lifecycle: SchedulerLifecycle::Created,
                    shutdown: false,
                    queues: BTreeMap::new(),
                    tasks_in_workers: 0,
                    rng,
                }),
                work_available: Condvar::new(),
                progress: Condvar::new(),
            }),
            config,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Register `queue` under its `(TaskType, VMType)` id and subscribe to
    /// its new-task notifications.
    ///
    /// The scheduler never takes over the queue's lifecycle: the owner keeps
    /// the [`TaskQueue`] handle and must keep it alive until the scheduler is
    /// finalized. Tasks already in the queue are counted as added.
    pub fn register_queue(&self, queue: &TaskQueue) -> Result<TaskQueueId, SchedulerError> {
        let mut state = lock(&self.shared.state);
        if state.lifecycle != SchedulerLifecycle::Created {
            return Err(SchedulerError::RegistrationClosed(state.lifecycle));
        }
        let id = queue.id();
        if state.queues.contains_key(&id) {
            return Err(SchedulerError::DuplicateQueue(id));
        }

        let core = queue.core();
        let subscriber = Arc::new(SchedulerSubscriber {
            shared: Arc::downgrade(&self.shared),
        });
        core.subscribe_with_pending(subscriber, |mode, pending| {
            let properties = TaskProperties::new(queue.task_type(), queue.vm_type(), mode);
            self.shared
                .statistics
                .increment_count(TaskStatus::Added, properties, pending);
        });
        state.queues.insert(id, Arc::clone(core));
        debug!(queue = %id, priority = queue.priority(), "queue registered");
        Ok(id)
    }

    /// Spawn the worker pool. Registration is closed from here on.
    pub fn initialize(&self) -> Result<(), SchedulerError> {
        {
            let mut state = lock(&self.shared.state);
            if state.lifecycle != SchedulerLifecycle::Created {
                return Err(SchedulerError::InvalidLifecycle {
                    expected: SchedulerLifecycle::Created,
                    actual: state.lifecycle,
                });
            }
            state.lifecycle = SchedulerLifecycle::Initialized;
        }

        let count = self.config.resolved_worker_threads();
        let batch_size = self.config.worker_batch_size.max(1);
        let mut workers = lock(&self.workers);
        for id in 0..count {
            workers.push(WorkerThread::spawn(id, Arc::clone(&self.shared), batch_size)?);
        }
        info!(workers = count, batch = batch_size, "task scheduler initialized");
        Ok(())
    }

    pub fn lifecycle(&self) -> SchedulerLifecycle {
        lock(&self.shared.state).lifecycle
    }

    /// Number of spawned worker threads.
    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Ids of every registered queue, in selection order.
    pub fn registered_queue_ids(&self) -> Vec<TaskQueueId> {
        lock(&self.shared.state).queues.keys().copied().collect()
    }

    /// The collector this scheduler reports task lifecycle events into.
    pub fn statistics(&self) -> Arc<dyn TaskStatistics> {
        Arc::clone(&self.shared.statistics)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl Drop for TaskScheduler {
    /// Destroying a running scheduler drains and joins it first, so worker
    /// threads never outlive their handle. A task must not own the last
    /// handle of the scheduler that runs it.
    fn drop(&mut self) {
        match self.lifecycle() {
            SchedulerLifecycle::Initialized => {
                error!("task scheduler dropped while running; finalizing");
                if let Err(e) = self.finalize() {
                    error!(error = %e, "implicit finalize failed");
                }
            }
            SchedulerLifecycle::Created => self.unsubscribe_queues(),
            SchedulerLifecycle::Finalizing | SchedulerLifecycle::Finalized => {}
        }
    }
}
