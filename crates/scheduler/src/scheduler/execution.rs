use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use taskman_core::{Task, TaskProperties};

use crate::error::SchedulerError;
use crate::queue::QueueCore;
use crate::statistics::TaskStatus;
use crate::sync::{lock, wait};
use crate::worker::WorkerBatch;

use super::core::{SchedulerLifecycle, SchedulerShared, SchedulerState, TaskScheduler};
use super::selection::select_queue;

impl SchedulerState {
    fn has_queued_work(&self) -> bool {
        self.queues.values().any(|queue| !queue.is_empty())
    }

    /// Every queue empty and no task sitting in, or running on, a worker.
    fn no_more_tasks(&self) -> bool {
        !self.has_queued_work() && self.tasks_in_workers == 0
    }
}

impl SchedulerShared {
    /// Top up an (empty) worker batch with up to `count` tasks.
    ///
    /// Blocks while no registered queue has work and shutdown has not been
    /// signalled. Popping a task and accounting it to the worker happen in
    /// the same critical section, so the shutdown check can never miss a
    /// task in transit between a queue and a batch.
    ///
    /// Returns `true` when this is the worker's terminal fill.
    pub(crate) fn fill_with_tasks(&self, batch: &mut WorkerBatch, count: usize) -> bool {
        let _pool = lock(&self.pool_lock);
        let mut state = lock(&self.state);

        while !state.shutdown && !state.has_queued_work() {
            // An owner may have popped its queue directly; let finalize re-check.
            self.progress.notify_all();
            state = wait(&self.work_available, state);
        }

        let mut moved = 0;
        while moved < count {
            let SchedulerState { queues, rng, .. } = &mut *state;
            let Some(queue) = select_queue(queues, rng) else {
                break;
            };
            match queue.try_pop_task() {
                Some(task) => {
                    batch.push(task);
                    moved += 1;
                }
                // Raced with a bypass consumer; pick again.
                None => continue,
            }
        }
        state.tasks_in_workers += moved;
        trace!(moved, in_workers = state.tasks_in_workers, "worker batch filled");

        moved == 0 && state.shutdown
    }

    /// A worker finished running `executed` tasks from its batch.
    pub(crate) fn worker_idle(&self, executed: usize) {
        let mut state = lock(&self.state);
        state.tasks_in_workers -= executed;
        self.progress.notify_all();
    }

    fn queue_for(&self, state: &SchedulerState, properties: TaskProperties) -> Result<Arc<QueueCore>, SchedulerError> {
        let id = properties.queue_id();
        state
            .queues
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::QueueNotRegistered(id))
    }
}

impl TaskScheduler {
    /// Enqueue `task` in the queue registered for its classification and
    /// return that queue's new size. Idle workers are woken by the queue's
    /// subscription.
    pub fn add_task(&self, task: Task) -> Result<usize, SchedulerError> {
        let queue = {
            let state = lock(&self.shared.state);
            if state.lifecycle == SchedulerLifecycle::Finalized {
                return Err(SchedulerError::InvalidLifecycle {
                    expected: SchedulerLifecycle::Initialized,
                    actual: state.lifecycle,
                });
            }
            self.shared.queue_for(&state, task.properties())?
        };
        // The queue's lock and then its subscriber (which takes our lock) are
        // taken here; our lock must already be released.
        Ok(queue.add_task(task))
    }

    /// Synchronously take one task of exactly `properties` (including its
    /// execution mode), bypassing the worker pool. The caller runs it.
    ///
    /// Returns `Ok(None)` when the queue has no such task right now.
    pub fn get_task_by_properties(&self, properties: TaskProperties) -> Result<Option<Task>, SchedulerError> {
        let state = lock(&self.shared.state);
        let queue = self.shared.queue_for(&state, properties)?;
        let task = queue.try_pop_task_with_mode(properties.execution_mode());
        if task.is_some() {
            self.shared
                .statistics
                .increment_count(TaskStatus::Popped, properties, 1);
            self.shared.progress.notify_all();
        }
        Ok(task)
    }

    /// Block until every task with `properties` that was added so far has
    /// been executed or popped.
    ///
    /// Relies on the statistics collector, so it only sees tasks that went
    /// through a registered queue.
    pub fn wait_for_finish_all_tasks_with_properties(&self, properties: TaskProperties) {
        let statistics = Arc::clone(&self.shared.statistics);
        let mut state = lock(&self.shared.state);
        while statistics.count_of_tasks_in_system_with_properties(properties) > 0 {
            state = wait(&self.shared.progress, state);
        }
        debug!(%properties, "all tasks finished");
    }

    /// Drain every queue, stop and join the workers, and unsubscribe from
    /// all queues.
    ///
    /// Waits until no queue holds a task and no worker holds or runs one;
    /// tasks may keep adding tasks until then.
    pub fn finalize(&self) -> Result<(), SchedulerError> {
        {
            let mut state = lock(&self.shared.state);
            if state.lifecycle != SchedulerLifecycle::Initialized {
                return Err(SchedulerError::InvalidLifecycle {
                    expected: SchedulerLifecycle::Initialized,
                    actual: state.lifecycle,
                });
            }
            state.lifecycle = SchedulerLifecycle::Finalizing;
            info!("task scheduler finalizing");

            while !state.no_more_tasks() {
                state = wait(&self.shared.progress, state);
            }
            state.shutdown = true;
            self.shared.work_available.notify_all();
        }

        let workers = std::mem::take(&mut *lock(&self.workers));
        let joined = workers.len();
        for worker in workers {
            worker.join();
        }
        self.unsubscribe_queues();

        let mut state = lock(&self.shared.state);
        state.lifecycle = SchedulerLifecycle::Finalized;
        self.shared.progress.notify_all();
        info!(workers = joined, "task scheduler finalized");
        Ok(())
    }

    pub(super) fn unsubscribe_queues(&self) {
        let queues: Vec<Arc<QueueCore>> = lock(&self.shared.state).queues.values().cloned().collect();
        for queue in queues {
            queue.unsubscribe();
            if !queue.is_empty() {
                warn!(queue = %queue.id(), size = queue.size(), "queue still holds tasks after unsubscribe");
            }
        }
    }
}
