//! Worker threads of the scheduler's pool.

use std::any::Any;
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use taskman_core::{Task, TaskExecutionMode};

use crate::scheduler::SchedulerShared;
use crate::statistics::{TaskStatistics, TaskStatus};

/// A worker's local two-tier batch. Foreground tasks run first; each tier is
/// FIFO.
#[derive(Debug, Default)]
pub(crate) struct WorkerBatch {
    foreground: VecDeque<Task>,
    background: VecDeque<Task>,
}

impl WorkerBatch {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            foreground: VecDeque::with_capacity(capacity),
            background: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, task: Task) {
        match task.properties().execution_mode() {
            TaskExecutionMode::Foreground => self.foreground.push_back(task),
            TaskExecutionMode::Background => self.background.push_back(task),
        }
    }

    pub(crate) fn pop_next(&mut self) -> Option<Task> {
        self.foreground
            .pop_front()
            .or_else(|| self.background.pop_front())
    }

    pub(crate) fn len(&self) -> usize {
        self.foreground.len() + self.background.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.foreground.is_empty() && self.background.is_empty()
    }

    /// Run every task in the batch, counting each as executed. Returns how
    /// many ran.
    ///
    /// A panicking task is logged and still counted; the rest of the batch
    /// runs and the worker stays alive.
    pub(crate) fn run_all(&mut self, statistics: &dyn TaskStatistics) -> usize {
        let mut executed = 0;
        while let Some(mut task) = self.pop_next() {
            let properties = task.properties();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run_task())) {
                error!(%properties, panic = panic_message(payload.as_ref()), "task panicked");
            }
            statistics.increment_count(TaskStatus::Executed, properties, 1);
            executed += 1;
        }
        executed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// One OS thread draining batches handed out by the scheduler.
pub(crate) struct WorkerThread {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    pub(crate) fn spawn(id: usize, shared: Arc<SchedulerShared>, batch_size: usize) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("taskman-worker-{id}"))
            .spawn(move || worker_loop(id, &shared, batch_size))?;
        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    /// Wait for the thread to exit. Only returns once the scheduler has
    /// signalled shutdown.
    pub(crate) fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = self.id, "worker thread panicked");
            }
        }
    }
}

fn worker_loop(id: usize, shared: &SchedulerShared, batch_size: usize) {
    debug!(worker = id, "worker started");
    let mut batch = WorkerBatch::with_capacity(batch_size);
    loop {
        let terminal = shared.fill_with_tasks(&mut batch, batch_size);
        if !batch.is_empty() {
            let executed = batch.run_all(shared.statistics.as_ref());
            shared.worker_idle(executed);
        }
        if terminal {
            break;
        }
    }
    debug!(worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use taskman_core::{TaskProperties, TaskType, VMType};

    use super::*;
    use crate::statistics::LockFreeTaskStatistics;

    const GC_FG: TaskProperties =
        TaskProperties::new(TaskType::Gc, VMType::StaticVm, TaskExecutionMode::Foreground);
    const JIT_BG: TaskProperties =
        TaskProperties::new(TaskType::Jit, VMType::StaticVm, TaskExecutionMode::Background);

    fn labelled(properties: TaskProperties, log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Task {
        let log = Arc::clone(log);
        Task::create(properties, move || log.lock().unwrap().push(label))
    }

    #[test]
    fn batch_runs_foreground_first_then_fifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut batch = WorkerBatch::with_capacity(4);
        batch.push(labelled(JIT_BG, &log, "jit1"));
        batch.push(labelled(GC_FG, &log, "gc"));
        batch.push(labelled(JIT_BG, &log, "jit2"));
        assert_eq!(batch.len(), 3);

        let statistics = LockFreeTaskStatistics::new();
        assert_eq!(batch.run_all(&statistics), 3);
        assert!(batch.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["gc", "jit1", "jit2"]);
        assert_eq!(statistics.count(TaskStatus::Executed, GC_FG), 1);
        assert_eq!(statistics.count(TaskStatus::Executed, JIT_BG), 2);
    }

    #[test]
    fn panicking_task_does_not_stop_the_batch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut batch = WorkerBatch::with_capacity(4);
        batch.push(Task::create(GC_FG, || panic!("task body failed")));
        batch.push(labelled(JIT_BG, &log, "after"));

        let statistics = LockFreeTaskStatistics::new();
        assert_eq!(batch.run_all(&statistics), 2);
        assert!(batch.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert_eq!(statistics.count(TaskStatus::Executed, GC_FG), 1);
    }
}
