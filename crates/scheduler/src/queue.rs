//! Thread-safe per-classification task queue.
//!
//! A [`TaskQueue`] holds tasks of one `(TaskType, VMType)` pair in two FIFOs,
//! foreground and background. Foreground work is always handed out first.
//!
//! Two locks are involved:
//! 1. the internal lock guarding both FIFOs and the finished flag;
//! 2. the subscriber lock guarding the notification target, a leaf only
//!    ever taken for a moment, possibly under (1).
//!
//! `add_task` reads the subscriber and reports the task as accepted under
//! (1), so subscribing and counting what is already queued happen atomically
//! with respect to producers. Everything else a subscriber hears about
//! (`on_task_added`, `on_task_popped`) is delivered after (1) is released:
//! the subscriber (the scheduler) may take its own lock and, while holding
//! it, call back into the queue's internal lock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, trace};

use taskman_core::{
    Task, TaskExecutionMode, TaskProperties, TaskQueueId, TaskType, VMType, MAX_QUEUE_PRIORITY,
    MIN_QUEUE_PRIORITY,
};

use crate::sync::{lock, wait};

/// Receiver of queue notifications. At most one per queue.
pub trait TaskQueueSubscriber: Send + Sync {
    /// Called before `properties`' task becomes visible to consumers, with
    /// the queue's internal lock held. Must not block or touch the queue.
    fn on_task_accepted(&self, _properties: TaskProperties) {}

    /// Called after the task is enqueued, with no queue lock held.
    /// `was_empty` is true when the queue held nothing before this task.
    fn on_task_added(&self, properties: TaskProperties, queue_size: usize, was_empty: bool);

    /// Called after `count` tasks of `properties` were taken out through the
    /// queue's public pop methods, with no queue lock held.
    fn on_task_popped(&self, _properties: TaskProperties, _count: usize) {}
}

#[derive(Default)]
struct QueueState {
    foreground: VecDeque<Task>,
    background: VecDeque<Task>,
    finished: bool,
}

impl QueueState {
    fn is_empty(&self) -> bool {
        self.foreground.is_empty() && self.background.is_empty()
    }

    fn len(&self) -> usize {
        self.foreground.len() + self.background.len()
    }

    fn sequence(&mut self, mode: TaskExecutionMode) -> &mut VecDeque<Task> {
        match mode {
            TaskExecutionMode::Foreground => &mut self.foreground,
            TaskExecutionMode::Background => &mut self.background,
        }
    }

    fn has(&self, mode: TaskExecutionMode) -> bool {
        match mode {
            TaskExecutionMode::Foreground => !self.foreground.is_empty(),
            TaskExecutionMode::Background => !self.background.is_empty(),
        }
    }

    fn pop_front(&mut self) -> Option<Task> {
        self.foreground
            .pop_front()
            .or_else(|| self.background.pop_front())
    }
}

/// Shared part of a queue. The owning [`TaskQueue`] and the scheduler's
/// registry both point at it; only the owner finishes it.
pub(crate) struct QueueCore {
    task_type: TaskType,
    vm_type: VMType,
    priority: AtomicU8,
    state: Mutex<QueueState>,
    /// Signalled on push and on finish.
    pushed: Condvar,
    /// Signalled on every pop.
    drained: Condvar,
    subscriber: Mutex<Option<Arc<dyn TaskQueueSubscriber>>>,
}

impl QueueCore {
    pub(crate) fn id(&self) -> TaskQueueId {
        TaskQueueId::new(self.task_type, self.vm_type)
    }

    pub(crate) fn priority(&self) -> u8 {
        self.priority.load(Ordering::Acquire)
    }

    pub(crate) fn add_task(&self, task: Task) -> usize {
        let properties = task.properties();
        assert!(
            properties.task_type() == self.task_type && properties.vm_type() == self.vm_type,
            "task {properties} does not belong to queue {}",
            self.id()
        );

        let (size, was_empty, subscriber) = {
            let mut state = lock(&self.state);
            let subscriber = lock(&self.subscriber).clone();
            if let Some(subscriber) = &subscriber {
                subscriber.on_task_accepted(properties);
            }
            let was_empty = state.is_empty();
            state.sequence(properties.execution_mode()).push_back(task);
            self.pushed.notify_all();
            (state.len(), was_empty, subscriber)
        };
        trace!(queue = %self.id(), size, "task added");

        if let Some(subscriber) = subscriber {
            subscriber.on_task_added(properties, size, was_empty);
        }
        size
    }

    pub(crate) fn pop_task(&self) -> Option<Task> {
        let mut state = lock(&self.state);
        while state.is_empty() {
            if state.finished {
                return None;
            }
            state = wait(&self.pushed, state);
        }
        let task = state.pop_front();
        self.drained.notify_all();
        task
    }

    pub(crate) fn pop_task_with_mode(&self, mode: TaskExecutionMode) -> Option<Task> {
        let mut state = lock(&self.state);
        while !state.has(mode) {
            if state.finished {
                return None;
            }
            state = wait(&self.pushed, state);
        }
        let task = state.sequence(mode).pop_front();
        self.drained.notify_all();
        task
    }

    pub(crate) fn try_pop_task(&self) -> Option<Task> {
        let mut state = lock(&self.state);
        let task = state.pop_front();
        if task.is_some() {
            self.drained.notify_all();
        }
        task
    }

    pub(crate) fn try_pop_task_with_mode(&self, mode: TaskExecutionMode) -> Option<Task> {
        let mut state = lock(&self.state);
        let task = state.sequence(mode).pop_front();
        if task.is_some() {
            self.drained.notify_all();
        }
        task
    }

    pub(crate) fn pop_tasks_to_worker(&self, mut sink: impl FnMut(Task), count: usize) -> usize {
        let mut state = lock(&self.state);
        let count = count.min(state.len());
        for _ in 0..count {
            if let Some(task) = state.pop_front() {
                sink(task);
            }
        }
        if count > 0 {
            self.drained.notify_all();
        }
        count
    }

    pub(crate) fn is_empty(&self) -> bool {
        lock(&self.state).is_empty()
    }

    pub(crate) fn size(&self) -> usize {
        lock(&self.state).len()
    }

    pub(crate) fn has_task_with_execution_mode(&self, mode: TaskExecutionMode) -> bool {
        lock(&self.state).has(mode)
    }

    /// Install `subscriber` and hand every already-queued `(mode, count)` to
    /// `pending`, both under the internal lock: a concurrent `add_task` is
    /// reported either as pending or as accepted, never both.
    pub(crate) fn subscribe_with_pending(
        &self,
        subscriber: Arc<dyn TaskQueueSubscriber>,
        mut pending: impl FnMut(TaskExecutionMode, usize),
    ) {
        let mut state = lock(&self.state);
        *lock(&self.subscriber) = Some(subscriber);
        for mode in TaskExecutionMode::ALL {
            let count = state.sequence(mode).len();
            if count > 0 {
                pending(mode, count);
            }
        }
    }

    /// Report tasks taken out by the owner to the subscriber.
    fn notify_popped(&self, properties: TaskProperties, count: usize) {
        if count == 0 {
            return;
        }
        let subscriber = lock(&self.subscriber).clone();
        if let Some(subscriber) = subscriber {
            subscriber.on_task_popped(properties, count);
        }
    }

    fn properties_for(&self, mode: TaskExecutionMode) -> TaskProperties {
        TaskProperties::new(self.task_type, self.vm_type, mode)
    }

    pub(crate) fn unsubscribe(&self) {
        *lock(&self.subscriber) = None;
    }

    pub(crate) fn wait_for_queue_empty_and_finish(&self) {
        let mut state = lock(&self.state);
        while !state.is_empty() {
            state = wait(&self.drained, state);
        }
        state.finished = true;
        self.pushed.notify_all();
        debug!(queue = %self.id(), "queue finished");
    }
}

/// Owning handle of a task queue.
///
/// Dropping the handle blocks until every enqueued task has been taken out,
/// then finishes the queue: no task is ever silently discarded.
pub struct TaskQueue {
    core: Arc<QueueCore>,
}

impl TaskQueue {
    /// Create a queue for `(task_type, vm_type)` with a selection weight in
    /// `MIN_QUEUE_PRIORITY..=MAX_QUEUE_PRIORITY`.
    ///
    /// # Panics
    ///
    /// If `priority` is out of range.
    pub fn new(task_type: TaskType, vm_type: VMType, priority: u8) -> Self {
        assert_priority(priority);
        Self {
            core: Arc::new(QueueCore {
                task_type,
                vm_type,
                priority: AtomicU8::new(priority),
                state: Mutex::new(QueueState::default()),
                pushed: Condvar::new(),
                drained: Condvar::new(),
                subscriber: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> TaskQueueId {
        self.core.id()
    }

    pub fn task_type(&self) -> TaskType {
        self.core.task_type
    }

    pub fn vm_type(&self) -> VMType {
        self.core.vm_type
    }

    /// Enqueue `task` and return the queue's new size.
    ///
    /// # Panics
    ///
    /// If the task's type or VM does not match the queue's.
    pub fn add_task(&self, task: Task) -> usize {
        self.core.add_task(task)
    }

    /// Block until a task is available (foreground first) or the queue is
    /// finished, in which case `None` is returned.
    ///
    /// Every pop below is reported to the subscriber, so a registered
    /// queue's owner may drain it directly.
    pub fn pop_task(&self) -> Option<Task> {
        self.popped(self.core.pop_task())
    }

    /// Like [`pop_task`](Self::pop_task), but waits on and takes from one
    /// execution mode only.
    pub fn pop_task_with_mode(&self, mode: TaskExecutionMode) -> Option<Task> {
        self.popped(self.core.pop_task_with_mode(mode))
    }

    /// Pop without blocking.
    pub fn try_pop_task(&self) -> Option<Task> {
        self.popped(self.core.try_pop_task())
    }

    /// Move up to `count` tasks into `sink` without blocking; returns how
    /// many were moved.
    pub fn pop_tasks_to_worker(&self, mut sink: impl FnMut(Task), count: usize) -> usize {
        let mut per_mode = [0usize; 2];
        let moved = self.core.pop_tasks_to_worker(
            |task| {
                per_mode[task.properties().execution_mode() as usize] += 1;
                sink(task);
            },
            count,
        );
        for mode in TaskExecutionMode::ALL {
            self.core
                .notify_popped(self.core.properties_for(mode), per_mode[mode as usize]);
        }
        moved
    }

    fn popped(&self, task: Option<Task>) -> Option<Task> {
        if let Some(task) = &task {
            self.core.notify_popped(task.properties(), 1);
        }
        task
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    pub fn size(&self) -> usize {
        self.core.size()
    }

    pub fn has_task_with_execution_mode(&self, mode: TaskExecutionMode) -> bool {
        self.core.has_task_with_execution_mode(mode)
    }

    pub fn priority(&self) -> u8 {
        self.core.priority()
    }

    /// # Panics
    ///
    /// If `priority` is out of range.
    pub fn set_priority(&self, priority: u8) {
        assert_priority(priority);
        self.core.priority.store(priority, Ordering::Release);
    }

    /// Register the single notification target, replacing any previous one.
    pub fn subscribe(&self, subscriber: Arc<dyn TaskQueueSubscriber>) {
        self.core.subscribe_with_pending(subscriber, |_, _| {});
    }

    pub fn unsubscribe(&self) {
        self.core.unsubscribe();
    }

    /// Block until both FIFOs are empty, then finish the queue: blocked and
    /// future pops on an empty queue return `None`.
    pub fn wait_for_queue_empty_and_finish(&self) {
        self.core.wait_for_queue_empty_and_finish();
    }

    pub(crate) fn core(&self) -> &Arc<QueueCore> {
        &self.core
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.core.wait_for_queue_empty_and_finish();
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("size", &self.size())
            .finish()
    }
}

fn assert_priority(priority: u8) {
    assert!(
        (MIN_QUEUE_PRIORITY..=MAX_QUEUE_PRIORITY).contains(&priority),
        "queue priority {priority} outside {MIN_QUEUE_PRIORITY}..={MAX_QUEUE_PRIORITY}"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    use taskman_core::DEFAULT_QUEUE_PRIORITY;

    use super::*;

    const GC_FG: TaskProperties =
        TaskProperties::new(TaskType::Gc, VMType::StaticVm, TaskExecutionMode::Foreground);
    const GC_BG: TaskProperties =
        TaskProperties::new(TaskType::Gc, VMType::StaticVm, TaskExecutionMode::Background);
    const JIT_BG: TaskProperties =
        TaskProperties::new(TaskType::Jit, VMType::StaticVm, TaskExecutionMode::Background);

    fn gc_queue() -> TaskQueue {
        TaskQueue::new(TaskType::Gc, VMType::StaticVm, DEFAULT_QUEUE_PRIORITY)
    }

    /// Task whose body appends `label` to `log`.
    fn logging_task(properties: TaskProperties, log: &Arc<Mutex<Vec<String>>>, label: &str) -> Task {
        let log = Arc::clone(log);
        let label = label.to_string();
        Task::create(properties, move || log.lock().unwrap().push(label))
    }

    #[derive(Default)]
    struct RecordingSubscriber {
        accepted: AtomicUsize,
        added: Mutex<Vec<(usize, bool)>>,
        popped: Mutex<Vec<(TaskExecutionMode, usize)>>,
    }

    impl TaskQueueSubscriber for RecordingSubscriber {
        fn on_task_accepted(&self, _properties: TaskProperties) {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        }

        fn on_task_added(&self, _properties: TaskProperties, queue_size: usize, was_empty: bool) {
            self.added.lock().unwrap().push((queue_size, was_empty));
        }

        fn on_task_popped(&self, properties: TaskProperties, count: usize) {
            self.popped
                .lock()
                .unwrap()
                .push((properties.execution_mode(), count));
        }
    }

    #[test]
    fn add_task_returns_new_size() {
        let queue = gc_queue();
        assert!(queue.is_empty());
        assert_eq!(queue.add_task(Task::create(GC_BG, || {})), 1);
        assert_eq!(queue.add_task(Task::create(GC_FG, || {})), 2);
        assert_eq!(queue.size(), 2);
        assert!(queue.has_task_with_execution_mode(TaskExecutionMode::Foreground));
        assert!(queue.has_task_with_execution_mode(TaskExecutionMode::Background));
        while queue.try_pop_task().is_some() {}
    }

    #[test]
    fn foreground_before_background_and_fifo_per_mode() {
        let queue = gc_queue();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.add_task(logging_task(GC_BG, &log, "bg1"));
        queue.add_task(logging_task(GC_FG, &log, "fg1"));
        queue.add_task(logging_task(GC_BG, &log, "bg2"));
        queue.add_task(logging_task(GC_FG, &log, "fg2"));

        while !queue.is_empty() {
            queue.pop_task().unwrap().run_task();
        }
        assert_eq!(*log.lock().unwrap(), vec!["fg1", "fg2", "bg1", "bg2"]);
    }

    #[test]
    fn pop_with_mode_only_touches_that_mode() {
        let queue = gc_queue();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.add_task(logging_task(GC_FG, &log, "fg"));
        queue.add_task(logging_task(GC_BG, &log, "bg"));

        queue
            .pop_task_with_mode(TaskExecutionMode::Background)
            .unwrap()
            .run_task();
        assert_eq!(*log.lock().unwrap(), vec!["bg"]);
        assert!(!queue.has_task_with_execution_mode(TaskExecutionMode::Background));
        assert!(queue.has_task_with_execution_mode(TaskExecutionMode::Foreground));
        queue.try_pop_task().unwrap().make_invalid();
    }

    #[test]
    #[should_panic(expected = "does not belong")]
    fn add_task_rejects_foreign_classification() {
        let queue = gc_queue();
        queue.add_task(Task::create(JIT_BG, || {}));
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn zero_priority_is_rejected() {
        let _ = TaskQueue::new(TaskType::Gc, VMType::StaticVm, 0);
    }

    #[test]
    fn priority_is_adjustable() {
        let queue = gc_queue();
        assert_eq!(queue.priority(), DEFAULT_QUEUE_PRIORITY);
        queue.set_priority(MAX_QUEUE_PRIORITY);
        assert_eq!(queue.priority(), MAX_QUEUE_PRIORITY);
    }

    #[test]
    fn subscriber_sees_every_add_and_emptiness_transitions() {
        let queue = gc_queue();
        let subscriber = Arc::new(RecordingSubscriber::default());
        queue.subscribe(subscriber.clone());

        queue.add_task(Task::create(GC_BG, || {}));
        queue.add_task(Task::create(GC_BG, || {}));
        queue.unsubscribe();
        queue.add_task(Task::create(GC_BG, || {}));

        assert_eq!(subscriber.accepted.load(Ordering::Relaxed), 2);
        assert_eq!(*subscriber.added.lock().unwrap(), vec![(1, true), (2, false)]);
        assert_eq!(queue.pop_tasks_to_worker(|mut t| t.make_invalid(), 10), 3);
    }

    #[test]
    fn pop_tasks_to_worker_takes_at_most_available() {
        let queue = gc_queue();
        for _ in 0..3 {
            queue.add_task(Task::create(GC_BG, || {}));
        }
        let mut moved = Vec::new();
        assert_eq!(queue.pop_tasks_to_worker(|t| moved.push(t), 2), 2);
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.pop_tasks_to_worker(|t| moved.push(t), 5), 1);
        assert_eq!(queue.pop_tasks_to_worker(|t| moved.push(t), 5), 0);
        assert_eq!(moved.len(), 3);
    }

    #[test]
    fn blocked_pop_receives_task_from_another_thread() {
        let queue = Arc::new(gc_queue());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_task().map(|t| t.properties()))
        };
        thread::sleep(Duration::from_millis(20));
        queue.add_task(Task::create(GC_FG, || {}));
        assert_eq!(consumer.join().unwrap(), Some(GC_FG));
    }

    #[test]
    fn owner_pops_are_reported_to_subscriber() {
        let queue = gc_queue();
        let subscriber = Arc::new(RecordingSubscriber::default());
        queue.subscribe(subscriber.clone());
        for _ in 0..3 {
            queue.add_task(Task::create(GC_FG, || {}));
            queue.add_task(Task::create(GC_BG, || {}));
        }

        queue.pop_task().unwrap().run_task();
        queue.try_pop_task().unwrap().run_task();
        queue
            .pop_task_with_mode(TaskExecutionMode::Background)
            .unwrap()
            .run_task();
        assert_eq!(queue.pop_tasks_to_worker(|mut t| t.run_task(), 10), 3);

        use TaskExecutionMode::{Background, Foreground};
        assert_eq!(
            *subscriber.popped.lock().unwrap(),
            vec![
                (Foreground, 1),
                (Foreground, 1),
                (Background, 1),
                (Foreground, 1),
                (Background, 2),
            ]
        );
    }

    #[test]
    fn pending_tasks_are_counted_once_while_producer_races_subscribe() {
        const TASKS: usize = 20_000;
        let queue = Arc::new(gc_queue());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for _ in 0..TASKS {
                    queue.add_task(Task::create(GC_BG, || {}));
                }
            })
        };
        thread::sleep(Duration::from_millis(1));

        let subscriber = Arc::new(RecordingSubscriber::default());
        let mut pending = 0;
        queue
            .core()
            .subscribe_with_pending(subscriber.clone(), |_, count| pending += count);
        producer.join().unwrap();

        assert_eq!(pending + subscriber.accepted.load(Ordering::Relaxed), TASKS);
        queue.unsubscribe();
        while queue.try_pop_task().is_some() {}
    }

    #[test]
    fn pop_with_mode_keeps_waiting_for_its_own_mode() {
        let queue = Arc::new(gc_queue());
        queue.add_task(Task::create(GC_BG, || {}));
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue
                    .pop_task_with_mode(TaskExecutionMode::Foreground)
                    .map(|t| t.properties())
            })
        };

        thread::sleep(Duration::from_millis(20));
        queue.add_task(Task::create(GC_BG, || {}));
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished(), "background work must not release a foreground pop");
        assert_eq!(queue.size(), 2);

        queue.add_task(Task::create(GC_FG, || {}));
        assert_eq!(waiter.join().unwrap(), Some(GC_FG));
        assert_eq!(queue.size(), 2);
        while queue.try_pop_task().is_some() {}
    }

    #[test]
    fn finish_releases_blocked_pop_with_mode() {
        let queue = Arc::new(gc_queue());
        queue.add_task(Task::create(GC_BG, || {}));
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_task_with_mode(TaskExecutionMode::Foreground).is_none())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        queue
            .pop_task_with_mode(TaskExecutionMode::Background)
            .unwrap()
            .run_task();
        queue.wait_for_queue_empty_and_finish();
        assert!(waiter.join().unwrap(), "foreground pop must observe the finished queue");
    }

    #[test]
    fn finish_releases_blocked_pop() {
        let queue = Arc::new(gc_queue());
        queue.add_task(Task::create(GC_BG, || {}));
        queue.pop_task().unwrap().run_task();

        let blocked = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_task().is_none())
        };
        let finisher = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_for_queue_empty_and_finish())
        };
        finisher.join().unwrap();
        assert!(blocked.join().unwrap(), "blocked pop must observe the finished queue");
        assert!(queue.pop_task_with_mode(TaskExecutionMode::Foreground).is_none());
    }

    #[test]
    fn drop_waits_until_drained() {
        let queue = gc_queue();
        for _ in 0..3 {
            queue.add_task(Task::create(GC_BG, || {}));
        }
        let core = Arc::clone(queue.core());
        let drainer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut drained = 0;
            while let Some(mut task) = core.try_pop_task() {
                task.run_task();
                drained += 1;
            }
            drained
        });
        drop(queue);
        assert_eq!(drainer.join().unwrap(), 3);
    }
}
