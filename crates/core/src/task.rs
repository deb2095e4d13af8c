use std::fmt;

use crate::properties::TaskProperties;

/// The single capability a task body has: run once, consuming itself.
///
/// Implemented for every `FnOnce() + Send + 'static` closure. Captured state
/// must be owned or reference-counted, since the body runs on whichever
/// worker thread picks it up.
pub trait Runnable: Send + 'static {
    fn run(self: Box<Self>);
}

impl<F> Runnable for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// A classified, one-shot unit of work.
///
/// Tasks are moved, never copied. A task becomes invalid once it has run or
/// after [`Task::make_invalid`]; an invalid task has no properties and cannot
/// run again.
pub struct Task {
    properties: Option<TaskProperties>,
    runner: Option<Box<dyn Runnable>>,
}

impl Task {
    /// Build a task from its classification and body.
    pub fn create<F>(properties: TaskProperties, runner: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            properties: Some(properties),
            runner: Some(Box::new(runner)),
        }
    }

    /// Classification of this task.
    ///
    /// # Panics
    ///
    /// If the task is invalid.
    pub fn properties(&self) -> TaskProperties {
        match self.properties {
            Some(properties) => properties,
            None => panic!("invalid task has no properties"),
        }
    }

    /// Invoke the body. The task is invalid afterwards.
    ///
    /// # Panics
    ///
    /// If the task is invalid (already run, or made invalid).
    pub fn run_task(&mut self) {
        let runner = self.runner.take();
        assert!(runner.is_some(), "attempt to run an invalid task");
        self.properties = None;
        if let Some(runner) = runner {
            runner.run();
        }
    }

    /// Drop the body and classification without running it.
    pub fn make_invalid(&mut self) {
        self.properties = None;
        self.runner = None;
    }

    pub fn is_valid(&self) -> bool {
        self.properties.is_some() && self.runner.is_some()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("properties", &self.properties)
            .field("valid", &self.is_valid())
            .finish()
    }
}
