//! The deferred task queue promises dispatch their continuations on.
//!
//! Continuations must not run inside the call that settled or registered
//! them, so every dispatch goes through a [`Scheduler`]: anything that can
//! take a boxed closure and run it after the current execution unwinds, in
//! FIFO order. [`TaskQueue`] is the concrete implementation used by tests
//! and single-threaded hosts; an embedding with its own event loop can
//! supply its own `Scheduler` instead.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Shared handle to a scheduler.
pub type SchedulerHandle = Arc<dyn Scheduler>;

/// Accepts tasks and runs them after the current execution unwinds.
///
/// Tasks must run in the order they were scheduled.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task);
}

/// A FIFO task queue drained explicitly by its owner.
///
/// Cloning yields another handle to the same queue. Tasks scheduled while
/// draining land at the back and run in the same drain.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Arc<Mutex<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// This queue as a [`SchedulerHandle`] for promise constructors.
    pub fn handle(&self) -> SchedulerHandle {
        Arc::new(self.clone())
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().unwrap().is_empty()
    }

    /// Runs the task at the front. Returns false if the queue was empty.
    pub fn run_one(&self) -> bool {
        // The task must run outside the lock: it may schedule more work.
        let task = self.tasks.lock().unwrap().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Drains the queue, including tasks scheduled mid-drain. Returns how
    /// many tasks ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for TaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks.lock().unwrap().push_back(task);
    }
}
