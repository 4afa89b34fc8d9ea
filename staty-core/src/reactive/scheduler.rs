//! Deferred execution.
//!
//! Batched handlers do not run when their action completes; they run on the
//! next scheduler tick. The store does not own an event loop, so the
//! "run after the current synchronous work" primitive is a trait. The
//! default implementation, [`TickQueue`], queues tasks until
//! [`Store::tick`](crate::Store::tick) drains them.

use std::cell::RefCell;
use std::collections::VecDeque;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Runs tasks after the current synchronous work completes.
pub trait Scheduler {
    /// Queue a task for the next tick.
    fn schedule(&self, task: Task);

    /// Run everything queued so far, including tasks queued while draining.
    /// Returns the number of tasks run. Schedulers driven by an external
    /// loop can leave this as a no-op.
    fn drain(&self) -> usize {
        0
    }

    /// Number of queued tasks.
    fn pending(&self) -> usize {
        0
    }
}

/// Manually driven task queue.
#[derive(Default)]
pub struct TickQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TickQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TickQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    fn drain(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the borrow before running: tasks may schedule more.
            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn tasks_wait_for_drain() {
        let queue = TickQueue::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        queue.schedule(Box::new(move || flag.set(true)));

        assert_eq!(queue.pending(), 1);
        assert!(!ran.get());

        assert_eq!(queue.drain(), 1);
        assert!(ran.get());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn tasks_scheduled_while_draining_run_in_same_drain() {
        let queue = Rc::new(TickQueue::new());
        let count = Rc::new(Cell::new(0));

        let inner_queue = queue.clone();
        let inner_count = count.clone();
        queue.schedule(Box::new(move || {
            inner_count.set(inner_count.get() + 1);
            let c = inner_count.clone();
            inner_queue.schedule(Box::new(move || c.set(c.get() + 1)));
        }));

        assert_eq!(queue.drain(), 2);
        assert_eq!(count.get(), 2);
    }
}
