//! Manually driven microtask queue

use super::{Microtask, Scheduler, SchedulerError};
use pledge_config::SchedulerConfig;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// FIFO microtask queue drained explicitly by its owner
///
/// Tasks queued while draining run in the same drain, after everything
/// queued before them. A drain stops with
/// [`SchedulerError::BudgetExhausted`] once it has run `budget` tasks and
/// more are still queued; the rest stay queued.
pub struct MicrotaskQueue {
    tasks: RefCell<VecDeque<Microtask>>,
    budget: Cell<usize>,
    draining: Cell<bool>,
    total_enqueued: Cell<u64>,
    total_run: Cell<u64>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::with_config(&SchedulerConfig::default())
    }

    pub fn with_config(config: &SchedulerConfig) -> Self {
        Self::with_budget(config.microtask_budget())
    }

    pub fn with_budget(budget: usize) -> Self {
        Self {
            tasks: RefCell::new(VecDeque::new()),
            budget: Cell::new(budget.max(1)),
            draining: Cell::new(false),
            total_enqueued: Cell::new(0),
            total_run: Cell::new(0),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget.get()
    }

    pub fn set_budget(&self, budget: usize) {
        self.budget.set(budget.max(1));
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Tasks queued since creation
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.get()
    }

    /// Tasks run since creation
    pub fn total_run(&self) -> u64 {
        self.total_run.get()
    }

    /// Run the oldest queued task, if any
    pub fn run_one(&self) -> Result<bool, SchedulerError> {
        let _drain = DrainGuard::acquire(&self.draining)?;
        Ok(self.pop_and_run())
    }

    /// Run tasks until the queue is empty
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> Result<usize, SchedulerError> {
        let _drain = DrainGuard::acquire(&self.draining)?;
        let budget = self.budget.get();
        let mut ran = 0;

        while self.pop_and_run() {
            ran += 1;
            if ran >= budget && !self.is_empty() {
                let remaining = self.len();
                tracing::error!(budget, remaining, "microtask budget exhausted");
                return Err(SchedulerError::BudgetExhausted { budget, remaining });
            }
        }

        Ok(ran)
    }

    fn pop_and_run(&self) -> bool {
        // Release the borrow before running: tasks queue more tasks
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                self.total_run.set(self.total_run.get() + 1);
                task();
                true
            }
            None => false,
        }
    }
}

impl Default for MicrotaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for MicrotaskQueue {
    fn queue_microtask(&self, task: Microtask) {
        self.tasks.borrow_mut().push_back(task);
        self.total_enqueued.set(self.total_enqueued.get() + 1);
    }
}

/// Marks a queue as draining; cleared on drop, including during unwinding
struct DrainGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Result<Self, SchedulerError> {
        if flag.replace(true) {
            return Err(SchedulerError::ReentrantDrain);
        }
        Ok(Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_fifo_order_including_nested() {
        let queue = Rc::new(MicrotaskQueue::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b"] {
            let log = Rc::clone(&log);
            let q = Rc::clone(&queue);
            queue.queue_microtask(Box::new(move || {
                log.borrow_mut().push(name.to_string());
                let log = Rc::clone(&log);
                q.queue_microtask(Box::new(move || log.borrow_mut().push(format!("{name}'"))));
            }));
        }

        assert_eq!(queue.run_until_idle().unwrap(), 4);
        assert_eq!(*log.borrow(), vec!["a", "b", "a'", "b'"]);
        assert_eq!(queue.total_enqueued(), 4);
        assert_eq!(queue.total_run(), 4);
    }

    #[test]
    fn test_budget_exhausted() {
        fn requeue(queue: Rc<MicrotaskQueue>) {
            let q = Rc::clone(&queue);
            queue.queue_microtask(Box::new(move || requeue(q)));
        }

        let queue = Rc::new(MicrotaskQueue::with_budget(10));
        requeue(Rc::clone(&queue));

        match queue.run_until_idle() {
            Err(SchedulerError::BudgetExhausted { budget, remaining }) => {
                assert_eq!(budget, 10);
                assert_eq!(remaining, 1);
            }
            other => panic!("Expected budget exhaustion, got {:?}", other),
        }
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_reentrant_drain_refused() {
        let queue = Rc::new(MicrotaskQueue::new());
        let seen = Rc::new(RefCell::new(None));

        let q = Rc::clone(&queue);
        let s = Rc::clone(&seen);
        queue.queue_microtask(Box::new(move || {
            *s.borrow_mut() = Some(matches!(q.run_until_idle(), Err(SchedulerError::ReentrantDrain)));
        }));

        queue.run_until_idle().unwrap();
        assert_eq!(*seen.borrow(), Some(true));
    }

    #[test]
    fn test_run_one() {
        let queue = MicrotaskQueue::new();
        queue.queue_microtask(Box::new(|| {}));

        assert!(queue.run_one().unwrap());
        assert!(!queue.run_one().unwrap());
    }
}
