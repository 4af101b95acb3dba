//! Host scheduling for futures
//!
//! Futures never run their callbacks synchronously with settlement; they
//! hand the transition to a [`Scheduler`] ("the host") which runs it after
//! the current synchronous execution, in FIFO order. This module provides:
//! - The [`Scheduler`] trait
//! - A manually driven [`MicrotaskQueue`]
//! - A deterministic [`EventLoop`] with a virtual-clock timer queue
//! - A tokio `LocalSet` bridge in [`local`]
//! - The thread-local current host used by [`crate::PledgeFuture::new`]

pub mod event_loop;
pub mod local;
pub mod queue;

pub use event_loop::{EventLoop, RunStats, TimerId};
pub use queue::MicrotaskQueue;

use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

/// A unit of deferred work
pub type Microtask = Box<dyn FnOnce()>;

/// Task-queuing facility futures defer their settlement onto
///
/// Implementations must run queued tasks after the caller's synchronous
/// execution has returned, in FIFO order relative to each other.
pub trait Scheduler {
    fn queue_microtask(&self, task: Microtask);
}

/// Host-level failures
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("microtask budget of {budget} exhausted with {remaining} microtasks still queued")]
    BudgetExhausted { budget: usize, remaining: usize },

    #[error("microtask queue is already draining")]
    ReentrantDrain,

    #[error("failed to start tokio runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

thread_local! {
    /// Per-thread default host
    static DEFAULT_LOOP: Rc<EventLoop> = Rc::new(EventLoop::new());

    /// Host installed with [`enter`], if any
    static CURRENT: RefCell<Option<Rc<dyn Scheduler>>> = const { RefCell::new(None) };
}

/// The calling thread's default event loop
pub fn event_loop() -> Rc<EventLoop> {
    DEFAULT_LOOP.with(Rc::clone)
}

/// The scheduler new futures on this thread defer onto
///
/// This is the host installed with [`enter`], or the thread's default
/// [`EventLoop`].
pub fn current() -> Rc<dyn Scheduler> {
    if let Some(scheduler) = CURRENT.with(|current| current.borrow().clone()) {
        return scheduler;
    }
    let default: Rc<dyn Scheduler> = event_loop();
    default
}

/// Install `scheduler` as the current host until the guard is dropped
pub fn enter(scheduler: Rc<dyn Scheduler>) -> HostGuard {
    let prev = CURRENT.with(|current| current.replace(Some(scheduler)));
    HostGuard { prev }
}

/// Restores the previous host on drop
#[must_use = "the host is restored as soon as the guard is dropped"]
pub struct HostGuard {
    prev: Option<Rc<dyn Scheduler>>,
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|current| *current.borrow_mut() = prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_default_host_is_thread_event_loop() {
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        current().queue_microtask(Box::new(move || counter.set(counter.get() + 1)));

        assert_eq!(event_loop().pending_microtasks(), 1);
        event_loop().run_microtasks().unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_enter_restores_previous_host() {
        let queue = Rc::new(MicrotaskQueue::new());
        {
            let _guard = enter(queue.clone());
            current().queue_microtask(Box::new(|| {}));
        }
        current().queue_microtask(Box::new(|| {}));

        assert_eq!(queue.len(), 1);
        assert_eq!(event_loop().pending_microtasks(), 1);
        event_loop().run_microtasks().unwrap();
    }
}
