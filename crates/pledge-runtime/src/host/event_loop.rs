//! Deterministic single-threaded event loop
//!
//! A microtask queue plus a timer queue driven by a virtual clock. Each turn
//! drains every microtask, then runs the earliest due timer and advances
//! the clock to its deadline. No real time passes, so timer-driven
//! scenarios run instantly and in a reproducible order.

use super::{Microtask, MicrotaskQueue, Scheduler, SchedulerError};
use crate::future::{FutureState, PledgeFuture};
use pledge_config::SchedulerConfig;
use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Handle to a timer registered with [`EventLoop::set_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Counters returned by [`EventLoop::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub microtasks: u64,
    pub timers: u64,
    /// Virtual milliseconds that elapsed during the run
    pub elapsed_ms: u64,
}

struct TimerEntry {
    due_ms: u64,
    seq: u64,
    task: Microtask,
}

// Timers due at the same instant fire in registration order
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.due_ms, self.seq) == (other.due_ms, other.seq)
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due_ms, self.seq).cmp(&(other.due_ms, other.seq))
    }
}

pub struct EventLoop {
    microtasks: MicrotaskQueue,
    timers: RefCell<BinaryHeap<Reverse<TimerEntry>>>,
    now_ms: Cell<u64>,
    next_timer: Cell<u64>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_config(&SchedulerConfig::default())
    }

    pub fn with_config(config: &SchedulerConfig) -> Self {
        Self {
            microtasks: MicrotaskQueue::with_config(config),
            timers: RefCell::new(BinaryHeap::new()),
            now_ms: Cell::new(0),
            next_timer: Cell::new(0),
        }
    }

    /// Apply scheduler settings to an existing loop
    pub fn configure(&self, config: &SchedulerConfig) {
        self.microtasks.set_budget(config.microtask_budget());
    }

    /// Current virtual time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    pub fn microtasks(&self) -> &MicrotaskQueue {
        &self.microtasks
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Run `task` once `delay_ms` virtual milliseconds have elapsed
    pub fn set_timeout<F>(&self, delay_ms: u64, task: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        let seq = self.next_timer.get();
        self.next_timer.set(seq + 1);

        let due_ms = self.now_ms.get().saturating_add(delay_ms);
        tracing::trace!(timer = seq, due_ms, "timer registered");
        self.timers.borrow_mut().push(Reverse(TimerEntry {
            due_ms,
            seq,
            task: Box::new(task),
        }));
        TimerId(seq)
    }

    /// Drain the microtask queue
    pub fn run_microtasks(&self) -> Result<usize, SchedulerError> {
        self.microtasks.run_until_idle()
    }

    /// Drain microtasks, then fire the earliest timer and drain again
    ///
    /// Returns `false` when there was no timer left to fire.
    pub fn turn(&self) -> Result<bool, SchedulerError> {
        self.run_microtasks()?;

        let entry = self.timers.borrow_mut().pop();
        let Some(Reverse(entry)) = entry else {
            return Ok(false);
        };

        if entry.due_ms > self.now_ms.get() {
            self.now_ms.set(entry.due_ms);
        }
        tracing::trace!(timer = entry.seq, now_ms = self.now_ms.get(), "timer fired");
        (entry.task)();

        self.run_microtasks()?;
        Ok(true)
    }

    /// Run until no microtasks or timers remain
    pub fn run(&self) -> Result<RunStats, SchedulerError> {
        let ran_before = self.microtasks.total_run();
        let started_ms = self.now_ms.get();
        let mut timers = 0;

        while self.turn()? {
            timers += 1;
        }

        let stats = RunStats {
            microtasks: self.microtasks.total_run() - ran_before,
            timers,
            elapsed_ms: self.now_ms.get() - started_ms,
        };
        tracing::debug!(?stats, "event loop idle");
        Ok(stats)
    }

    /// Run until `future` settles or the loop has nothing left to do
    ///
    /// Returns the future's state at that point; it is still `Pending` if
    /// nothing was ever going to settle it.
    pub fn run_until(&self, future: &PledgeFuture) -> Result<FutureState, SchedulerError> {
        self.run_microtasks()?;
        while future.is_pending() && self.turn()? {}
        Ok(future.state())
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for EventLoop {
    fn queue_microtask(&self, task: Microtask) {
        self.microtasks.queue_microtask(task);
    }
}
