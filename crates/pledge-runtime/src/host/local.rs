//! tokio `LocalSet` bridge
//!
//! Runs futures on a current-thread tokio runtime. Microtasks are drained by
//! a `spawn_local` task, so they run after the code that queued them yields
//! back to the runtime. Async Rust code can produce futures with
//! [`spawn_future`] and consume them with `.await`.
//!
//! When [`block_on`] returns it first drains whatever is still queued, so
//! settlements scheduled inside it are not lost. Futures created inside it
//! keep the bridge as their host; once the runtime is gone their later
//! settlements are handed to the thread's default event loop.
//!
//! [`spawn_future`] and the timer helpers must be called from inside a
//! `LocalSet` (as [`block_on`] sets up).

use super::{Microtask, MicrotaskQueue, Scheduler, SchedulerError};
use crate::future::{PledgeFuture, Settlement};
use crate::value::{ErrorValue, Value};
use futures_util::FutureExt;
use pledge_config::SchedulerConfig;
use std::cell::Cell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

/// Where a [`LocalSetScheduler`] sends new microtasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    /// Inside [`block_on`]: queue and drain from a local task
    Running,
    /// [`block_on`] is draining the leftovers synchronously: queue only
    Finishing,
    /// No runtime: forward to the thread's default event loop
    Detached,
}

/// Scheduler that drains its microtasks from a tokio local task
#[derive(Clone)]
pub struct LocalSetScheduler {
    inner: Rc<LocalInner>,
}

struct LocalInner {
    queue: MicrotaskQueue,
    drain_scheduled: Cell<bool>,
    mode: Cell<BridgeMode>,
}

impl LocalSetScheduler {
    pub fn new() -> Self {
        Self::with_config(&SchedulerConfig::default())
    }

    pub fn with_config(config: &SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(LocalInner {
                queue: MicrotaskQueue::with_config(config),
                drain_scheduled: Cell::new(false),
                mode: Cell::new(BridgeMode::Detached),
            }),
        }
    }

    /// Microtasks waiting for the next drain
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn mode(&self) -> BridgeMode {
        self.inner.mode.get()
    }

    fn start(&self) -> RunningGuard {
        self.inner.mode.set(BridgeMode::Running);
        RunningGuard {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Tear down `local_set`, then run everything still queued
    fn finish(&self, local_set: LocalSet) -> Result<usize, SchedulerError> {
        self.inner.mode.set(BridgeMode::Finishing);
        // Unfinished local tasks, including a pending drain, go with the set
        drop(local_set);
        self.inner.drain_scheduled.set(false);
        let ran = self.inner.queue.run_until_idle()?;
        tracing::trace!(ran, "local bridge drained after block_on");
        Ok(ran)
    }
}

impl Default for LocalSetScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for LocalSetScheduler {
    fn queue_microtask(&self, task: Microtask) {
        match self.inner.mode.get() {
            BridgeMode::Detached => {
                tracing::trace!("local bridge detached, queuing on the thread event loop");
                super::event_loop().queue_microtask(task);
                return;
            }
            BridgeMode::Finishing => {
                self.inner.queue.queue_microtask(task);
                return;
            }
            BridgeMode::Running => self.inner.queue.queue_microtask(task),
        }

        // One drain task per burst
        if self.inner.drain_scheduled.replace(true) {
            return;
        }
        let inner = Rc::clone(&self.inner);
        tokio::task::spawn_local(async move {
            inner.drain_scheduled.set(false);
            if let Err(err) = inner.queue.run_until_idle() {
                tracing::error!(%err, "microtask checkpoint failed");
            }
        });
    }
}

/// Detaches the scheduler on drop, including during unwinding
struct RunningGuard {
    inner: Rc<LocalInner>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.inner.mode.set(BridgeMode::Detached);
        self.inner.drain_scheduled.set(false);
    }
}

/// Run `future` to completion on a fresh current-thread runtime
///
/// While it runs, futures created on this thread defer onto a
/// [`LocalSetScheduler`].
pub fn block_on<F: Future>(future: F) -> Result<F::Output, SchedulerError> {
    block_on_with(&SchedulerConfig::default(), future)
}

/// Like [`block_on`], with explicit scheduler settings
pub fn block_on_with<F: Future>(
    config: &SchedulerConfig,
    future: F,
) -> Result<F::Output, SchedulerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let local_set = LocalSet::new();
    let scheduler = LocalSetScheduler::with_config(config);
    let _host = super::enter(Rc::new(scheduler.clone()));
    let _running = scheduler.start();

    let output = local_set.block_on(&runtime, future);
    scheduler.finish(local_set)?;
    Ok(output)
}

/// Spawn an async computation and expose its outcome as a future
///
/// `Ok` fulfills, `Err` rejects, and a panic rejects with
/// [`ErrorValue::Panic`].
pub fn spawn_future<F>(task: F) -> PledgeFuture
where
    F: Future<Output = Settlement> + 'static,
{
    let (future, resolver) = PledgeFuture::with_resolvers();
    let id = resolver.id();

    tokio::task::spawn_local(async move {
        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(value)) => resolver.resolve(value),
            Ok(Err(reason)) => resolver.reject(reason),
            Err(payload) => {
                let err = ErrorValue::from_panic(payload);
                tracing::warn!(future = id, %err, "spawned task panicked");
                resolver.reject(err);
            }
        }
    });

    future
}

/// Spawn an infallible async computation
pub fn from_async<F, T>(task: F) -> PledgeFuture
where
    F: Future<Output = T> + 'static,
    T: Into<Value>,
{
    spawn_future(async move { Ok(task.await.into()) })
}

/// A future that fulfills with `value` after `delay`
pub fn resolve_after(delay: Duration, value: impl Into<Value>) -> PledgeFuture {
    let value = value.into();
    spawn_future(async move {
        tokio::time::sleep(delay).await;
        Ok(value)
    })
}

/// A future that rejects with `reason` after `delay`
pub fn reject_after(delay: Duration, reason: impl Into<Value>) -> PledgeFuture {
    let reason = reason.into();
    spawn_future(async move {
        tokio::time::sleep(delay).await;
        Err(reason)
    })
}
