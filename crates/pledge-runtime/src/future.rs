//! Future/Promise implementation for Pledge
//!
//! Provides a Future type representing the eventual outcome of an
//! asynchronous operation. A future is in one of three states:
//! - Pending: outcome not known yet
//! - Fulfilled: completed successfully with a value
//! - Rejected: failed with a reason
//!
//! Settlement is deferred: the hooks handed to an executor only *schedule*
//! the transition on the future's host (see [`crate::host`]). The Pending
//! check happens when the scheduled transition runs, so the first transition
//! to run wins and every later one is a no-op.
//!
//! Futures support chaining via `then`, `catch` and `finally`; see
//! [`crate::combinators`] for `all`, `all_settled`, `race` and `any`.

use crate::host::{self, Scheduler};
use crate::value::{ErrorValue, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::IntoFuture;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

/// Global future ID counter
static FUTURE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Outcome produced by a handler: `Ok` resolves, `Err` rejects ("throws")
pub type Settlement = Result<Value, Value>;

/// Boxed `then` handler
pub type Handler = Box<dyn FnOnce(Value) -> Settlement>;

/// Raw settlement callback registered through [`Thenable::subscribe`]
pub type Callback = Box<dyn FnOnce(Value)>;

/// Future status without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Fulfilled => "fulfilled",
            Status::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Future state, including the settled value or reason
#[derive(Debug, Clone, PartialEq)]
pub enum FutureState {
    /// Outcome not known yet
    Pending,
    /// Completed successfully with a value
    Fulfilled(Value),
    /// Failed with a reason
    Rejected(Value),
}

impl FutureState {
    pub fn status(&self) -> Status {
        match self {
            FutureState::Pending => Status::Pending,
            FutureState::Fulfilled(_) => Status::Fulfilled,
            FutureState::Rejected(_) => Status::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, FutureState::Pending)
    }

    /// Settled outcome, `None` while pending
    pub fn outcome(&self) -> Option<Settlement> {
        match self {
            FutureState::Pending => None,
            FutureState::Fulfilled(value) => Some(Ok(value.clone())),
            FutureState::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

/// A future-like value: anything that can report one eventual outcome.
///
/// Resolving a future with a thenable adopts the thenable's outcome instead
/// of fulfilling with the thenable itself. Implementations may invoke a
/// callback synchronously, and may invoke callbacks more than once; only
/// the first effective settlement counts.
pub trait Thenable: fmt::Debug {
    fn subscribe(&self, on_fulfilled: Callback, on_rejected: Callback);
}

struct Inner {
    id: u64,
    state: FutureState,
    on_fulfilled: Vec<Callback>,
    on_rejected: Vec<Callback>,
    host: Rc<dyn Scheduler>,
}

/// Pledge Future - the eventual outcome of an asynchronous operation
///
/// Cloning is cheap and every clone shares the same state.
///
/// # State Machine
/// - Pending → Fulfilled (success)
/// - Pending → Rejected (failure)
/// - Once Fulfilled or Rejected, state is final
///
/// # Example
/// ```
/// use pledge_runtime::{host, PledgeFuture, Value};
///
/// let doubled = PledgeFuture::resolve(21).then(|v| Ok(Value::from(v.as_number()? * 2.0)));
/// host::event_loop().run().unwrap();
/// assert_eq!(doubled.value(), Some(Value::from(42)));
/// ```
#[derive(Clone)]
pub struct PledgeFuture {
    inner: Rc<RefCell<Inner>>,
}

/// Settlement hooks of a future, handed to its executor
#[derive(Clone)]
pub struct Resolver {
    inner: Rc<RefCell<Inner>>,
}

impl PledgeFuture {
    /// Create a future on the current host and run `executor` synchronously
    ///
    /// Returning `Err(reason)` from the executor, or panicking inside it,
    /// rejects the future.
    pub fn new<E>(executor: E) -> Self
    where
        E: FnOnce(Resolver) -> Result<(), Value>,
    {
        Self::new_in(host::current(), executor)
    }

    /// Create a future that defers its settlement onto `host`
    pub fn new_in<E>(host: Rc<dyn Scheduler>, executor: E) -> Self
    where
        E: FnOnce(Resolver) -> Result<(), Value>,
    {
        let (future, resolver) = Self::pending_in(host);
        let guard = resolver.clone();

        match panic::catch_unwind(AssertUnwindSafe(move || executor(resolver))) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                tracing::debug!(future = future.id(), "executor returned an error");
                guard.reject(reason);
            }
            Err(payload) => {
                let err = ErrorValue::from_panic(payload);
                tracing::warn!(future = future.id(), %err, "executor panicked");
                guard.reject(err);
            }
        }

        future
    }

    /// Create a pending future together with its resolver
    pub fn with_resolvers() -> (Self, Resolver) {
        Self::pending_in(host::current())
    }

    fn pending_in(host: Rc<dyn Scheduler>) -> (Self, Resolver) {
        let id = FUTURE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let inner = Rc::new(RefCell::new(Inner {
            id,
            state: FutureState::Pending,
            on_fulfilled: Vec::new(),
            on_rejected: Vec::new(),
            host,
        }));
        (
            Self {
                inner: Rc::clone(&inner),
            },
            Resolver { inner },
        )
    }

    /// Create a future that fulfills with `value` (or adopts it, if future-like)
    pub fn resolve(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::new(move |resolver| {
            resolver.resolve(value);
            Ok(())
        })
    }

    /// Create a future that rejects with `reason`
    pub fn reject(reason: impl Into<Value>) -> Self {
        let reason = reason.into();
        Self::new(move |resolver| {
            resolver.reject(reason);
            Ok(())
        })
    }

    /// Chain handlers onto this future
    ///
    /// Returns a new future settled by whichever handler runs. A missing
    /// fulfillment handler passes the value through; a missing rejection
    /// handler re-raises the reason unchanged. If this future is already
    /// settled the matching handler runs immediately; otherwise it is queued
    /// until settlement.
    pub fn then_with(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Self {
        let on_fulfilled = on_fulfilled.unwrap_or_else(pass_through);
        let on_rejected = on_rejected.unwrap_or_else(rethrow);

        let (child, resolver) = Self::pending_in(self.host());
        let fulfil = resolver.clone();

        self.subscribe(
            Box::new(move |value| fulfil.run_handler(on_fulfilled, value)),
            Box::new(move |reason| resolver.run_handler(on_rejected, reason)),
        );

        child
    }

    /// Chain a fulfillment handler; rejections pass through
    pub fn then<F>(&self, on_fulfilled: F) -> Self
    where
        F: FnOnce(Value) -> Settlement + 'static,
    {
        self.then_with(Some(Box::new(on_fulfilled)), None)
    }

    /// Chain both a fulfillment and a rejection handler
    pub fn then_both<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Self
    where
        F: FnOnce(Value) -> Settlement + 'static,
        R: FnOnce(Value) -> Settlement + 'static,
    {
        self.then_with(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    /// Chain a rejection handler; values pass through
    pub fn catch<R>(&self, on_rejected: R) -> Self
    where
        R: FnOnce(Value) -> Settlement + 'static,
    {
        self.then_with(None, Some(Box::new(on_rejected)))
    }

    /// Observe settlement without changing the outcome
    ///
    /// `on_finally` receives the value or the reason. The returned future
    /// settles like this one, unless `on_finally` fails, in which case it
    /// rejects with that failure. Dropping the returned future is fine.
    pub fn finally<F>(&self, on_finally: F) -> Self
    where
        F: FnOnce(Value) -> Result<(), Value> + 'static,
    {
        let on_value = Rc::new(Cell::new(Some(on_finally)));
        let on_reason = Rc::clone(&on_value);

        self.then_both(
            move |value| {
                if let Some(f) = on_value.take() {
                    f(value.clone())?;
                }
                Ok(value)
            },
            move |reason| {
                if let Some(f) = on_reason.take() {
                    f(reason.clone())?;
                }
                Err(reason)
            },
        )
    }

    /// Await the outcome from async Rust
    ///
    /// The returned future only makes progress while the host runs.
    pub fn settled(&self) -> Settled {
        Settled {
            source: Some(self.clone()),
            slot: Rc::new(RefCell::new(SettledSlot::default())),
        }
    }

    /// Unique identifier of this future
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// Scheduler this future defers its settlement onto
    pub fn host(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.inner.borrow().host)
    }

    /// Get the current state (cloned)
    pub fn state(&self) -> FutureState {
        self.inner.borrow().state.clone()
    }

    pub fn status(&self) -> Status {
        self.inner.borrow().state.status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    pub fn is_fulfilled(&self) -> bool {
        self.status() == Status::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.status() == Status::Rejected
    }

    /// Fulfillment value, if fulfilled
    pub fn value(&self) -> Option<Value> {
        match &self.inner.borrow().state {
            FutureState::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Rejection reason, if rejected
    pub fn reason(&self) -> Option<Value> {
        match &self.inner.borrow().state {
            FutureState::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Number of callbacks waiting for settlement
    pub fn pending_callbacks(&self) -> usize {
        let inner = self.inner.borrow();
        inner.on_fulfilled.len() + inner.on_rejected.len()
    }

    /// Whether both handles share the same state
    pub fn ptr_eq(&self, other: &PledgeFuture) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Thenable for PledgeFuture {
    /// Register raw callbacks; runs the matching one immediately when settled
    fn subscribe(&self, on_fulfilled: Callback, on_rejected: Callback) {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_pending() {
                inner.on_fulfilled.push(on_fulfilled);
                inner.on_rejected.push(on_rejected);
                return;
            }
            inner.state.outcome()
        };

        match outcome {
            Some(Ok(value)) => on_fulfilled(value),
            Some(Err(reason)) => on_rejected(reason),
            None => {}
        }
    }
}

impl From<Value> for PledgeFuture {
    fn from(value: Value) -> Self {
        match value {
            Value::Future(future) => future,
            other => PledgeFuture::resolve(other),
        }
    }
}

impl IntoFuture for PledgeFuture {
    type Output = Settlement;
    type IntoFuture = Settled;

    fn into_future(self) -> Settled {
        self.settled()
    }
}

impl fmt::Debug for PledgeFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        write!(f, "Future#{}({:?})", inner.id, inner.state)
    }
}

impl fmt::Display for PledgeFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.borrow().state {
            FutureState::Pending => write!(f, "Future(pending)"),
            FutureState::Fulfilled(value) => write!(f, "Future(fulfilled: {})", value),
            FutureState::Rejected(reason) => write!(f, "Future(rejected: {})", reason),
        }
    }
}

impl Resolver {
    /// Schedule fulfillment with `value`
    ///
    /// A future-like value is adopted: the future settles with that value's
    /// eventual outcome instead. Resolving a future with itself rejects it.
    pub fn resolve(&self, value: impl Into<Value>) {
        match value.into() {
            Value::Future(future) if Rc::ptr_eq(&future.inner, &self.inner) => {
                let id = self.id();
                self.reject(ErrorValue::Cycle(id));
            }
            Value::Future(future) => self.adopt(&future),
            Value::Thenable(thenable) => self.adopt(thenable.as_ref()),
            other => self.schedule(Ok(other)),
        }
    }

    /// Schedule rejection with `reason`
    pub fn reject(&self, reason: impl Into<Value>) {
        self.schedule(Err(reason.into()));
    }

    /// ID of the future this resolver settles
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// Handle to the future this resolver settles
    pub fn future(&self) -> PledgeFuture {
        PledgeFuture {
            inner: Rc::clone(&self.inner),
        }
    }

    fn adopt(&self, thenable: &dyn Thenable) {
        tracing::debug!(future = self.id(), "adopting future-like resolution");

        let on_value = self.clone();
        let on_reason = self.clone();
        let subscribed = panic::catch_unwind(AssertUnwindSafe(|| {
            thenable.subscribe(
                Box::new(move |value| on_value.resolve(value)),
                Box::new(move |reason| on_reason.reject(reason)),
            )
        }));

        if let Err(payload) = subscribed {
            let err = ErrorValue::from_panic(payload);
            tracing::warn!(future = self.id(), %err, "thenable panicked while subscribing");
            self.reject(err);
        }
    }

    /// Run a `then` handler under a panic guard and settle with its outcome
    fn run_handler(&self, handler: Handler, arg: Value) {
        match panic::catch_unwind(AssertUnwindSafe(move || handler(arg))) {
            Ok(Ok(value)) => self.resolve(value),
            Ok(Err(reason)) => self.reject(reason),
            Err(payload) => {
                let err = ErrorValue::from_panic(payload);
                tracing::warn!(future = self.id(), %err, "handler panicked");
                self.reject(err);
            }
        }
    }

    fn schedule(&self, outcome: Settlement) {
        let host = Rc::clone(&self.inner.borrow().host);
        let inner = Rc::clone(&self.inner);
        host.queue_microtask(Box::new(move || settle(&inner, outcome)));
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resolver(#{})", self.id())
    }
}

/// Deferred transition: applies `outcome` if still pending, then dispatches
fn settle(inner: &Rc<RefCell<Inner>>, outcome: Settlement) {
    let (id, callbacks, payload) = {
        let mut guard = inner.borrow_mut();
        if !guard.state.is_pending() {
            tracing::trace!(
                future = guard.id,
                status = %guard.state.status(),
                "settlement ignored"
            );
            return;
        }

        let fulfilled = std::mem::take(&mut guard.on_fulfilled);
        let rejected = std::mem::take(&mut guard.on_rejected);
        let (state, callbacks, payload) = match outcome {
            Ok(value) => (FutureState::Fulfilled(value.clone()), fulfilled, value),
            Err(reason) => (FutureState::Rejected(reason.clone()), rejected, reason),
        };
        guard.state = state;
        (guard.id, callbacks, payload)
    };

    tracing::trace!(future = id, callbacks = callbacks.len(), "future settled");

    for callback in callbacks {
        let arg = payload.clone();
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(move || callback(arg))) {
            let err = ErrorValue::from_panic(panic);
            tracing::error!(future = id, %err, "settlement callback panicked");
        }
    }
}

fn pass_through() -> Handler {
    Box::new(Ok::<Value, Value>)
}

fn rethrow() -> Handler {
    Box::new(Err::<Value, Value>)
}

#[derive(Default)]
struct SettledSlot {
    outcome: Option<Settlement>,
    waker: Option<Waker>,
}

impl SettledSlot {
    fn complete(slot: &Rc<RefCell<SettledSlot>>, outcome: Settlement) {
        let waker = {
            let mut slot = slot.borrow_mut();
            if slot.outcome.is_none() {
                slot.outcome = Some(outcome);
            }
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// `std::future::Future` adapter returned by [`PledgeFuture::settled`]
pub struct Settled {
    source: Option<PledgeFuture>,
    slot: Rc<RefCell<SettledSlot>>,
}

impl std::future::Future for Settled {
    type Output = Settlement;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Settlement> {
        let this = self.get_mut();

        if let Some(source) = this.source.take() {
            let on_value = Rc::clone(&this.slot);
            let on_reason = Rc::clone(&this.slot);
            source.subscribe(
                Box::new(move |value| SettledSlot::complete(&on_value, Ok(value))),
                Box::new(move |reason| SettledSlot::complete(&on_reason, Err(reason))),
            );
        }

        let mut slot = this.slot.borrow_mut();
        match slot.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MicrotaskQueue;
    use futures_util::FutureExt;

    fn queue() -> Rc<MicrotaskQueue> {
        Rc::new(MicrotaskQueue::new())
    }

    fn resolved_in(host: &Rc<MicrotaskQueue>, value: Value) -> PledgeFuture {
        PledgeFuture::new_in(host.clone(), move |r| {
            r.resolve(value);
            Ok(())
        })
    }

    #[test]
    fn test_pending_until_drained() {
        let q = queue();
        let f = resolved_in(&q, Value::from(42));

        assert!(f.is_pending());
        assert_eq!(q.len(), 1);

        q.run_until_idle().unwrap();
        assert!(f.is_fulfilled());
        assert_eq!(f.value(), Some(Value::from(42)));
        assert_eq!(f.reason(), None);
    }

    #[test]
    fn test_first_transition_wins() {
        let q = queue();
        let f = PledgeFuture::new_in(q.clone(), |r| {
            r.resolve(1);
            r.reject("late");
            r.resolve(2);
            Ok(())
        });

        q.run_until_idle().unwrap();
        assert_eq!(f.state(), FutureState::Fulfilled(Value::from(1)));
    }

    #[test]
    fn test_executor_error_rejects() {
        let q = queue();
        let f = PledgeFuture::new_in(q.clone(), |_| Err(Value::error("nope")));

        q.run_until_idle().unwrap();
        assert_eq!(f.reason(), Some(Value::error("nope")));
    }

    #[test]
    fn test_callbacks_discarded_after_settlement() {
        let q = queue();
        let (f, r) = PledgeFuture::pending_in(q.clone());
        let _child = f.then(Ok);
        assert_eq!(f.pending_callbacks(), 2);

        r.resolve(1);
        q.run_until_idle().unwrap();
        assert_eq!(f.pending_callbacks(), 0);
    }

    #[test]
    fn test_child_inherits_host() {
        let q = queue();
        let f = resolved_in(&q, Value::from(1));
        let child = f.then(Ok);

        q.run_until_idle().unwrap();
        assert_eq!(child.value(), Some(Value::from(1)));
    }

    #[test]
    fn test_display() {
        let q = queue();
        let ok = resolved_in(&q, Value::from(1));
        let err = PledgeFuture::new_in(q.clone(), |r| {
            r.reject(Value::error("x"));
            Ok(())
        });
        assert_eq!(ok.to_string(), "Future(pending)");

        q.run_until_idle().unwrap();
        assert_eq!(ok.to_string(), "Future(fulfilled: 1)");
        assert_eq!(err.to_string(), "Future(rejected: Error: x)");
    }

    #[test]
    fn test_settled_adapter() {
        let q = queue();
        let f = resolved_in(&q, Value::from("done"));
        let mut awaiting = f.settled();

        assert!((&mut awaiting).now_or_never().is_none());
        q.run_until_idle().unwrap();
        assert_eq!(awaiting.now_or_never(), Some(Ok(Value::from("done"))));
    }
}
