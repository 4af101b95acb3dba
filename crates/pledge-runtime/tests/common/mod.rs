//! Shared test utilities
//!
//! Helpers for driving futures on a private event loop and recording the
//! order in which things happen.
#![allow(dead_code)]

use pledge_runtime::host::{self, HostGuard};
use pledge_runtime::{EventLoop, FutureState, PledgeFuture, Value};
use std::cell::RefCell;
use std::rc::Rc;

// Re-export testing utilities
pub use pretty_assertions::{assert_eq, assert_ne};

/// A fresh event loop installed as the current host
///
/// Keep the guard alive for the duration of the test.
pub fn fresh_loop() -> (Rc<EventLoop>, HostGuard) {
    let event_loop = Rc::new(EventLoop::new());
    let guard = host::enter(event_loop.clone());
    (event_loop, guard)
}

/// Ordered record of events
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// A future rejected or fulfilled by a timer after `delay_ms`
pub fn settle_after(
    event_loop: &EventLoop,
    delay_ms: u64,
    outcome: Result<Value, Value>,
) -> PledgeFuture {
    let (future, resolver) = PledgeFuture::with_resolvers();
    event_loop.set_timeout(delay_ms, move || match outcome {
        Ok(value) => resolver.resolve(value),
        Err(reason) => resolver.reject(reason),
    });
    future
}

/// Assert that a future fulfilled with `expected`
pub fn assert_fulfilled(future: &PledgeFuture, expected: impl Into<Value>) {
    let expected = expected.into();
    match future.state() {
        FutureState::Fulfilled(value) => assert_eq!(value, expected),
        other => panic!("Expected Fulfilled({:?}), got {:?}", expected, other),
    }
}

/// Assert that a future rejected with `expected`
pub fn assert_rejected(future: &PledgeFuture, expected: impl Into<Value>) {
    let expected = expected.into();
    match future.state() {
        FutureState::Rejected(reason) => assert_eq!(reason, expected),
        other => panic!("Expected Rejected({:?}), got {:?}", expected, other),
    }
}

/// Numbers as an array value
pub fn numbers(values: &[f64]) -> Value {
    Value::array(values.iter().copied().map(Value::from).collect())
}
