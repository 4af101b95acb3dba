//! Aggregate combinators
//!
//! `all`, `all_settled`, `race` and `any` compose an ordered collection of
//! futures into one. They are built on `then` and construction alone. Plain
//! values in the input are treated as already-resolved futures.

use crate::future::{PledgeFuture, Status};
use crate::value::{ErrorValue, Value, ValueArray};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Per-call aggregation state: one slot per input, in input order
struct Gather {
    slots: RefCell<Vec<Option<Value>>>,
    remaining: Cell<usize>,
}

impl Gather {
    fn new(len: usize) -> Rc<Self> {
        Rc::new(Self {
            slots: RefCell::new(vec![None; len]),
            remaining: Cell::new(len),
        })
    }

    /// Record the result for `index`; returns every result once all are in
    fn fill(&self, index: usize, value: Value) -> Option<Vec<Value>> {
        let mut slots = self.slots.borrow_mut();
        if slots[index].replace(value).is_none() {
            self.remaining.set(self.remaining.get() - 1);
        }
        if self.remaining.get() > 0 {
            return None;
        }
        Some(
            slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

fn collect<I>(futures: I) -> Vec<PledgeFuture>
where
    I: IntoIterator,
    I::Item: Into<PledgeFuture>,
{
    futures.into_iter().map(Into::into).collect()
}

/// Fulfill with every value in input order, or reject with the first reason
pub fn all<I>(futures: I) -> PledgeFuture
where
    I: IntoIterator,
    I::Item: Into<PledgeFuture>,
{
    let inputs = collect(futures);

    PledgeFuture::new(move |resolver| {
        if inputs.is_empty() {
            resolver.resolve(Value::array(Vec::new()));
            return Ok(());
        }

        let gather = Gather::new(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let gather = Rc::clone(&gather);
            let on_value = resolver.clone();
            let on_reason = resolver.clone();
            input.then_both(
                move |value| {
                    if let Some(values) = gather.fill(index, value) {
                        on_value.resolve(Value::array(values));
                    }
                    Ok(Value::Null)
                },
                move |reason| {
                    on_reason.reject(reason);
                    Ok(Value::Null)
                },
            );
        }
        Ok(())
    })
}

/// Fulfill with an outcome record per input once every input has settled
///
/// Each record has a `status` of `"fulfilled"` or `"rejected"` and the value
/// or reason under `value`. Never rejects.
pub fn all_settled<I>(futures: I) -> PledgeFuture
where
    I: IntoIterator,
    I::Item: Into<PledgeFuture>,
{
    let inputs = collect(futures);

    PledgeFuture::new(move |resolver| {
        if inputs.is_empty() {
            resolver.resolve(Value::array(Vec::new()));
            return Ok(());
        }

        let gather = Gather::new(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let on_value = (Rc::clone(&gather), resolver.clone());
            let on_reason = (Rc::clone(&gather), resolver.clone());
            input.then_both(
                move |value| {
                    let (gather, resolver) = on_value;
                    if let Some(records) = gather.fill(index, outcome(Status::Fulfilled, value)) {
                        resolver.resolve(Value::array(records));
                    }
                    Ok(Value::Null)
                },
                move |reason| {
                    let (gather, resolver) = on_reason;
                    if let Some(records) = gather.fill(index, outcome(Status::Rejected, reason)) {
                        resolver.resolve(Value::array(records));
                    }
                    Ok(Value::Null)
                },
            );
        }
        Ok(())
    })
}

fn outcome(status: Status, value: Value) -> Value {
    Value::record([
        ("status", Value::string(status.as_str())),
        ("value", value),
    ])
}

/// Settle like the first input to settle
///
/// An empty input never settles.
pub fn race<I>(futures: I) -> PledgeFuture
where
    I: IntoIterator,
    I::Item: Into<PledgeFuture>,
{
    let inputs = collect(futures);

    PledgeFuture::new(move |resolver| {
        for input in &inputs {
            let on_value = resolver.clone();
            let on_reason = resolver.clone();
            input.then_both(
                move |value| {
                    on_value.resolve(value);
                    Ok(Value::Null)
                },
                move |reason| {
                    on_reason.reject(reason);
                    Ok(Value::Null)
                },
            );
        }
        Ok(())
    })
}

/// Fulfill with the first value, or reject with an aggregate of every reason
///
/// The aggregate keeps reasons in input order. An empty input rejects with
/// an empty aggregate.
pub fn any<I>(futures: I) -> PledgeFuture
where
    I: IntoIterator,
    I::Item: Into<PledgeFuture>,
{
    let inputs = collect(futures);

    PledgeFuture::new(move |resolver| {
        if inputs.is_empty() {
            resolver.reject(ErrorValue::Aggregate(ValueArray::new()));
            return Ok(());
        }

        let gather = Gather::new(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let gather = Rc::clone(&gather);
            let on_value = resolver.clone();
            let on_reason = resolver.clone();
            input.then_both(
                move |value| {
                    on_value.resolve(value);
                    Ok(Value::Null)
                },
                move |reason| {
                    if let Some(reasons) = gather.fill(index, reason) {
                        tracing::debug!(
                            future = on_reason.id(),
                            count = reasons.len(),
                            "every input rejected"
                        );
                        on_reason.reject(ErrorValue::Aggregate(ValueArray::from_vec(reasons)));
                    }
                    Ok(Value::Null)
                },
            );
        }
        Ok(())
    })
}

impl PledgeFuture {
    /// See [`all`]
    pub fn all<I>(futures: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PledgeFuture>,
    {
        all(futures)
    }

    /// See [`all_settled`]
    pub fn all_settled<I>(futures: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PledgeFuture>,
    {
        all_settled(futures)
    }

    /// See [`race`]
    pub fn race<I>(futures: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PledgeFuture>,
    {
        race(futures)
    }

    /// See [`any`]
    pub fn any<I>(futures: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PledgeFuture>,
    {
        any(futures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{self, MicrotaskQueue};

    fn on_queue() -> (Rc<MicrotaskQueue>, host::HostGuard) {
        let queue = Rc::new(MicrotaskQueue::new());
        let guard = host::enter(queue.clone());
        (queue, guard)
    }

    #[test]
    fn test_gather_completes_in_input_order() {
        let gather = Gather::new(3);
        assert_eq!(gather.fill(2, Value::from("c")), None);
        assert_eq!(gather.fill(0, Value::from("a")), None);
        assert_eq!(
            gather.fill(1, Value::from("b")),
            Some(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
    }

    #[test]
    fn test_all_plain_values() {
        let (queue, _guard) = on_queue();
        let f = all(vec![Value::from(1), Value::from(2)]);

        assert!(f.is_pending());
        queue.run_until_idle().unwrap();
        assert_eq!(f.value(), Some(Value::array(vec![1.into(), 2.into()])));
    }

    #[test]
    fn test_empty_inputs() {
        let (queue, _guard) = on_queue();
        let none: Vec<PledgeFuture> = Vec::new();

        let all_f = all(none.clone());
        let settled_f = all_settled(none.clone());
        let race_f = race(none.clone());
        let any_f = any(none);

        // Empty results are still deferred
        assert!(all_f.is_pending());
        assert!(any_f.is_pending());

        queue.run_until_idle().unwrap();
        assert_eq!(all_f.value(), Some(Value::array(Vec::new())));
        assert_eq!(settled_f.value(), Some(Value::array(Vec::new())));
        assert!(race_f.is_pending());

        let reason = any_f.reason().unwrap();
        let err = reason.as_error().unwrap();
        assert!(err.is_aggregate());
        assert!(err.errors().is_empty());
    }

    #[test]
    fn test_associated_functions() {
        let (queue, _guard) = on_queue();
        let f = PledgeFuture::race([PledgeFuture::reject("no"), PledgeFuture::resolve(1)]);

        queue.run_until_idle().unwrap();
        assert_eq!(f.reason(), Some(Value::from("no")));
    }
}
