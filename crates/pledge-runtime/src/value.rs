//! Runtime value representation
//!
//! Values carried by futures: fulfillment values and rejection reasons.
//! - Numbers, Bools, Null: Immediate values
//! - Strings: Reference-counted, immutable
//! - Arrays and Records: Copy-on-write (Rc), value semantics
//! - Errors: Thrown messages, captured panics and aggregate rejections
//! - Futures and Thenables: Future-like values, adopted when used as a resolution
//!
//! Everything here is single-threaded (`Rc`), matching the cooperative
//! scheduling model of the runtime.

use crate::future::{PledgeFuture, Thenable};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Copy-on-write array. Cheap to clone (refcount bump).
/// Mutations on a shared array clone the inner Vec first (Rc::make_mut).
#[derive(Clone, Debug, Default)]
pub struct ValueArray(Rc<Vec<Value>>);

impl ValueArray {
    pub fn new() -> Self {
        ValueArray(Rc::new(Vec::new()))
    }

    pub fn from_vec(v: Vec<Value>) -> Self {
        ValueArray(Rc::new(v))
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Mutating access; clones the inner Vec if shared.
    pub fn push(&mut self, value: Value) {
        Rc::make_mut(&mut self.0).push(value);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// Convert to an owned Vec, cloning only if shared.
    pub fn into_vec(self) -> Vec<Value> {
        Rc::try_unwrap(self.0).unwrap_or_else(|rc| (*rc).clone())
    }
}

impl PartialEq for ValueArray {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice() == other.0.as_slice()
    }
}

impl std::ops::Index<usize> for ValueArray {
    type Output = Value;
    fn index(&self, index: usize) -> &Value {
        &self.0[index]
    }
}

impl From<Vec<Value>> for ValueArray {
    fn from(v: Vec<Value>) -> Self {
        ValueArray::from_vec(v)
    }
}

impl FromIterator<Value> for ValueArray {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        ValueArray(Rc::new(iter.into_iter().collect()))
    }
}

/// Copy-on-write string-keyed record with stable (sorted) key order.
#[derive(Clone, Debug, Default)]
pub struct ValueMap(Rc<BTreeMap<String, Value>>);

impl ValueMap {
    pub fn new() -> Self {
        ValueMap(Rc::new(BTreeMap::new()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        Rc::make_mut(&mut self.0).insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        ValueMap(Rc::new(
            iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }
}

/// Error values used as rejection reasons
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorValue {
    /// A thrown error with a message
    #[error("{0}")]
    Message(String),

    /// An executor or handler panicked
    #[error("panicked: {0}")]
    Panic(String),

    /// Every input of `any` rejected; reasons are kept in input order
    #[error("all {} futures were rejected", .0.len())]
    Aggregate(ValueArray),

    /// A future was resolved with itself
    #[error("chaining cycle detected for future #{0}")]
    Cycle(u64),
}

impl ErrorValue {
    pub fn message(msg: impl Into<String>) -> Self {
        ErrorValue::Message(msg.into())
    }

    /// Convert a panic payload into an error value
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ErrorValue::Panic(msg)
    }

    /// Individual reasons bundled in an aggregate rejection
    pub fn errors(&self) -> &[Value] {
        match self {
            ErrorValue::Aggregate(errors) => errors.as_slice(),
            _ => &[],
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, ErrorValue::Aggregate(_))
    }
}

/// Errors raised when reading a value as a specific type
///
/// Converts into a rejection reason, so handlers can use `?` on value accessors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing field '{0}'")]
    MissingField(String),
}

/// Runtime value
#[derive(Clone)]
pub enum Value {
    /// Absent value (a handler that produces nothing)
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (IEEE 754 double-precision)
    Number(f64),
    /// String value (reference-counted, immutable)
    String(Rc<str>),
    /// Array value (copy-on-write, value semantics)
    Array(ValueArray),
    /// Record value (settled-outcome records and other keyed data)
    Record(ValueMap),
    /// Error value (thrown errors, panics, aggregate rejections)
    Error(Rc<ErrorValue>),
    /// Future value (adopted when used as a resolution)
    Future(PledgeFuture),
    /// Foreign future-like value (adopted when used as a resolution)
    Thenable(Rc<dyn Thenable>),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    /// Create an error value with a message
    pub fn error(msg: impl Into<String>) -> Self {
        Value::Error(Rc::new(ErrorValue::message(msg)))
    }

    /// Create an array value
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(ValueArray::from_vec(values))
    }

    /// Create a record value from key/value pairs
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Record(fields.into_iter().collect())
    }

    /// Wrap a foreign future-like
    pub fn thenable(thenable: impl Thenable + 'static) -> Self {
        Value::Thenable(Rc::new(thenable))
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Error(_) => "error",
            Value::Future(_) => "future",
            Value::Thenable(_) => "thenable",
        }
    }

    fn mismatch(&self, expected: &'static str) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Result<f64, ValueError> {
        match self {
            Value::Number(n) => Ok(*n),
            _ => Err(self.mismatch("number")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(self.mismatch("bool")),
        }
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(self.mismatch("string")),
        }
    }

    pub fn as_array(&self) -> Result<&ValueArray, ValueError> {
        match self {
            Value::Array(arr) => Ok(arr),
            _ => Err(self.mismatch("array")),
        }
    }

    pub fn as_record(&self) -> Result<&ValueMap, ValueError> {
        match self {
            Value::Record(map) => Ok(map),
            _ => Err(self.mismatch("record")),
        }
    }

    pub fn as_error(&self) -> Result<&ErrorValue, ValueError> {
        match self {
            Value::Error(err) => Ok(err),
            _ => Err(self.mismatch("error")),
        }
    }

    pub fn as_future(&self) -> Result<&PledgeFuture, ValueError> {
        match self {
            Value::Future(future) => Ok(future),
            _ => Err(self.mismatch("future")),
        }
    }

    /// Read a record field
    pub fn field(&self, key: &str) -> Result<&Value, ValueError> {
        self.as_record()?
            .get(key)
            .ok_or_else(|| ValueError::MissingField(key.to_string()))
    }

    /// True for values that are adopted instead of stored when used as a resolution
    pub fn is_future_like(&self) -> bool {
        matches!(self, Value::Future(_) | Value::Thenable(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            // Futures compare by identity
            (Value::Future(a), Value::Future(b)) => a.ptr_eq(b),
            (Value::Thenable(a), Value::Thenable(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => {
                // Format number nicely (no trailing .0 for whole numbers)
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.0}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Array(arr) => {
                let elements: Vec<String> = arr.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", elements.join(", "))
            }
            Value::Record(map) => {
                let fields: Vec<String> = map.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", fields.join(", "))
            }
            Value::Error(err) => match err.as_ref() {
                ErrorValue::Aggregate(errors) => {
                    write!(f, "AggregateError: {} {}", err, Value::Array(errors.clone()))
                }
                other => write!(f, "Error: {}", other),
            },
            Value::Future(future) => write!(f, "{}", future),
            Value::Thenable(_) => write!(f, "<thenable>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Array(arr) => write!(f, "Array({:?})", arr.as_slice()),
            Value::Record(map) => f.debug_map().entries(map.iter()).finish(),
            Value::Error(err) => write!(f, "Error({:?})", err),
            Value::Future(future) => write!(f, "{:?}", future),
            Value::Thenable(t) => write!(f, "Thenable({:?})", t),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(ValueArray::from_vec(values))
    }
}

impl From<ValueArray> for Value {
    fn from(arr: ValueArray) -> Self {
        Value::Array(arr)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Record(map)
    }
}

impl From<ErrorValue> for Value {
    fn from(err: ErrorValue) -> Self {
        Value::Error(Rc::new(err))
    }
}

impl From<ValueError> for Value {
    fn from(err: ValueError) -> Self {
        Value::error(err.to_string())
    }
}

impl From<PledgeFuture> for Value {
    fn from(future: PledgeFuture) -> Self {
        Value::Future(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_display() {
        assert_eq!(Value::from(3).to_string(), "3");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_array_cow() {
        let mut a = ValueArray::from_vec(vec![Value::from(1)]);
        let b = a.clone();
        a.push(Value::from(2));
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_record_display_is_sorted() {
        let record = Value::record([("value", Value::from(1)), ("status", Value::from("fulfilled"))]);
        assert_eq!(record.to_string(), "{status: fulfilled, value: 1}");
    }

    #[test]
    fn test_type_mismatch() {
        let err = Value::from("x").as_number().unwrap_err();
        assert_eq!(err.to_string(), "expected number, found string");
        assert_eq!(Value::from(err), Value::error("expected number, found string"));
    }

    #[test]
    fn test_missing_field() {
        let record = Value::record([("status", Value::from("rejected"))]);
        assert_eq!(
            record.field("value"),
            Err(ValueError::MissingField("value".to_string()))
        );
    }

    #[test]
    fn test_panic_payloads() {
        let from_str = ErrorValue::from_panic(Box::new("boom"));
        let from_string = ErrorValue::from_panic(Box::new(String::from("bang")));
        let from_other = ErrorValue::from_panic(Box::new(42u8));

        assert_eq!(from_str, ErrorValue::Panic("boom".to_string()));
        assert_eq!(from_string, ErrorValue::Panic("bang".to_string()));
        assert_eq!(from_other.to_string(), "panicked: non-string panic payload");
    }

    #[test]
    fn test_aggregate_errors() {
        let agg = ErrorValue::Aggregate(ValueArray::from_vec(vec![Value::from(1), Value::from(2)]));
        assert!(agg.is_aggregate());
        assert_eq!(agg.errors(), &[Value::from(1), Value::from(2)]);
        assert_eq!(
            Value::from(agg).to_string(),
            "AggregateError: all 2 futures were rejected [1, 2]"
        );
    }
}
