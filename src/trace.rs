//! Contracts between the HTTP instrumentation and a trace subsystem.
//!
//! The instrumentation never decides whether a request is sampled and never
//! looks inside a propagation token. It asks a [`TraceFactory`] for a
//! [`Trace`] and later ends that trace with a metadata closure. Two factories
//! ship with this crate, [`crate::recorder::Recorder`] and
//! [`crate::otel::OtelTracer`]; [`NoopTracer`] never traces at all.

use std::fmt;

use indexmap::IndexMap;

/// A value carried in event metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Integer value, e.g. an HTTP status code.
    Int(i64),
    /// String value.
    Str(String),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

/// Insertion ordered key/value metadata attached to an event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KvMap(IndexMap<String, Value>);

impl KvMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`. An existing key keeps its position and has its value replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for KvMap
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for KvMap {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// The in-process handle for one request's distributed trace.
///
/// A trace is ended by value, so it can only be ended once.
pub trait Trace {
    /// Whether this trace is being recorded (sampled).
    fn is_tracing(&self) -> bool;

    /// The propagation token that continues this trace downstream.
    ///
    /// Meaningful only while [`Trace::is_tracing`] is true.
    fn exit_metadata(&self) -> String;

    /// Ends the trace. `metadata` is invoked at most once, and only if an
    /// exit event is actually recorded.
    fn end_callback<F>(self, metadata: F)
    where
        F: FnOnce() -> KvMap,
        Self: Sized;
}

/// Creates or continues traces from propagation tokens.
pub trait TraceFactory {
    /// The trace handle produced by this factory.
    type Trace: Trace;

    /// Continues the trace described by `token`, or starts a fresh one when
    /// the token is empty or cannot be understood.
    ///
    /// `metadata` describes the entry event and is invoked only if that
    /// event is recorded.
    fn new_trace_from_id<F>(&self, layer: &str, token: &str, metadata: F) -> Self::Trace
    where
        F: FnOnce() -> KvMap;
}

/// A [`TraceFactory`] for when no trace subsystem is available.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTracer;

/// The trace produced by [`NoopTracer`]. Never tracing, never emits events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTrace;

impl Trace for NoopTrace {
    fn is_tracing(&self) -> bool {
        false
    }

    fn exit_metadata(&self) -> String {
        String::new()
    }

    fn end_callback<F>(self, _metadata: F)
    where
        F: FnOnce() -> KvMap,
    {
    }
}

impl TraceFactory for NoopTracer {
    type Trace = NoopTrace;

    fn new_trace_from_id<F>(&self, _layer: &str, _token: &str, _metadata: F) -> NoopTrace
    where
        F: FnOnce() -> KvMap,
    {
        NoopTrace
    }
}
