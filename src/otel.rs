//! OpenTelemetry-backed trace subsystem.
//!
//! The `X-Trace` token is a W3C `traceparent` value. Each request becomes a
//! server span named after the instrumentation layer, a child of the remote
//! span when the token continues a trace. Entry and exit metadata become span
//! attributes, and are only built when the span is recording.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::propagation::TextMapPropagator as _;
use opentelemetry::trace::{Span, SpanContext, SpanKind, TraceContextExt as _, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;

use crate::trace::{KvMap, Trace, TraceFactory, Value};

const TRACEPARENT: &str = "traceparent";

impl From<Value> for opentelemetry::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Int(v) => opentelemetry::Value::I64(v),
            Value::Str(v) => opentelemetry::Value::from(v),
            Value::Bool(v) => opentelemetry::Value::Bool(v),
        }
    }
}

fn attributes(kv: KvMap) -> impl Iterator<Item = KeyValue> {
    kv.into_iter().map(|(key, value)| KeyValue::new(key, value))
}

/// Starts a span per request on an OpenTelemetry [`Tracer`].
#[derive(Debug)]
pub struct OtelTracer<T = BoxedTracer> {
    tracer: Arc<T>,
    propagator: TraceContextPropagator,
}

impl<T> Clone for OtelTracer<T> {
    fn clone(&self) -> Self {
        Self {
            tracer: Arc::clone(&self.tracer),
            propagator: TraceContextPropagator::new(),
        }
    }
}

impl OtelTracer {
    /// Uses the tracer named `name` from the global tracer provider.
    ///
    /// Without an installed provider no span is ever recorded.
    pub fn global(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(global::tracer(name))
    }
}

impl<T> OtelTracer<T> {
    /// Uses `tracer`.
    pub fn new(tracer: T) -> Self {
        Self {
            tracer: Arc::new(tracer),
            propagator: TraceContextPropagator::new(),
        }
    }

    fn parent_context(&self, token: &str) -> Context {
        if token.is_empty() {
            return Context::new();
        }
        let carrier = HashMap::from([(TRACEPARENT.to_owned(), token.to_owned())]);
        self.propagator.extract_with_context(&Context::new(), &carrier)
    }
}

impl<T> TraceFactory for OtelTracer<T>
where
    T: Tracer,
{
    type Trace = OtelTrace<T::Span>;

    fn new_trace_from_id<F>(&self, layer: &str, token: &str, metadata: F) -> Self::Trace
    where
        F: FnOnce() -> KvMap,
    {
        let parent = self.parent_context(token);
        let continued = parent.has_active_span();
        if !continued && !token.is_empty() {
            tracing::debug!(token, "malformed X-Trace token, starting a new trace");
        }

        let mut span = self
            .tracer
            .span_builder(layer.to_owned())
            .with_kind(SpanKind::Server)
            .start_with_context(self.tracer.as_ref(), &parent);
        if span.is_recording() {
            span.set_attributes(attributes(metadata()));
        }

        OtelTrace { span, continued }
    }
}

/// One request's span.
#[derive(Debug)]
pub struct OtelTrace<S> {
    span: S,
    continued: bool,
}

impl<S: Span> OtelTrace<S> {
    /// Whether the span continues a remote trace.
    pub fn is_continued(&self) -> bool {
        self.continued
    }

    /// The span's context.
    pub fn span_context(&self) -> &SpanContext {
        self.span.span_context()
    }
}

impl<S: Span> Trace for OtelTrace<S> {
    fn is_tracing(&self) -> bool {
        self.span.is_recording() && self.span.span_context().is_sampled()
    }

    fn exit_metadata(&self) -> String {
        let cx = Context::new().with_remote_span_context(self.span.span_context().clone());
        let mut carrier: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::new().inject_context(&cx, &mut carrier);
        carrier.remove(TRACEPARENT).unwrap_or_default()
    }

    fn end_callback<F>(mut self, metadata: F)
    where
        F: FnOnce() -> KvMap,
    {
        if self.span.is_recording() {
            self.span.set_attributes(attributes(metadata()));
        }
        self.span.end();
    }
}
