//! Wrapping HTTP handlers with entry and exit events.
//!
//! [`Instrumentation::wrap`] turns a [`Handler`] into a [`Traced`] handler
//! with the same signature. Per request the traced handler:
//!
//! 1. continues or starts a trace from the `X-Trace` request header,
//! 2. echoes the trace's `X-Trace` token on the response when it is sampled,
//!    before the handler can write anything,
//! 3. hands the handler a [`StatusObserver`] instead of the underlying writer,
//! 4. ends the trace with `Status`, `Controller` and `Action` once the
//!    handler is done, whether it returns or unwinds.

use std::any::type_name;
use std::sync::Arc;

use http::{HeaderValue, Request};

use crate::config::InstrumentationSettings;
use crate::extract::{trace_from_request, X_TRACE};
use crate::layer::XTraceLayer;
use crate::observer::{ObservedStatus, ResponseWriter, StatusObserver};
use crate::trace::{KvMap, Trace, TraceFactory};

/// Layer name used when none is configured.
pub const DEFAULT_LAYER_NAME: &str = "http";

/// Something that serves a request by writing a response.
pub trait Handler<B> {
    /// Serves `req`, writing the response to `w`.
    fn serve(&self, w: &mut dyn ResponseWriter, req: &Request<B>);
}

impl<B, F> Handler<B> for F
where
    F: Fn(&mut dyn ResponseWriter, &Request<B>),
{
    fn serve(&self, w: &mut dyn ResponseWriter, req: &Request<B>) {
        self(w, req)
    }
}

/// The `Controller` / `Action` pair reported for a wrapped handler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels {
    controller: String,
    action: String,
}

impl Labels {
    /// Explicit labels.
    pub fn new(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            action: action.into(),
        }
    }

    /// Labels from a path such as `orders::list`.
    ///
    /// A leading `&` and generic arguments are ignored. Anything other than
    /// exactly two non-empty `::` separated segments yields empty labels.
    pub fn from_type_name(name: &str) -> Self {
        let mut path = String::with_capacity(name.len());
        let mut depth = 0usize;
        for c in name.trim_start_matches('&').chars() {
            match c {
                '<' => depth += 1,
                '>' => depth = depth.saturating_sub(1),
                _ if depth == 0 => path.push(c),
                _ => {}
            }
        }
        let parts: Vec<&str> = path.split("::").collect();
        match parts.as_slice() {
            [controller, action] if !controller.is_empty() && !action.is_empty() => {
                Self::new(*controller, *action)
            }
            _ => Self::default(),
        }
    }

    /// Best-effort labels for the type `H`.
    ///
    /// A function item declared at the root of crate `shop` as `fn checkout`
    /// is labelled `("shop", "checkout")`. Closures, methods and nested
    /// modules resolve to empty labels.
    pub fn of<H: ?Sized>() -> Self {
        let name = type_name::<H>();
        let labels = Self::from_type_name(name);
        tracing::debug!(
            handler = name,
            controller = labels.controller.as_str(),
            action = labels.action.as_str(),
            "resolved handler labels"
        );
        labels
    }

    /// The controller label.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// The action label.
    pub fn action(&self) -> &str {
        &self.action
    }

    fn exit_metadata(&self, status: u16) -> KvMap {
        let mut kv = KvMap::new();
        kv.insert("Status", status);
        kv.insert("Controller", self.controller.as_str());
        kv.insert("Action", self.action.as_str());
        kv
    }
}

/// Ends a trace when dropped, reporting the status observed at that moment.
///
/// Dropping happens on normal return, on panic unwind, and when a response
/// future is abandoned, so every trace is closed exactly once.
pub(crate) struct CompletionGuard<T: Trace> {
    trace: Option<T>,
    status: ObservedStatus,
    labels: Arc<Labels>,
}

impl<T: Trace> CompletionGuard<T> {
    pub(crate) fn new(trace: T, status: ObservedStatus, labels: Arc<Labels>) -> Self {
        Self {
            trace: Some(trace),
            status,
            labels,
        }
    }
}

impl<T: Trace> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        let Some(trace) = self.trace.take() else {
            return;
        };
        let status = self.status.clone();
        let labels = Arc::clone(&self.labels);
        trace.end_callback(move || labels.exit_metadata(status.get()));
    }
}

/// The outbound `X-Trace` value for `trace`, when it is sampled.
pub(crate) fn outbound_token<T: Trace>(trace: &T) -> Option<HeaderValue> {
    if !trace.is_tracing() {
        return None;
    }
    let token = trace.exit_metadata();
    match HeaderValue::try_from(token) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(%err, "trace produced an unusable X-Trace token");
            None
        }
    }
}

/// Builds traced handlers and layers around one trace subsystem.
#[derive(Clone, Debug)]
pub struct Instrumentation<T> {
    tracer: T,
    layer_name: Arc<str>,
}

impl<T: TraceFactory> Instrumentation<T> {
    /// Instrumentation reporting under [`DEFAULT_LAYER_NAME`].
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            layer_name: Arc::from(DEFAULT_LAYER_NAME),
        }
    }

    /// Instrumentation configured from `settings`.
    pub fn from_settings(tracer: T, settings: &InstrumentationSettings) -> Self {
        Self::new(tracer).with_layer_name(settings.layer_name())
    }

    /// Reports events under `layer_name`.
    pub fn with_layer_name(mut self, layer_name: impl AsRef<str>) -> Self {
        self.layer_name = Arc::from(layer_name.as_ref());
        self
    }

    /// The layer name events are reported under.
    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    /// The trace subsystem.
    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Wraps `handler`, labelling its events from the handler's type name.
    pub fn wrap<H>(&self, handler: H) -> Traced<H, T>
    where
        T: Clone,
    {
        self.wrap_with_labels(handler, Labels::of::<H>())
    }

    /// Wraps `handler` with explicit labels.
    pub fn wrap_with_labels<H>(&self, handler: H, labels: Labels) -> Traced<H, T>
    where
        T: Clone,
    {
        Traced {
            handler,
            tracer: self.tracer.clone(),
            layer_name: Arc::clone(&self.layer_name),
            labels: Arc::new(labels),
        }
    }

    /// A tower layer applying the same instrumentation to services.
    pub fn layer(&self) -> XTraceLayer<T>
    where
        T: Clone,
    {
        XTraceLayer::new(self.tracer.clone()).with_layer_name(&self.layer_name)
    }
}

/// A handler reporting entry and exit events for every request it serves.
#[derive(Clone, Debug)]
pub struct Traced<H, T> {
    handler: H,
    tracer: T,
    layer_name: Arc<str>,
    labels: Arc<Labels>,
}

impl<H, T> Traced<H, T> {
    /// The labels resolved when the handler was wrapped.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// The wrapped handler.
    pub fn get_ref(&self) -> &H {
        &self.handler
    }
}

impl<B, H, T> Handler<B> for Traced<H, T>
where
    H: Handler<B>,
    T: TraceFactory,
{
    fn serve(&self, w: &mut dyn ResponseWriter, req: &Request<B>) {
        let trace = trace_from_request(&self.tracer, &self.layer_name, req);

        // must be set before the handler can commit the head
        if let Some(token) = outbound_token(&trace) {
            w.headers_mut().insert(X_TRACE, token);
        }

        let status = ObservedStatus::new();
        let mut observed = StatusObserver::with_status(w, status.clone());
        let _guard = CompletionGuard::new(trace, status, Arc::clone(&self.labels));

        self.handler.serve(&mut observed, req);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_handler(_w: &mut dyn ResponseWriter, _req: &Request<()>) {}

    #[test]
    fn two_segments_become_labels() {
        let labels = Labels::from_type_name("shop::checkout");
        assert_eq!(labels.controller(), "shop");
        assert_eq!(labels.action(), "checkout");
    }

    #[test]
    fn references_and_generic_arguments_are_ignored() {
        assert_eq!(
            Labels::from_type_name("shop::handler<()>"),
            Labels::new("shop", "handler")
        );
        assert_eq!(
            Labels::from_type_name("&shop::checkout"),
            Labels::new("shop", "checkout")
        );
        assert_eq!(
            Labels::from_type_name("&&shop::list<alloc::string::String, u8>"),
            Labels::new("shop", "list")
        );
        assert_eq!(
            Labels::from_type_name("shop::handler<()>::{{closure}}"),
            Labels::default()
        );
    }

    #[test]
    fn other_shapes_leave_labels_empty() {
        for name in [
            "checkout",
            "shop::cart::checkout",
            "shop::",
            "::checkout",
            "",
            "shop::checkout::{{closure}}",
        ] {
            assert_eq!(Labels::from_type_name(name), Labels::default(), "{name}");
        }
    }

    #[test]
    fn nested_function_items_are_not_labelled() {
        // resolves to xtrace::handler::tests::nested_handler
        let labels = Labels::of::<fn(&mut dyn ResponseWriter, &Request<()>)>();
        assert_eq!(labels, Labels::default());

        fn type_of<H>(_: &H) -> Labels {
            Labels::of::<H>()
        }
        assert_eq!(type_of(&nested_handler), Labels::default());
    }

    #[test]
    fn exit_metadata_reports_status_and_labels() {
        let kv = Labels::new("orders", "list").exit_metadata(404);
        let keys: Vec<&str> = kv.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["Status", "Controller", "Action"]);
        assert_eq!(kv.get("Status"), Some(&404u16.into()));
        assert_eq!(kv.get("Action"), Some(&"list".into()));
    }
}
