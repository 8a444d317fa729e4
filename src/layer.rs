//! Tower middleware reporting entry and exit events for HTTP services.
//!
//! The service counterpart of [`crate::handler::Traced`]: the status is taken
//! from the response the inner service returns, and the outbound `X-Trace`
//! header is added to that response's head before any of its body is sent.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Request, Response, StatusCode};
use tower::{Layer, Service};

use crate::extract::{trace_from_request, X_TRACE};
use crate::handler::{outbound_token, CompletionGuard, Labels, DEFAULT_LAYER_NAME};
use crate::observer::ObservedStatus;
use crate::trace::TraceFactory;

/// Tower layer for X-Trace instrumentation.
#[derive(Clone)]
pub struct XTraceLayer<T> {
    tracer: T,
    layer_name: Arc<str>,
    labels: Option<Arc<Labels>>,
}

impl<T> XTraceLayer<T> {
    /// A layer reporting through `tracer` under [`DEFAULT_LAYER_NAME`].
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            layer_name: Arc::from(DEFAULT_LAYER_NAME),
            labels: None,
        }
    }

    /// Reports events under `layer_name`.
    pub fn with_layer_name(mut self, layer_name: impl AsRef<str>) -> Self {
        self.layer_name = Arc::from(layer_name.as_ref());
        self
    }

    /// Reports `labels` for every service this layer wraps, instead of
    /// resolving them from the service type.
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = Some(Arc::new(labels));
        self
    }
}

impl<T> fmt::Debug for XTraceLayer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XTraceLayer")
            .field("layer_name", &self.layer_name)
            .field("labels", &self.labels)
            .finish()
    }
}

impl<S, T: Clone> Layer<S> for XTraceLayer<T> {
    type Service = XTraceService<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        let labels = match &self.labels {
            Some(labels) => Arc::clone(labels),
            None => Arc::new(Labels::of::<S>()),
        };
        XTraceService {
            inner,
            tracer: self.tracer.clone(),
            layer_name: Arc::clone(&self.layer_name),
            labels,
        }
    }
}

/// Tower service reporting an entry and an exit event per request.
#[derive(Clone)]
pub struct XTraceService<S, T> {
    inner: S,
    tracer: T,
    layer_name: Arc<str>,
    labels: Arc<Labels>,
}

impl<S, T> XTraceService<S, T> {
    /// The labels reported by this service.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }
}

impl<S, T> fmt::Debug for XTraceService<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XTraceService")
            .field("service", &type_name::<S>())
            .field("layer_name", &self.layer_name)
            .field("labels", &self.labels)
            .finish()
    }
}

impl<S, T, ReqBody, ResBody> Service<Request<ReqBody>> for XTraceService<S, T>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    <S as Service<Request<ReqBody>>>::Future: Send + 'static,
    T: TraceFactory,
    T::Trace: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let trace = trace_from_request(&self.tracer, &self.layer_name, &req);
        let token = outbound_token(&trace);

        let status = ObservedStatus::new();
        let guard = CompletionGuard::new(trace, status.clone(), Arc::clone(&self.labels));

        let fut = self.inner.call(req);

        Box::pin(async move {
            let _guard = guard;
            let result = fut.await;
            match result {
                Ok(mut response) => {
                    status.set(response.status());
                    if let Some(token) = token {
                        response.headers_mut().insert(X_TRACE, token);
                    }
                    Ok(response)
                }
                Err(err) => {
                    status.set(StatusCode::INTERNAL_SERVER_ERROR);
                    Err(err)
                }
            }
        })
    }
}
