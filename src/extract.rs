//! Establishing a trace from an inbound request.

use std::net::SocketAddr;

use http::header::{HeaderName, HOST};
use http::Request;

use crate::trace::{KvMap, TraceFactory};

/// The header carrying the propagation token, both inbound and outbound.
pub const X_TRACE: HeaderName = HeaderName::from_static("x-trace");

/// Peer address of the connection a request arrived on.
///
/// Servers insert this into the request extensions; a bare [`SocketAddr`]
/// extension is accepted as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Request attributes reported with the entry event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Host the request was addressed to.
    pub host: String,
    /// URL path without the query.
    pub path: String,
    /// Remote peer address, empty when the server did not provide one.
    pub remote_addr: String,
    /// Raw query string without the leading `?`.
    pub query: String,
}

impl RequestMetadata {
    /// Snapshots the reportable attributes of `req`.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let host = match req.uri().authority() {
            Some(authority) => match authority.port() {
                Some(port) => format!("{}:{port}", authority.host()),
                None => authority.host().to_owned(),
            },
            None => req
                .headers()
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_owned(),
        };

        let remote_addr = req
            .extensions()
            .get::<RemoteAddr>()
            .map(|addr| addr.0)
            .or_else(|| req.extensions().get::<SocketAddr>().copied())
            .map(|addr| addr.to_string())
            .unwrap_or_default();

        Self {
            method: req.method().as_str().to_owned(),
            host,
            path: req.uri().path().to_owned(),
            remote_addr,
            query: req.uri().query().unwrap_or_default().to_owned(),
        }
    }

    /// Converts the snapshot into entry event metadata.
    pub fn into_kv(self) -> KvMap {
        let mut kv = KvMap::new();
        kv.insert("Method", self.method);
        kv.insert("HTTP-Host", self.host);
        kv.insert("URL", self.path);
        kv.insert("Remote-Host", self.remote_addr);
        kv.insert("Query-String", self.query);
        kv
    }
}

/// The inbound propagation token, or `""` when the header is absent or not
/// visible ASCII.
pub fn propagation_token<B>(req: &Request<B>) -> &str {
    req.headers()
        .get(X_TRACE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Continues the trace described by the request's `X-Trace` header, or
/// starts a fresh one.
///
/// Request metadata is captured now but only converted if the trace
/// subsystem records an entry event.
pub fn trace_from_request<T, B>(tracer: &T, layer: &str, req: &Request<B>) -> T::Trace
where
    T: TraceFactory,
{
    let metadata = RequestMetadata::from_request(req);
    tracer.new_trace_from_id(layer, propagation_token(req), move || metadata.into_kv())
}
