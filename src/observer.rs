//! Observing the status code a handler writes.

use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use http::{HeaderMap, Response, StatusCode};

/// The response-writing side of a handler.
///
/// The head (status and headers) is committed by the first call to
/// [`ResponseWriter::write_header`] or [`ResponseWriter::write`]; a body
/// write without an explicit status commits `200 OK`.
pub trait ResponseWriter {
    /// The response headers. Changes made after the head is committed are not sent.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Writes part of the response body.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Sends the response head with `status`.
    fn write_header(&mut self, status: StatusCode);

    /// Writes the whole of `buf` to the response body.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn write_header(&mut self, status: StatusCode) {
        (**self).write_header(status)
    }
}

/// A status code cell shared between a [`StatusObserver`] and whoever reads
/// the final status. Starts out as `200 OK`.
#[derive(Clone, Debug)]
pub struct ObservedStatus(Arc<AtomicU16>);

impl ObservedStatus {
    /// A new cell holding `200 OK`.
    pub fn new() -> Self {
        Self(Arc::new(AtomicU16::new(StatusCode::OK.as_u16())))
    }

    /// The stored status as a raw code.
    pub fn get(&self) -> u16 {
        self.0.load(Ordering::Relaxed)
    }

    /// The stored status.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.get()).unwrap_or(StatusCode::OK)
    }

    /// Stores `status`.
    pub fn set(&self, status: StatusCode) {
        self.0.store(status.as_u16(), Ordering::Relaxed);
    }
}

impl Default for ObservedStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a [`ResponseWriter`] and records the status it commits.
///
/// Everything is forwarded to the wrapped writer. Only the status that
/// actually commits the head is recorded: a `write_header` after the head
/// went out (explicitly, or implicitly by a body write) is forwarded but not
/// recorded, as the wrapped writer will ignore it too.
#[derive(Debug)]
pub struct StatusObserver<W> {
    inner: W,
    status: ObservedStatus,
    committed: bool,
}

impl<W: ResponseWriter> StatusObserver<W> {
    /// Observes `inner` with a fresh status cell.
    pub fn new(inner: W) -> Self {
        Self::with_status(inner, ObservedStatus::new())
    }

    /// Observes `inner`, recording into the caller's `status` cell.
    pub fn with_status(inner: W, status: ObservedStatus) -> Self {
        Self {
            inner,
            status,
            committed: false,
        }
    }

    /// The cell the committed status is recorded in.
    pub fn status(&self) -> &ObservedStatus {
        &self.status
    }

    /// Unwraps the observed writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: ResponseWriter> ResponseWriter for StatusObserver<W> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.committed = true;
        self.inner.write(buf)
    }

    fn write_header(&mut self, status: StatusCode) {
        if !self.committed {
            self.status.set(status);
            self.committed = true;
        }
        self.inner.write_header(status);
    }
}

/// An in-memory [`ResponseWriter`] that builds an [`http::Response`].
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    headers: HeaderMap,
    head: Option<(StatusCode, HeaderMap)>,
    body: Vec<u8>,
}

impl ResponseBuffer {
    /// An empty, uncommitted response.
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status, if the head has been written.
    pub fn status(&self) -> Option<StatusCode> {
        self.head.as_ref().map(|(status, _)| *status)
    }

    /// The body written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn commit(&mut self, status: StatusCode) {
        if self.head.is_none() {
            self.head = Some((status, self.headers.clone()));
        }
    }

    /// Finishes the response. An uncommitted response is sent as `200 OK`
    /// with the current headers.
    pub fn into_response(self) -> Response<Vec<u8>> {
        let (status, headers) = self.head.unwrap_or((StatusCode::OK, self.headers));
        let mut response = Response::new(self.body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl ResponseWriter for ResponseBuffer {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.commit(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn write_header(&mut self, status: StatusCode) {
        match self.head {
            Some((committed, _)) => tracing::warn!(
                committed = committed.as_u16(),
                ignored = status.as_u16(),
                "superfluous write_header call"
            ),
            None => self.commit(status),
        }
    }
}
