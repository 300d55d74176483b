//! The transport contract and its `http`-crate implementation.
//!
//! The runner never touches sockets. A transport (a hyper service, a
//! serverless event shim, a test harness) implements [`RoundTrip`] for one
//! request/response exchange and hands it to [`Runner::run`](crate::Runner::run).
//!
//! [`HttpRoundTrip`] is the stock implementation over [`http::Request`] and
//! [`http::Response`]. It is what a hyper `service_fn` would build:
//!
//! ```rust,no_run
//! # use runway::{BufferPool, HttpRoundTrip, Runner, Shutdown};
//! # async fn serve(runner: Runner, req: http::Request<http_body_util::Full<bytes::Bytes>>) {
//! let mut rt = HttpRoundTrip::from_request(req, "/users/{id}", BufferPool::global()).await;
//! runner.run(&Shutdown::never(), &mut rt).await;
//! let response = rt.into_response();
//! # }
//! ```

use std::borrow::Cow;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use tracing::warn;
use uuid::Uuid;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::error::{BoxError, Error};
use crate::param::{query_lookup, template_lookup};

/// Header consulted for an upstream-assigned request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One request/response exchange, as seen by the runner.
///
/// Implementations own the request data and the response being built. The
/// runner calls [`write_response`](RoundTrip::write_response) exactly once
/// and then [`release`](RoundTrip::release).
pub trait RoundTrip: Send {
    fn request_id(&self) -> &str;
    fn method(&self) -> &Method;
    /// The actual request path, e.g. `/users/42`.
    fn path(&self) -> &str;
    /// The route template the path matched, e.g. `/users/{id}`.
    fn matched_path(&self) -> &str;
    fn request_headers(&self) -> &HeaderMap;

    /// First value of a request header, if present and visible ASCII.
    fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn content_type(&self) -> Option<&str> {
        self.request_header(CONTENT_TYPE.as_str())
    }

    fn accept(&self) -> Option<&str> {
        self.request_header(ACCEPT.as_str())
    }

    /// Looks up a path parameter by positional match against
    /// [`matched_path`](RoundTrip::matched_path).
    fn path_param(&self, name: &str) -> Option<&str> {
        template_lookup(self.matched_path(), self.path(), name)
    }

    fn query_param(&self, name: &str) -> Option<Cow<'_, str>>;

    /// The raw request body, or the transport failure that prevented
    /// reading it.
    fn request_body(&self) -> Result<&[u8], Error>;

    fn response_body(&self) -> &[u8];
    fn response_body_mut(&mut self) -> &mut BytesMut;

    fn status(&self) -> Option<StatusCode>;
    fn set_status(&mut self, status: StatusCode);

    fn response_headers(&self) -> &HeaderMap;
    fn response_headers_mut(&mut self) -> &mut HeaderMap;

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers_mut().insert(name, value);
    }

    fn response_content_type(&self) -> Option<&str> {
        self.response_headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    fn set_response_content_type(&mut self, value: HeaderValue) {
        self.set_header(CONTENT_TYPE, value);
    }

    /// Flushes status, headers and body to the transport.
    fn write_response(&mut self) -> Result<(), Error>;

    /// Returns pooled buffers. Calling it again is a no-op.
    fn release(&mut self);
}

// ── HttpRoundTrip ───────────────────────────────────────────────────────────

/// [`RoundTrip`] over the `http` crate's request and response types.
pub struct HttpRoundTrip {
    request_id: String,
    method: Method,
    uri: Uri,
    matched_path: String,
    request_headers: HeaderMap,
    request_body: Option<PooledBuffer>,
    body_error: Option<String>,
    response_body: Option<PooledBuffer>,
    response_headers: HeaderMap,
    status: Option<StatusCode>,
    response: Option<http::Response<Full<Bytes>>>,
    pool: BufferPool,
}

impl HttpRoundTrip {
    /// Builds a round trip from request parts and an already-buffered body.
    pub fn new(
        parts: http::request::Parts,
        body: &[u8],
        matched_path: impl Into<String>,
        pool: &BufferPool,
    ) -> Self {
        let mut request_body = pool.checkout();
        request_body.extend_from_slice(body);

        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);

        Self {
            request_id,
            method: parts.method,
            uri: parts.uri,
            matched_path: matched_path.into(),
            request_headers: parts.headers,
            request_body: Some(request_body),
            body_error: None,
            response_body: Some(pool.checkout()),
            response_headers: HeaderMap::new(),
            status: None,
            response: None,
            pool: pool.clone(),
        }
    }

    /// Collects the request body and builds a round trip.
    ///
    /// A body that fails mid-stream does not fail here; the error is kept
    /// and surfaces from [`RoundTrip::request_body`] during dispatch.
    pub async fn from_request<B>(
        req: http::Request<B>,
        matched_path: impl Into<String>,
        pool: &BufferPool,
    ) -> Self
    where
        B: hyper::body::Body,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let mut rt = Self::new(parts, &[], matched_path, pool);
        match body.collect().await {
            Ok(collected) => {
                if let Some(buf) = rt.request_body.as_mut() {
                    buf.put(collected.aggregate());
                }
            }
            Err(e) => rt.body_error = Some(Into::<BoxError>::into(e).to_string()),
        }
        rt
    }

    /// The response written by [`RoundTrip::write_response`], if any.
    pub fn response(&self) -> Option<&http::Response<Full<Bytes>>> {
        self.response.as_ref()
    }

    /// Consumes the round trip and yields the response to send.
    ///
    /// A round trip that was never finalized yields whatever has been built
    /// so far.
    pub fn into_response(mut self) -> http::Response<Full<Bytes>> {
        if self.response.is_none() {
            self.finish();
        }
        self.release();
        self.response.take().unwrap_or_else(|| {
            let mut resp = http::Response::new(Full::new(Bytes::new()));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        })
    }

    fn finish(&mut self) {
        let status = self.status.unwrap_or_else(|| {
            warn!(request_id = %self.request_id, "response finalized without a status");
            StatusCode::INTERNAL_SERVER_ERROR
        });
        let body = self
            .response_body
            .as_deref()
            .map_or_else(Bytes::new, |buf| Bytes::copy_from_slice(buf));

        let mut resp = http::Response::new(Full::new(body));
        *resp.status_mut() = status;
        *resp.headers_mut() = self.response_headers.clone();
        self.response = Some(resp);
    }
}

impl RoundTrip for HttpRoundTrip {
    fn request_id(&self) -> &str {
        &self.request_id
    }

    fn method(&self) -> &Method {
        &self.method
    }

    fn path(&self) -> &str {
        self.uri.path()
    }

    fn matched_path(&self) -> &str {
        &self.matched_path
    }

    fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        query_lookup(self.uri.query()?, name)
    }

    fn request_body(&self) -> Result<&[u8], Error> {
        if let Some(e) = &self.body_error {
            return Err(Error::Transport(e.clone().into()));
        }
        Ok(self.request_body.as_deref().map(|buf| &buf[..]).unwrap_or_default())
    }

    fn response_body(&self) -> &[u8] {
        self.response_body.as_deref().map(|buf| &buf[..]).unwrap_or_default()
    }

    fn response_body_mut(&mut self) -> &mut BytesMut {
        self.response_body.get_or_insert_with(|| self.pool.checkout())
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    fn write_response(&mut self) -> Result<(), Error> {
        if self.response.is_some() {
            warn!(request_id = %self.request_id, "response already written");
        }
        self.finish();
        Ok(())
    }

    fn release(&mut self) {
        self.request_body.take();
        self.response_body.take();
    }
}

impl fmt::Debug for HttpRoundTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRoundTrip")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("matched_path", &self.matched_path)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
