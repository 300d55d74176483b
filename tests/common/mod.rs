#![allow(dead_code)]

use std::borrow::Cow;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame};
use runway::{
    Authorizer, BoxError, BufferPool, Context, Error, Handler, HandlerError, HttpRoundTrip, Parameter,
    Payload, RoundTrip,
};
use serde::{Deserialize, Serialize};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ── Requests ────────────────────────────────────────────────────────────────

pub struct RequestSpec<'a> {
    pub method: Method,
    pub uri: &'a str,
    pub template: &'a str,
    pub headers: Vec<(&'static str, &'a str)>,
    pub body: &'a [u8],
}

impl<'a> RequestSpec<'a> {
    pub fn get(uri: &'a str, template: &'a str) -> Self {
        Self { method: Method::GET, uri, template, headers: vec![("accept", "application/json")], body: b"" }
    }

    pub fn post_json(uri: &'a str, template: &'a str, body: &'a [u8]) -> Self {
        Self {
            method: Method::POST,
            uri,
            template,
            headers: vec![("content-type", "application/json"), ("accept", "application/json")],
            body,
        }
    }

    pub fn header(mut self, name: &'static str, value: &'a str) -> Self {
        self.headers.retain(|(n, _)| *n != name);
        self.headers.push((name, value));
        self
    }

    pub fn build(self, pool: &BufferPool) -> HttpRoundTrip {
        let mut builder = http::Request::builder().method(self.method).uri(self.uri);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        HttpRoundTrip::new(parts, self.body, self.template, pool)
    }
}

pub async fn body_bytes(resp: http::Response<Full<Bytes>>) -> Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

/// A body whose first frame is a transport error.
pub struct FailingBody;

impl Body for FailingBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(Some(Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"))))
    }
}

// ── Counting round trip ─────────────────────────────────────────────────────

/// Delegates to [`HttpRoundTrip`] and counts finalization calls.
pub struct CountingRoundTrip {
    inner: HttpRoundTrip,
    pub writes: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl CountingRoundTrip {
    pub fn new(inner: HttpRoundTrip) -> Self {
        Self { inner, writes: Arc::default(), releases: Arc::default() }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn into_inner(self) -> HttpRoundTrip {
        self.inner
    }
}

impl RoundTrip for CountingRoundTrip {
    fn request_id(&self) -> &str {
        self.inner.request_id()
    }

    fn method(&self) -> &Method {
        self.inner.method()
    }

    fn path(&self) -> &str {
        self.inner.path()
    }

    fn matched_path(&self) -> &str {
        self.inner.matched_path()
    }

    fn request_headers(&self) -> &HeaderMap {
        self.inner.request_headers()
    }

    fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        self.inner.query_param(name)
    }

    fn request_body(&self) -> Result<&[u8], Error> {
        self.inner.request_body()
    }

    fn response_body(&self) -> &[u8] {
        self.inner.response_body()
    }

    fn response_body_mut(&mut self) -> &mut BytesMut {
        self.inner.response_body_mut()
    }

    fn status(&self) -> Option<StatusCode> {
        self.inner.status()
    }

    fn set_status(&mut self, status: StatusCode) {
        self.inner.set_status(status);
    }

    fn response_headers(&self) -> &HeaderMap {
        self.inner.response_headers()
    }

    fn response_headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.response_headers_mut()
    }

    fn write_response(&mut self) -> Result<(), Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_response()
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release();
    }
}

// ── Handlers ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EchoInput {
    #[serde(rename = "myString")]
    pub my_string: String,
    #[serde(rename = "myInt")]
    pub my_int: i64,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EchoOutput {
    #[serde(rename = "outputString")]
    pub output_string: String,
    #[serde(rename = "outputInt")]
    pub output_int: i64,
}

runway::json_payload!(EchoInput, EchoOutput);

/// Copies the decoded body into the response.
#[derive(Default)]
pub struct Echo {
    input: EchoInput,
    output: EchoOutput,
}

impl Handler for Echo {
    async fn handle(&mut self, _cx: &Context) -> Result<StatusCode, HandlerError> {
        self.output.output_string = std::mem::take(&mut self.input.my_string);
        self.output.output_int = self.input.my_int;
        Ok(StatusCode::OK)
    }

    fn request_body(&mut self) -> Option<&mut dyn Payload> {
        Some(&mut self.input)
    }

    fn response_body(&self) -> Option<&dyn Payload> {
        Some(&self.output)
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UserView {
    pub id: u64,
    pub page: u32,
    pub verbose: bool,
}

runway::json_payload!(UserView);

/// `/users/{id}` with optional `page` and `verbose` query parameters.
#[derive(Default)]
pub struct GetUser {
    id: u64,
    page: u32,
    verbose: bool,
    view: UserView,
}

impl Handler for GetUser {
    async fn handle(&mut self, _cx: &Context) -> Result<StatusCode, HandlerError> {
        if self.id == 404 {
            return Err(HandlerError::new(StatusCode::NOT_FOUND, "no such user"));
        }
        self.view = UserView { id: self.id, page: self.page, verbose: self.verbose };
        Ok(StatusCode::OK)
    }

    fn response_body(&self) -> Option<&dyn Payload> {
        Some(&self.view)
    }

    fn path_parameters(&mut self) -> Vec<Parameter<'_>> {
        vec![Parameter::new("id", &mut self.id)]
    }

    fn query_parameters(&mut self) -> Vec<Parameter<'_>> {
        vec![Parameter::new("page", &mut self.page), Parameter::new("verbose", &mut self.verbose)]
    }
}

/// Always returns the same document, for conditional caching.
pub struct Fixed {
    body: String,
}

impl Default for Fixed {
    fn default() -> Self {
        Self { body: "stable representation".to_owned() }
    }
}

impl Handler for Fixed {
    async fn handle(&mut self, _cx: &Context) -> Result<StatusCode, HandlerError> {
        Ok(StatusCode::OK)
    }

    fn response_body(&self) -> Option<&dyn Payload> {
        Some(&self.body)
    }
}

/// Sleeps longer than any test timeout.
#[derive(Default)]
pub struct Slow;

impl Handler for Slow {
    async fn handle(&mut self, _cx: &Context) -> Result<StatusCode, HandlerError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(StatusCode::OK)
    }
}

/// Waits for the context to end, then claims success.
#[derive(Default)]
pub struct UntilDone;

impl Handler for UntilDone {
    async fn handle(&mut self, cx: &Context) -> Result<StatusCode, HandlerError> {
        cx.done().await;
        Ok(StatusCode::OK)
    }
}

#[derive(Default)]
pub struct Panicky;

impl Handler for Panicky {
    async fn handle(&mut self, _cx: &Context) -> Result<StatusCode, HandlerError> {
        panic!("handler exploded");
    }
}

/// Requires `authorization: Bearer letmein`.
#[derive(Default)]
pub struct Guarded {
    gate: BearerGate,
}

#[derive(Default)]
pub struct BearerGate;

impl Authorizer for BearerGate {
    fn authorize(&self, rt: &dyn RoundTrip) -> Result<(), BoxError> {
        match rt.request_header("authorization") {
            Some("Bearer letmein") => Ok(()),
            Some(_) => Err("invalid token".into()),
            None => Err("missing token".into()),
        }
    }
}

impl Handler for Guarded {
    async fn handle(&mut self, _cx: &Context) -> Result<StatusCode, HandlerError> {
        Ok(StatusCode::NO_CONTENT)
    }

    fn authorizer(&self) -> Option<&dyn Authorizer> {
        Some(&self.gate)
    }
}
