//! # runway
//!
//! A request dispatch engine. Give it a declarative handler and one
//! request/response exchange; it runs the request end to end and always
//! produces a status and a body.
//!
//! ## The contract
//!
//! Your server owns sockets, routing, TLS and shutdown orchestration.
//! runway does not. It owns what happens between "this route matched" and
//! "here is the response":
//!
//! - Body decoding by `Content-Type`, encoding by `Accept`
//! - Path and query parameter binding into typed fields
//! - Authorization before business logic
//! - A per-route deadline, checked between phases
//! - ETag / `If-None-Match` / `If-Match` handling
//! - One recovery boundary: failures and panics become formatted responses
//!
//! The pipeline talks to the transport through the [`RoundTrip`] trait.
//! [`HttpRoundTrip`] implements it over `http::Request` / `http::Response`,
//! which is what a hyper or axum service already has in hand.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use runway::{BufferPool, Context, Handler, HandlerError, HttpRoundTrip, Parameter, Payload, Route, Shutdown};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Deserialize, Serialize)]
//! struct Input {
//!     #[serde(rename = "myString")]
//!     my_string: String,
//! }
//!
//! #[derive(Default, Deserialize, Serialize)]
//! struct Output {
//!     #[serde(rename = "outputString")]
//!     output_string: String,
//! }
//!
//! runway::json_payload!(Input, Output);
//!
//! #[derive(Default)]
//! struct Echo {
//!     input: Input,
//!     output: Output,
//!     id: u64,
//! }
//!
//! impl Handler for Echo {
//!     async fn handle(&mut self, _cx: &Context) -> Result<StatusCode, HandlerError> {
//!         self.output.output_string = std::mem::take(&mut self.input.my_string);
//!         Ok(StatusCode::OK)
//!     }
//!
//!     fn request_body(&mut self) -> Option<&mut dyn Payload> {
//!         Some(&mut self.input)
//!     }
//!
//!     fn response_body(&self) -> Option<&dyn Payload> {
//!         Some(&self.output)
//!     }
//!
//!     fn path_parameters(&mut self) -> Vec<Parameter<'_>> {
//!         vec![Parameter::new("id", &mut self.id)]
//!     }
//! }
//!
//! # async fn serve(req: http::Request<http_body_util::Full<bytes::Bytes>>) {
//! let runner = Route::from_default::<Echo>("echo")
//!     .path_template("/echo/{id}")
//!     .build()
//!     .unwrap();
//!
//! // Per request, inside your server's service function:
//! let mut rt = HttpRoundTrip::from_request(req, "/echo/{id}", BufferPool::global()).await;
//! runner.run(&Shutdown::never(), &mut rt).await;
//! let response = rt.into_response();
//! # }
//! ```

mod buffer;
mod context;
mod error;
mod handler;
mod param;
mod round_trip;
mod route;
mod runner;

pub mod cache;
pub mod mime;

pub use buffer::{BufferPool, PooledBuffer};
pub use cache::CacheDecision;
pub use context::{Context, Shutdown, ShutdownTrigger};
pub use error::{BoxError, Error, ErrorFormatter, HandlerError, RegistrationError};
pub use handler::{Authorizer, Capabilities, Handler};
pub use mime::{CodecError, MimeRegistry, MimeTypeHandler, Payload};
pub use param::{BindingError, Location, Parameter, SetError, Target, template_lookup, template_names};
pub use round_trip::{HttpRoundTrip, REQUEST_ID_HEADER, RoundTrip};
pub use route::{DEFAULT_TIMEOUT, Route, RouteConfig, RouteSettings};
pub use runner::Runner;

#[doc(hidden)]
pub mod __private {
    pub use bytes::BytesMut;
}
