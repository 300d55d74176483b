//! Handler trait, optional capabilities and type erasure.
//!
//! # Capabilities
//!
//! Every handler implements [`Handler::handle`]. Everything else is an
//! optional capability with a default that opts out:
//!
//! | method               | enables phase                       |
//! |----------------------|-------------------------------------|
//! | `request_body`       | decode the request body into a field |
//! | `response_body`      | encode a field as the response body  |
//! | `path_parameters`    | bind `{name}` path segments          |
//! | `query_parameters`   | bind query string values             |
//! | `authorizer`         | reject the request before `handle`   |
//!
//! The runner probes a freshly built instance once, at route registration,
//! and records the result as a [`Capabilities`] set. Requests then skip the
//! phases a handler never opted into without asking again.
//!
//! # How handlers are stored
//!
//! Routes hold handlers of different types, so the concrete type is erased
//! behind `dyn ErasedHandler`:
//!
//! ```text
//! impl Handler for GetUser { async fn handle(..) }   ← user writes this
//!        ↓ Route::new("get_user", GetUser::default)
//! Box::new(GetUser::default()) as Box<dyn ErasedHandler>   ← per request
//!        ↓
//! handler.handle(cx)  → Pin<Box<dyn Future + Send>>        ← one vtable call
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bitflags::bitflags;
use http::StatusCode;

use crate::context::Context;
use crate::error::{BoxError, HandlerError};
use crate::mime::Payload;
use crate::param::Parameter;
use crate::round_trip::RoundTrip;

/// Business logic for one route.
///
/// A new instance is built by the route factory for every request, so
/// fields can hold per-request state (decoded body, bound parameters,
/// output) without synchronization.
///
/// ```rust
/// use http::StatusCode;
/// use runway::{Context, Handler, HandlerError, Parameter};
///
/// #[derive(Default)]
/// struct GetUser {
///     id: u64,
/// }
///
/// impl Handler for GetUser {
///     async fn handle(&mut self, _cx: &Context) -> Result<StatusCode, HandlerError> {
///         if self.id == 0 {
///             return Err(HandlerError::new(StatusCode::NOT_FOUND, "no such user"));
///         }
///         Ok(StatusCode::OK)
///     }
///
///     fn path_parameters(&mut self) -> Vec<Parameter<'_>> {
///         vec![Parameter::new("id", &mut self.id)]
///     }
/// }
/// ```
pub trait Handler: Send + 'static {
    /// Runs the business logic and returns the success status.
    fn handle(
        &mut self,
        cx: &Context,
    ) -> impl Future<Output = Result<StatusCode, HandlerError>> + Send;

    /// Target the request body is decoded into.
    fn request_body(&mut self) -> Option<&mut dyn Payload> {
        None
    }

    /// Value encoded as the response body after `handle` succeeds.
    fn response_body(&self) -> Option<&dyn Payload> {
        None
    }

    /// Mandatory path parameters. Each name must appear in the route
    /// template.
    fn path_parameters(&mut self) -> Vec<Parameter<'_>> {
        Vec::new()
    }

    /// Optional query parameters. Missing values leave the field untouched.
    fn query_parameters(&mut self) -> Vec<Parameter<'_>> {
        Vec::new()
    }

    fn authorizer(&self) -> Option<&dyn Authorizer> {
        None
    }
}

/// Gatekeeper run after binding and before [`Handler::handle`].
pub trait Authorizer: Send + Sync {
    fn authorize(&self, rt: &dyn RoundTrip) -> Result<(), BoxError>;
}

bitflags! {
    /// Optional phases a handler type takes part in.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const REQUEST_BODY     = 1 << 0;
        const RESPONSE_BODY    = 1 << 1;
        const PATH_PARAMETERS  = 1 << 2;
        const QUERY_PARAMETERS = 1 << 3;
        const AUTHORIZER       = 1 << 4;
    }
}

/// What probing one instance revealed.
#[derive(Debug, Default)]
pub(crate) struct Probe {
    pub(crate) capabilities: Capabilities,
    pub(crate) path_names: Vec<&'static str>,
    pub(crate) query_names: Vec<&'static str>,
}

impl Probe {
    pub(crate) fn of(handler: &mut dyn ErasedHandler) -> Self {
        let mut probe = Probe::default();

        if handler.request_body().is_some() {
            probe.capabilities |= Capabilities::REQUEST_BODY;
        }
        if handler.response_body().is_some() {
            probe.capabilities |= Capabilities::RESPONSE_BODY;
        }
        probe.path_names = handler.path_parameters().iter().map(Parameter::name).collect();
        if !probe.path_names.is_empty() {
            probe.capabilities |= Capabilities::PATH_PARAMETERS;
        }
        probe.query_names = handler.query_parameters().iter().map(Parameter::name).collect();
        if !probe.query_names.is_empty() {
            probe.capabilities |= Capabilities::QUERY_PARAMETERS;
        }
        if handler.authorizer().is_some() {
            probe.capabilities |= Capabilities::AUTHORIZER;
        }
        probe
    }
}

// ── Type erasure ────────────────────────────────────────────────────────────

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe mirror of [`Handler`].
pub(crate) trait ErasedHandler: Send {
    fn handle<'a>(&'a mut self, cx: &'a Context) -> BoxFuture<'a, Result<StatusCode, HandlerError>>;
    fn request_body(&mut self) -> Option<&mut dyn Payload>;
    fn response_body(&self) -> Option<&dyn Payload>;
    fn path_parameters(&mut self) -> Vec<Parameter<'_>>;
    fn query_parameters(&mut self) -> Vec<Parameter<'_>>;
    fn authorizer(&self) -> Option<&dyn Authorizer>;
}

impl<H: Handler> ErasedHandler for H {
    fn handle<'a>(&'a mut self, cx: &'a Context) -> BoxFuture<'a, Result<StatusCode, HandlerError>> {
        Box::pin(Handler::handle(self, cx))
    }

    fn request_body(&mut self) -> Option<&mut dyn Payload> {
        Handler::request_body(self)
    }

    fn response_body(&self) -> Option<&dyn Payload> {
        Handler::response_body(self)
    }

    fn path_parameters(&mut self) -> Vec<Parameter<'_>> {
        Handler::path_parameters(self)
    }

    fn query_parameters(&mut self) -> Vec<Parameter<'_>> {
        Handler::query_parameters(self)
    }

    fn authorizer(&self) -> Option<&dyn Authorizer> {
        Handler::authorizer(self)
    }
}

/// Builds one blank handler instance per request.
pub(crate) type Factory = Arc<dyn Fn() -> Box<dyn ErasedHandler> + Send + Sync>;

pub(crate) fn factory<F, H>(make: F) -> Factory
where
    F: Fn() -> H + Send + Sync + 'static,
    H: Handler,
{
    Arc::new(move || Box::new(make()) as Box<dyn ErasedHandler>)
}
