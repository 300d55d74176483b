//! The dispatch pipeline.
//!
//! [`Runner::run`] executes one request against one [`RoundTrip`]:
//!
//! ```text
//! checkpoint ─ new instance ─ [body] ─ [path/query] ─ [authorize]
//!     ─ checkpoint ─ handle ─ checkpoint ─ [response body] ─ status
//!     ─ [conditional cache] ─ write response ─ release
//! ```
//!
//! Bracketed phases only run when the handler has the matching capability.
//! Any phase may fail; the failure is formatted by the route's
//! [`ErrorFormatter`](crate::ErrorFormatter) and the response is still
//! written. A panic anywhere in the pipeline is caught at a single
//! boundary and treated the same way.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::BufMut;
use futures_util::FutureExt;
use http::{HeaderValue, StatusCode};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::cache;
use crate::context::{Context, Shutdown};
use crate::error::{Error, panic_message};
use crate::handler::{Capabilities, ErasedHandler};
use crate::mime::CodecError;
use crate::param::{bind_path, bind_query};
use crate::round_trip::RoundTrip;
use crate::route::RouteConfig;

/// Executes requests for one route. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Runner {
    config: Arc<RouteConfig>,
}

impl Runner {
    pub(crate) fn new(config: RouteConfig) -> Self {
        Self { config: Arc::new(config) }
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    /// Runs one request to completion.
    ///
    /// Never fails and never panics: every outcome ends with a status, a
    /// body, one call to [`RoundTrip::write_response`] and one call to
    /// [`RoundTrip::release`].
    pub async fn run(&self, shutdown: &Shutdown, rt: &mut dyn RoundTrip) {
        let span = info_span!(
            "request",
            request_id = rt.request_id(),
            method = %rt.method(),
            route = rt.matched_path(),
            path = rt.path(),
            action = %self.config.action,
        );

        async {
            let outcome = AssertUnwindSafe(self.execute(shutdown, &mut *rt))
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(panic = %message, "handler panicked");
                    Some(Error::Panic(message))
                }
            };
            if let Some(err) = failure {
                let formatted = panic::catch_unwind(AssertUnwindSafe(|| self.fail(&mut *rt, &err)));
                if let Err(payload) = formatted {
                    error!(panic = %panic_message(payload.as_ref()), "error formatter panicked");
                    fail_plain(&mut *rt, StatusCode::INTERNAL_SERVER_ERROR);
                }
            }

            if let Err(err) = rt.write_response() {
                error!(error = %err, "failed to write response");
            }
            rt.release();
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, shutdown: &Shutdown, rt: &mut dyn RoundTrip) -> Result<(), Error> {
        let config = &*self.config;
        let caps = config.capabilities;

        let cx = Context::new(rt.request_id(), Arc::clone(&config.action), config.timeout, shutdown);
        cx.check()?;

        let mut handler = (config.factory)();

        if caps.contains(Capabilities::REQUEST_BODY) {
            self.read_body(handler.as_mut(), rt)?;
        }
        if caps.contains(Capabilities::PATH_PARAMETERS) {
            bind_path(rt, &mut handler.path_parameters())?;
        }
        if caps.contains(Capabilities::QUERY_PARAMETERS) {
            bind_query(rt, &mut handler.query_parameters())?;
        }
        if caps.contains(Capabilities::AUTHORIZER) {
            if let Some(authorizer) = handler.authorizer() {
                authorizer.authorize(rt).map_err(Error::Unauthorized)?;
            }
        }

        cx.check()?;
        let status = handler.handle(&cx).await?;
        debug!(%status, "handler returned");
        cx.check()?;

        if caps.contains(Capabilities::RESPONSE_BODY) {
            self.write_body(handler.as_ref(), rt)?;
        }
        rt.set_status(status);

        if !config.cache_max_age.is_zero() {
            let decision = cache::apply(rt, config.cache_max_age);
            debug!(?decision, "conditional cache evaluated");
        }
        Ok(())
    }

    fn read_body(&self, handler: &mut dyn ErasedHandler, rt: &dyn RoundTrip) -> Result<(), Error> {
        let body = rt.request_body()?;
        let content_type = rt.content_type().unwrap_or_default();
        let codec = self
            .config
            .mime_types
            .for_content_type(content_type)
            .ok_or_else(|| Error::UnsupportedMimeType(content_type.to_owned()))?;

        if body.is_empty() {
            return Ok(());
        }
        let Some(target) = handler.request_body() else {
            return Ok(());
        };

        codec.unmarshal(body, target).map_err(|e| match e {
            CodecError::NotSupported => Error::UnsupportedMimeType(codec.content_type().to_owned()),
            CodecError::Failed(source) => Error::Unmarshal {
                content_type: codec.content_type().to_owned(),
                source,
            },
        })
    }

    fn write_body(&self, handler: &dyn ErasedHandler, rt: &mut dyn RoundTrip) -> Result<(), Error> {
        let Some(value) = handler.response_body() else {
            return Ok(());
        };

        let accept = rt.accept().unwrap_or_default();
        let codec = self
            .config
            .mime_types
            .for_accept(accept)
            .ok_or_else(|| Error::UnsupportedMimeType(accept.to_owned()))?;

        let out = rt.response_body_mut();
        out.clear();
        codec.marshal(value, out).map_err(|e| match e {
            CodecError::NotSupported => Error::UnsupportedMimeType(codec.content_type().to_owned()),
            CodecError::Failed(source) => Error::Marshal {
                content_type: codec.content_type().to_owned(),
                source,
            },
        })?;

        if let Ok(value) = HeaderValue::from_str(codec.content_type()) {
            rt.set_response_content_type(value);
        }
        Ok(())
    }

    /// Replaces whatever was built so far with the formatted failure.
    fn fail(&self, rt: &mut dyn RoundTrip, err: &Error) {
        let mut status = err.status();
        if status.is_server_error() {
            error!(%status, error = %err, "request failed");
        } else {
            warn!(%status, error = %err, "request rejected");
        }

        let formatter = &self.config.error_formatter;
        let body = rt.response_body_mut();
        body.clear();
        formatter.format(&mut status, body, err);
        if body.is_empty() {
            warn!(%status, "error formatter produced an empty body");
            body.put_slice(fallback_body(status).as_bytes());
        }

        rt.set_status(status);
        rt.set_response_content_type(formatter.content_type().clone());
    }
}

fn fallback_body(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("error").to_owned()
}

/// Last resort when the formatter itself panicked.
fn fail_plain(rt: &mut dyn RoundTrip, status: StatusCode) {
    let body = rt.response_body_mut();
    body.clear();
    body.put_slice(fallback_body(status).as_bytes());
    rt.set_status(status);
    rt.set_response_content_type(HeaderValue::from_static("text/plain"));
}
