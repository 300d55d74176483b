//! Failure taxonomy, status mapping and the pluggable error formatter.
//!
//! Every phase of the pipeline returns `Result<_, Error>`. The runner turns
//! the error into a status code with [`Error::status`] and hands both to the
//! route's [`ErrorFormatter`], which writes the client-visible body.

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::param::BindingError;

/// Boxed error returned by handlers, authorizers and codecs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every way a single dispatch can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport could not deliver the request body.
    #[error("failed to read request body: {0}")]
    Transport(#[source] BoxError),

    /// The per-route deadline passed at a checkpoint.
    #[error("request deadline exceeded")]
    Timeout,

    /// Upstream shutdown was signalled before the request finished.
    #[error("request cancelled")]
    Cancelled,

    #[error("unauthorized: {0}")]
    Unauthorized(#[source] BoxError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    /// No codec is registered for the content type, or the target does not
    /// opt into that representation.
    #[error("unsupported mime type `{0}`")]
    UnsupportedMimeType(String),

    #[error("failed to marshal `{content_type}` response: {source}")]
    Marshal {
        content_type: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to unmarshal `{content_type}` request: {source}")]
    Unmarshal {
        content_type: String,
        #[source]
        source: BoxError,
    },

    /// The handler rejected the request with a status of its choosing.
    #[error("{source}")]
    Business {
        status: StatusCode,
        #[source]
        source: BoxError,
    },

    /// A panic was caught at the recovery boundary. The payload is logged,
    /// not carried here.
    #[error("internal error")]
    Panic(String),
}

impl Error {
    /// Status code sent to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Transport(_) => StatusCode::BAD_REQUEST,
            Self::Timeout | Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Business { status, .. } => *status,
            Self::Binding(_)
            | Self::UnsupportedMimeType(_)
            | Self::Marshal { .. }
            | Self::Unmarshal { .. }
            | Self::Panic(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failure returned from [`Handler::handle`](crate::Handler::handle).
///
/// Carries the status the handler wants the client to see.
#[derive(Debug)]
pub struct HandlerError {
    pub(crate) status: StatusCode,
    pub(crate) source: BoxError,
}

impl HandlerError {
    pub fn new(status: StatusCode, source: impl Into<BoxError>) -> Self {
        Self { status, source: source.into() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.source)
    }
}

impl From<HandlerError> for Error {
    fn from(e: HandlerError) -> Self {
        Self::Business { status: e.status, source: e.source }
    }
}

/// Errors detected while building a route, before any request runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("route action name must not be empty")]
    EmptyAction,

    #[error("path parameter `{name}` is not part of route template `{template}`")]
    UnknownPathParameter { name: String, template: String },

    #[error("parameter `{0}` is declared more than once")]
    DuplicateParameter(String),
}

// ── Error formatter ─────────────────────────────────────────────────────────

type FormatFn = dyn Fn(&mut StatusCode, &mut BytesMut, &Error) + Send + Sync;

/// Writes the client-visible body for a failed request.
///
/// The function receives the mapped status and an empty body buffer and may
/// rewrite both. It must leave the body non-empty; the runner substitutes a
/// fallback and logs a warning if it does not.
#[derive(Clone)]
pub struct ErrorFormatter {
    content_type: HeaderValue,
    format: Arc<FormatFn>,
}

impl ErrorFormatter {
    pub fn new<F>(content_type: &'static str, format: F) -> Self
    where
        F: Fn(&mut StatusCode, &mut BytesMut, &Error) + Send + Sync + 'static,
    {
        Self {
            content_type: HeaderValue::from_static(content_type),
            format: Arc::new(format),
        }
    }

    /// `{"status":408,"error":"request deadline exceeded"}`
    pub fn json() -> Self {
        Self::new("application/json", |status, body, err| {
            #[derive(Serialize)]
            struct ErrorBody<'a> {
                status: u16,
                error: &'a str,
            }

            let message = err.to_string();
            let payload = ErrorBody { status: status.as_u16(), error: &message };
            if serde_json::to_writer((&mut *body).writer(), &payload).is_err() {
                body.clear();
            }
        })
    }

    pub fn content_type(&self) -> &HeaderValue {
        &self.content_type
    }

    pub(crate) fn format(&self, status: &mut StatusCode, body: &mut BytesMut, err: &Error) {
        (self.format)(status, body, err)
    }
}

impl Default for ErrorFormatter {
    fn default() -> Self {
        Self::json()
    }
}

impl fmt::Debug for ErrorFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorFormatter")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Renders a caught panic payload for the log line.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::Timeout.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(Error::Cancelled.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(Error::Unauthorized("nope".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::UnsupportedMimeType("text/csv".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::Panic("boom".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(Error::Transport("reset".into()).status(), StatusCode::BAD_REQUEST);
        let business: Error = HandlerError::new(StatusCode::CONFLICT, "taken").into();
        assert_eq!(business.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn json_formatter_writes_status_and_message() {
        let mut status = StatusCode::REQUEST_TIMEOUT;
        let mut body = BytesMut::new();
        ErrorFormatter::json().format(&mut status, &mut body, &Error::Timeout);

        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(&body[..], br#"{"status":408,"error":"request deadline exceeded"}"#);
    }

    #[test]
    fn panic_display_hides_payload() {
        let err = Error::Panic("secret stack detail".into());
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn panic_message_downcasts_common_payloads() {
        let s: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(s.as_ref()), "unknown panic");
    }
}
