//! Content negotiation: content type → marshal/unmarshal pair.
//!
//! A [`MimeRegistry`] maps normalized content types to [`MimeTypeHandler`]s.
//! Request bodies are decoded with the handler registered for the request's
//! `Content-Type`; response bodies are encoded with the first registered
//! type in the request's `Accept` list. There is no fallback: an
//! unregistered type is an [`Error::UnsupportedMimeType`](crate::Error).
//!
//! Codecs do not trust the target blindly. A body type opts into each
//! representation explicitly (see [`Payload`] and [`json_payload!`]); a codec
//! asked to handle a target that did not opt in returns
//! [`CodecError::NotSupported`], which lets handlers be chained with
//! [`MimeTypeHandler::or`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::BoxError;

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain";

/// Result type of the JSON hooks on [`Payload`].
pub type JsonResult = serde_json::Result<()>;

// ── Payload ─────────────────────────────────────────────────────────────────

/// Upcast to [`Any`] so custom codecs can downcast a payload to its concrete
/// type. Implemented for every `'static` type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A request or response body type.
///
/// Each representation is opt-in. The default hooks return `None`, which the
/// built-in codecs report as [`CodecError::NotSupported`].
pub trait Payload: AsAny + Send + Sync {
    /// Replaces `self` with the JSON document in `bytes`.
    fn read_json(&mut self, _bytes: &[u8]) -> Option<JsonResult> {
        None
    }

    /// Appends `self` as JSON to `out`.
    fn write_json(&self, _out: &mut BytesMut) -> Option<JsonResult> {
        None
    }
}

impl Payload for String {
    fn read_json(&mut self, bytes: &[u8]) -> Option<JsonResult> {
        Some(decode_json(self, bytes))
    }

    fn write_json(&self, out: &mut BytesMut) -> Option<JsonResult> {
        Some(encode_json(self, out))
    }
}

/// Decodes `bytes` into `target`. Used by [`json_payload!`].
pub fn decode_json<T: DeserializeOwned>(target: &mut T, bytes: &[u8]) -> JsonResult {
    *target = serde_json::from_slice(bytes)?;
    Ok(())
}

/// Appends `value` as JSON to `out`. Used by [`json_payload!`].
pub fn encode_json<T: Serialize + ?Sized>(value: &T, out: &mut BytesMut) -> JsonResult {
    serde_json::to_writer(out.writer(), value)
}

/// Opts one or more serde types into the `application/json` representation.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Deserialize, Serialize)]
/// struct Greeting {
///     message: String,
/// }
///
/// runway::json_payload!(Greeting);
/// ```
#[macro_export]
macro_rules! json_payload {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Payload for $ty {
                fn read_json(&mut self, bytes: &[u8]) -> Option<$crate::mime::JsonResult> {
                    Some($crate::mime::decode_json(self, bytes))
                }

                fn write_json(
                    &self,
                    out: &mut $crate::__private::BytesMut,
                ) -> Option<$crate::mime::JsonResult> {
                    Some($crate::mime::encode_json(self, out))
                }
            }
        )+
    };
}

// ── Codecs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CodecError {
    /// The target did not opt into this representation.
    #[error("payload does not support this representation")]
    NotSupported,

    #[error(transparent)]
    Failed(BoxError),
}

type MarshalFn = dyn Fn(&dyn Payload, &mut BytesMut) -> Result<(), CodecError> + Send + Sync;
type UnmarshalFn = dyn Fn(&[u8], &mut dyn Payload) -> Result<(), CodecError> + Send + Sync;

/// A content type and the functions that encode and decode it.
#[derive(Clone)]
pub struct MimeTypeHandler {
    content_type: String,
    marshal: Arc<MarshalFn>,
    unmarshal: Arc<UnmarshalFn>,
}

impl MimeTypeHandler {
    pub fn new<M, U>(content_type: &str, marshal: M, unmarshal: U) -> Self
    where
        M: Fn(&dyn Payload, &mut BytesMut) -> Result<(), CodecError> + Send + Sync + 'static,
        U: Fn(&[u8], &mut dyn Payload) -> Result<(), CodecError> + Send + Sync + 'static,
    {
        Self {
            content_type: normalize(content_type),
            marshal: Arc::new(marshal),
            unmarshal: Arc::new(unmarshal),
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn marshal(&self, value: &dyn Payload, out: &mut BytesMut) -> Result<(), CodecError> {
        (self.marshal)(value, out)
    }

    pub fn unmarshal(&self, bytes: &[u8], target: &mut dyn Payload) -> Result<(), CodecError> {
        (self.unmarshal)(bytes, target)
    }

    /// Tries `self` first and `fallback` only when `self` reports
    /// [`CodecError::NotSupported`]. The content type of `self` is kept.
    pub fn or(self, fallback: MimeTypeHandler) -> Self {
        let Self { content_type, marshal: first_m, unmarshal: first_u } = self;
        let (next_m, next_u) = (fallback.marshal, fallback.unmarshal);
        Self::new(
            &content_type,
            move |value, out| match first_m(value, out) {
                Err(CodecError::NotSupported) => next_m(value, out),
                other => other,
            },
            move |bytes, target| match first_u(bytes, target) {
                Err(CodecError::NotSupported) => next_u(bytes, target),
                other => other,
            },
        )
    }
}

impl fmt::Debug for MimeTypeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MimeTypeHandler")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// `application/json` through the [`Payload`] JSON hooks.
pub fn json() -> MimeTypeHandler {
    MimeTypeHandler::new(
        APPLICATION_JSON,
        |value, out| match value.write_json(out) {
            Some(result) => result.map_err(|e| CodecError::Failed(e.into())),
            None => Err(CodecError::NotSupported),
        },
        |bytes, target| match target.read_json(bytes) {
            Some(result) => result.map_err(|e| CodecError::Failed(e.into())),
            None => Err(CodecError::NotSupported),
        },
    )
}

/// `text/plain` for payloads that are a bare `String`.
pub fn text() -> MimeTypeHandler {
    MimeTypeHandler::new(
        TEXT_PLAIN,
        |value, out| {
            let text = value.as_any().downcast_ref::<String>().ok_or(CodecError::NotSupported)?;
            out.extend_from_slice(text.as_bytes());
            Ok(())
        },
        |bytes, target| {
            let text = target.as_any_mut().downcast_mut::<String>().ok_or(CodecError::NotSupported)?;
            let decoded = std::str::from_utf8(bytes).map_err(|e| CodecError::Failed(e.into()))?;
            text.clear();
            text.push_str(decoded);
            Ok(())
        },
    )
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Content type → [`MimeTypeHandler`].
///
/// Starts with the JSON handler. [`insert`](MimeRegistry::insert) is
/// additive: a second handler for a registered type is chained in front of
/// the existing one.
#[derive(Clone, Debug)]
pub struct MimeRegistry {
    handlers: HashMap<String, MimeTypeHandler>,
}

impl MimeRegistry {
    /// A registry with no handlers at all.
    pub fn empty() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn insert(&mut self, handler: MimeTypeHandler) {
        let key = handler.content_type.clone();
        let merged = match self.handlers.remove(&key) {
            Some(existing) => handler.or(existing),
            None => handler,
        };
        self.handlers.insert(key, merged);
    }

    /// Handler for a `Content-Type` value. Parameters such as `charset` are
    /// ignored.
    pub fn for_content_type(&self, content_type: &str) -> Option<&MimeTypeHandler> {
        self.handlers.get(&normalize(content_type))
    }

    /// First registered handler in `Accept` list order. `q` weights and
    /// wildcards are not interpreted.
    pub fn for_accept(&self, accept: &str) -> Option<&MimeTypeHandler> {
        accept
            .split(',')
            .find_map(|range| self.handlers.get(&normalize(range)))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for MimeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.insert(json());
        registry
    }
}

/// `"Application/JSON; charset=utf-8"` → `"application/json"`
fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
