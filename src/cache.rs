//! Conditional requests: ETag computation and `If-None-Match` / `If-Match`.
//!
//! The decision depends only on the response status, the response body and
//! three request headers, so the same inputs always yield the same outcome.
//!
//! ```text
//! status ∉ 2xx, empty body, `Cache-Control: no-cache`,
//! or no conditional header                    → passthrough
//! If-None-Match lists the tag (or `*`)        → 304, empty body
//! If-Match lists neither the tag nor `*`      → 412, empty body
//! otherwise                                   → passthrough, ETag set
//! ```

use std::time::Duration;

use http::header::{CACHE_CONTROL, ETAG, IF_MATCH, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::round_trip::RoundTrip;

/// What the conditional-request check decided for one response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheDecision {
    /// Not a cacheable conditional exchange; nothing changes.
    Passthrough,
    /// Conditional headers present but not triggered. ETag is still set.
    Unchanged { etag: String },
    /// `If-None-Match` matched: 304 with an empty body.
    NotModified { etag: String },
    /// `If-Match` did not match: 412 with an empty body.
    PreconditionFailed { etag: String },
}

impl CacheDecision {
    pub fn etag(&self) -> Option<&str> {
        match self {
            Self::Passthrough => None,
            Self::Unchanged { etag }
            | Self::NotModified { etag }
            | Self::PreconditionFailed { etag } => Some(etag),
        }
    }
}

/// `"<byte length>-<hex sha256>"`
pub fn etag(body: &[u8]) -> String {
    format!("{}-{:x}", body.len(), Sha256::digest(body))
}

/// Decides the outcome for a response given the request headers.
pub fn evaluate(status: StatusCode, body: &[u8], request_headers: &HeaderMap) -> CacheDecision {
    if !status.is_success() || body.is_empty() {
        return CacheDecision::Passthrough;
    }
    if header_values(request_headers, CACHE_CONTROL).any(|v| v.contains("no-cache")) {
        return CacheDecision::Passthrough;
    }

    let if_none_match = joined(request_headers, IF_NONE_MATCH);
    let if_match = joined(request_headers, IF_MATCH);
    if if_none_match.is_none() && if_match.is_none() {
        return CacheDecision::Passthrough;
    }

    let etag = etag(body);
    if let Some(list) = if_none_match {
        if lists(&list, &etag) {
            CacheDecision::NotModified { etag }
        } else {
            CacheDecision::Unchanged { etag }
        }
    } else if let Some(list) = if_match {
        if lists(&list, &etag) {
            CacheDecision::Unchanged { etag }
        } else {
            CacheDecision::PreconditionFailed { etag }
        }
    } else {
        CacheDecision::Passthrough
    }
}

/// Evaluates the round trip's current response and rewrites it in place.
pub fn apply(rt: &mut dyn RoundTrip, max_age: Duration) -> CacheDecision {
    let status = rt.status().unwrap_or(StatusCode::OK);
    let decision = evaluate(status, rt.response_body(), rt.request_headers());

    let Some(tag) = decision.etag() else {
        return decision;
    };
    if let Ok(value) = HeaderValue::from_str(tag) {
        rt.set_header(ETAG, value);
    }
    if !max_age.is_zero() {
        let value = HeaderValue::from_str(&format!("max-age={}", max_age_secs(max_age)));
        if let Ok(value) = value {
            rt.set_header(CACHE_CONTROL, value);
        }
    }

    let rewrite = match decision {
        CacheDecision::NotModified { .. } => Some(StatusCode::NOT_MODIFIED),
        CacheDecision::PreconditionFailed { .. } => Some(StatusCode::PRECONDITION_FAILED),
        _ => None,
    };
    if let Some(status) = rewrite {
        debug!(request_id = rt.request_id(), %status, etag = tag, "conditional request short-circuited");
        rt.set_status(status);
        rt.response_body_mut().clear();
    }
    decision
}

/// Whole seconds, rounded up so an enabled cache never advertises zero.
fn max_age_secs(max_age: Duration) -> u64 {
    max_age.as_secs() + u64::from(max_age.subsec_nanos() > 0)
}

fn header_values(headers: &HeaderMap, name: http::HeaderName) -> impl Iterator<Item = &str> {
    headers.get_all(name).into_iter().filter_map(|v| v.to_str().ok())
}

/// All values of a list header joined with commas, or `None` if absent.
fn joined(headers: &HeaderMap, name: http::HeaderName) -> Option<String> {
    let values: Vec<&str> = header_values(headers, name).collect();
    (!values.is_empty()).then(|| values.join(","))
}

fn lists(list: &str, etag: &str) -> bool {
    list.split(',').map(str::trim).any(|t| t == "*" || t == etag)
}
