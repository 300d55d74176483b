//! Path and query parameter binding.
//!
//! A handler declares its parameters as a list of [`Parameter`]s that borrow
//! its own fields. The runner resolves each name against the round trip and
//! parses the string value into the field.
//!
//! Path parameters are mandatory: a declared name that does not resolve is a
//! [`BindingError`]. Query parameters are best-effort: a missing value leaves
//! the field at whatever the factory initialised it to.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::round_trip::RoundTrip;

/// Where a parameter came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Path,
    Query,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Path => "path",
            Self::Query => "query",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("{location} parameter `{name}` is missing")]
    Missing { location: Location, name: &'static str },

    #[error("{location} parameter `{name}`: cannot parse {value:?} as {kind}")]
    Malformed {
        location: Location,
        name: &'static str,
        kind: &'static str,
        value: String,
    },

    #[error("{location} parameter `{name}`: unsupported destination kind `{kind}`")]
    UnsupportedKind {
        location: Location,
        name: &'static str,
        kind: &'static str,
    },
}

/// A typed destination for one parameter value.
pub enum Target<'a> {
    Str(&'a mut String),
    Bool(&'a mut bool),
    I8(&'a mut i8),
    I16(&'a mut i16),
    I32(&'a mut i32),
    I64(&'a mut i64),
    U8(&'a mut u8),
    U16(&'a mut u16),
    U32(&'a mut u32),
    U64(&'a mut u64),
    F32(&'a mut f32),
    F64(&'a mut f64),
    /// A destination the binder cannot parse into. Binding always fails.
    Unsupported(&'static str),
}

/// Why [`Target::set`] rejected a value.
#[derive(Debug, PartialEq, Eq)]
pub enum SetError {
    Malformed,
    Unsupported,
}

impl Target<'_> {
    /// Placeholder for a field of type `T` the binder has no parser for.
    pub fn unsupported<T: ?Sized>() -> Self {
        Target::Unsupported(std::any::type_name::<T>())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Unsupported(kind) => *kind,
        }
    }

    /// Parses `value` into the destination.
    pub fn set(&mut self, value: &str) -> Result<(), SetError> {
        match self {
            Self::Str(dst) => {
                dst.clear();
                dst.push_str(value);
                Ok(())
            }
            Self::Bool(dst) => {
                **dst = parse_bool(value).ok_or(SetError::Malformed)?;
                Ok(())
            }
            Self::I8(dst) => parse_into(&mut **dst, value),
            Self::I16(dst) => parse_into(&mut **dst, value),
            Self::I32(dst) => parse_into(&mut **dst, value),
            Self::I64(dst) => parse_into(&mut **dst, value),
            Self::U8(dst) => parse_into(&mut **dst, value),
            Self::U16(dst) => parse_into(&mut **dst, value),
            Self::U32(dst) => parse_into(&mut **dst, value),
            Self::U64(dst) => parse_into(&mut **dst, value),
            Self::F32(dst) => parse_into(&mut **dst, value),
            Self::F64(dst) => parse_into(&mut **dst, value),
            Self::Unsupported(_) => Err(SetError::Unsupported),
        }
    }
}

fn parse_into<T: FromStr>(dst: &mut T, value: &str) -> Result<(), SetError> {
    *dst = value.parse().map_err(|_| SetError::Malformed)?;
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

macro_rules! target_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl<'a> From<&'a mut $ty> for Target<'a> {
                fn from(dst: &'a mut $ty) -> Self {
                    Target::$variant(dst)
                }
            }
        )*
    };
}

target_from! {
    String => Str,
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// A named parameter bound into a handler field.
///
/// ```rust
/// use runway::Parameter;
///
/// let mut id = 0u64;
/// let mut verbose = false;
/// let params = vec![Parameter::new("id", &mut id), Parameter::new("verbose", &mut verbose)];
/// assert_eq!(params[0].name(), "id");
/// ```
pub struct Parameter<'a> {
    name: &'static str,
    target: Target<'a>,
}

impl<'a> Parameter<'a> {
    pub fn new(name: &'static str, target: impl Into<Target<'a>>) -> Self {
        Self { name, target: target.into() }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> &'static str {
        self.target.kind()
    }

    fn bind(&mut self, location: Location, value: &str) -> Result<(), BindingError> {
        self.target.set(value).map_err(|e| match e {
            SetError::Malformed => BindingError::Malformed {
                location,
                name: self.name,
                kind: self.target.kind(),
                value: value.to_owned(),
            },
            SetError::Unsupported => BindingError::UnsupportedKind {
                location,
                name: self.name,
                kind: self.target.kind(),
            },
        })
    }
}

impl fmt::Debug for Parameter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Binds every declared path parameter. Any unresolved name fails.
pub(crate) fn bind_path(
    rt: &dyn RoundTrip,
    params: &mut [Parameter<'_>],
) -> Result<(), BindingError> {
    for param in params {
        let value = rt
            .path_param(param.name)
            .ok_or(BindingError::Missing { location: Location::Path, name: param.name })?;
        param.bind(Location::Path, value)?;
    }
    Ok(())
}

/// Binds declared query parameters that are present. Missing ones are skipped.
pub(crate) fn bind_query(
    rt: &dyn RoundTrip,
    params: &mut [Parameter<'_>],
) -> Result<(), BindingError> {
    for param in params {
        if let Some(value) = rt.query_param(param.name) {
            param.bind(Location::Query, &value)?;
        }
    }
    Ok(())
}

// ── Template matching ───────────────────────────────────────────────────────

/// Resolves `name` by positional segment match between a route template such
/// as `/users/{id}/posts/{post}` and the actual request path.
///
/// The segment index of `{name}` in the template selects the segment at the
/// same index in the path.
pub fn template_lookup<'p>(template: &str, path: &'p str, name: &str) -> Option<&'p str> {
    let index = segments(template).position(|seg| placeholder(seg) == Some(name))?;
    segments(path).nth(index).filter(|seg| !seg.is_empty())
}

/// Placeholder names declared in a template, in order.
pub fn template_names(template: &str) -> impl Iterator<Item = &str> {
    segments(template).filter_map(placeholder)
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}

fn placeholder(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

/// Last value of `name` in a raw query string, percent-decoded.
pub(crate) fn query_lookup<'q>(query: &'q str, name: &str) -> Option<Cow<'q, str>> {
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value)
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_every_primitive_kind() {
        let mut s = String::from("old");
        let mut b = false;
        let mut i8_ = 0i8;
        let mut i64_ = 0i64;
        let mut u16_ = 0u16;
        let mut u64_ = 0u64;
        let mut f32_ = 0f32;
        let mut f64_ = 0f64;

        Target::from(&mut s).set("new").unwrap();
        Target::from(&mut b).set("T").unwrap();
        Target::from(&mut i8_).set("-12").unwrap();
        Target::from(&mut i64_).set("9000000000").unwrap();
        Target::from(&mut u16_).set("65535").unwrap();
        Target::from(&mut u64_).set("18446744073709551615").unwrap();
        Target::from(&mut f32_).set("1.5").unwrap();
        Target::from(&mut f64_).set("-0.25").unwrap();

        assert_eq!(s, "new");
        assert!(b);
        assert_eq!(i8_, -12);
        assert_eq!(i64_, 9_000_000_000);
        assert_eq!(u16_, u16::MAX);
        assert_eq!(u64_, u64::MAX);
        assert_eq!(f32_, 1.5);
        assert_eq!(f64_, -0.25);
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        let mut small = 0u8;
        assert_eq!(Target::from(&mut small).set("256"), Err(SetError::Malformed));
        assert_eq!(Target::from(&mut small).set("-1"), Err(SetError::Malformed));
        let mut flag = false;
        assert_eq!(Target::from(&mut flag).set("yes"), Err(SetError::Malformed));
    }

    #[test]
    fn bool_spellings() {
        for v in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("tRuE"), None);
    }

    #[test]
    fn unsupported_kind_is_named() {
        let mut param = Parameter::new("tags", Target::unsupported::<Vec<String>>());
        let err = param.bind(Location::Query, "a,b").unwrap_err();
        match err {
            BindingError::UnsupportedKind { kind, name, .. } => {
                assert_eq!(name, "tags");
                assert!(kind.contains("Vec"), "{kind}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn template_positional_match() {
        let t = "/users/{user}/posts/{post}";
        assert_eq!(template_lookup(t, "/users/42/posts/7", "user"), Some("42"));
        assert_eq!(template_lookup(t, "/users/42/posts/7", "post"), Some("7"));
        assert_eq!(template_lookup(t, "/users/42", "post"), None);
        assert_eq!(template_lookup(t, "/users/42/posts/", "post"), None);
        assert_eq!(template_lookup(t, "/users/42/posts/7", "missing"), None);
    }

    #[test]
    fn template_names_in_order() {
        let names: Vec<_> = template_names("/a/{x}/b/{y}").collect();
        assert_eq!(names, ["x", "y"]);
    }

    #[test]
    fn query_decodes_and_last_wins() {
        let q = "name=hello%20world&n=1&n=2&plus=a+b";
        assert_eq!(query_lookup(q, "name").as_deref(), Some("hello world"));
        assert_eq!(query_lookup(q, "n").as_deref(), Some("2"));
        assert_eq!(query_lookup(q, "plus").as_deref(), Some("a b"));
        assert_eq!(query_lookup(q, "absent"), None);
    }
}
