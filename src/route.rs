//! Route registration.
//!
//! [`Route`] is a builder. [`Route::build`] probes the handler once, checks
//! the declaration, and freezes everything into an immutable
//! [`RouteConfig`] behind the returned [`Runner`].
//!
//! ```rust
//! use std::time::Duration;
//!
//! use http::StatusCode;
//! use runway::{Context, Handler, HandlerError, Route};
//!
//! #[derive(Default)]
//! struct Ping;
//!
//! impl Handler for Ping {
//!     async fn handle(&mut self, _cx: &Context) -> Result<StatusCode, HandlerError> {
//!         Ok(StatusCode::NO_CONTENT)
//!     }
//! }
//!
//! let runner = Route::from_default::<Ping>("ping")
//!     .timeout(Duration::from_secs(5))
//!     .cache_max_age(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//! assert_eq!(runner.config().timeout(), Duration::from_secs(5));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ErrorFormatter, RegistrationError};
use crate::handler::{Capabilities, Factory, Handler, Probe, factory};
use crate::mime::{MimeRegistry, MimeTypeHandler};
use crate::param::template_names;
use crate::runner::Runner;

/// Timeout applied when a route never sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Externally loaded per-route settings.
///
/// The crate does not read files or environment variables; callers
/// deserialize this from whatever source they use and pass it to
/// [`Route::configure`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RouteSettings {
    pub timeout_ms: Option<u64>,
    pub cache_max_age_secs: Option<u64>,
}

/// Immutable, execution-ready configuration for one route.
pub struct RouteConfig {
    pub(crate) action: Arc<str>,
    pub(crate) timeout: Duration,
    pub(crate) factory: Factory,
    pub(crate) capabilities: Capabilities,
    pub(crate) mime_types: MimeRegistry,
    pub(crate) error_formatter: ErrorFormatter,
    pub(crate) cache_max_age: Duration,
    pub(crate) path_template: Option<String>,
}

impl RouteConfig {
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn mime_types(&self) -> &MimeRegistry {
        &self.mime_types
    }

    pub fn error_formatter(&self) -> &ErrorFormatter {
        &self.error_formatter
    }

    /// Zero means conditional caching is off.
    pub fn cache_max_age(&self) -> Duration {
        self.cache_max_age
    }

    pub fn path_template(&self) -> Option<&str> {
        self.path_template.as_deref()
    }
}

impl fmt::Debug for RouteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteConfig")
            .field("action", &self.action)
            .field("timeout", &self.timeout)
            .field("capabilities", &self.capabilities)
            .field("mime_types", &self.mime_types)
            .field("cache_max_age", &self.cache_max_age)
            .field("path_template", &self.path_template)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Runner`].
pub struct Route {
    action: String,
    factory: Factory,
    timeout: Option<Duration>,
    mime_types: MimeRegistry,
    error_formatter: ErrorFormatter,
    cache_max_age: Duration,
    path_template: Option<String>,
}

impl Route {
    /// Registers `make` as the per-request instance factory.
    pub fn new<F, H>(action: impl Into<String>, make: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: Handler,
    {
        Self {
            action: action.into(),
            factory: factory(make),
            timeout: None,
            mime_types: MimeRegistry::default(),
            error_formatter: ErrorFormatter::default(),
            cache_max_age: Duration::ZERO,
            path_template: None,
        }
    }

    pub fn from_default<H: Handler + Default>(action: impl Into<String>) -> Self {
        Self::new(action, H::default)
    }

    /// Per-request deadline. The first call wins; later calls are ignored.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        match self.timeout {
            Some(current) => {
                debug!(action = %self.action, ?current, ignored = ?timeout, "route timeout already set");
            }
            None => self.timeout = Some(timeout),
        }
        self
    }

    /// Adds a content type handler. See [`MimeRegistry::insert`].
    pub fn mime_type(mut self, handler: MimeTypeHandler) -> Self {
        self.mime_types.insert(handler);
        self
    }

    pub fn mime_types(self, handlers: impl IntoIterator<Item = MimeTypeHandler>) -> Self {
        handlers.into_iter().fold(self, Route::mime_type)
    }

    /// Enables ETag handling with this `max-age`. Zero disables it.
    pub fn cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = max_age;
        self
    }

    /// Replaces the error formatter.
    pub fn error_formatter(mut self, formatter: ErrorFormatter) -> Self {
        self.error_formatter = formatter;
        self
    }

    /// Route template such as `/users/{id}`. When set, [`build`](Route::build)
    /// rejects path parameters the template does not declare.
    pub fn path_template(mut self, template: impl Into<String>) -> Self {
        self.path_template = Some(template.into());
        self
    }

    /// Applies externally loaded settings with the same rules as the
    /// individual builder methods.
    pub fn configure(self, settings: &RouteSettings) -> Self {
        let mut route = self;
        if let Some(ms) = settings.timeout_ms {
            route = route.timeout(Duration::from_millis(ms));
        }
        if let Some(secs) = settings.cache_max_age_secs {
            route = route.cache_max_age(Duration::from_secs(secs));
        }
        route
    }

    pub fn build(self) -> Result<Runner, RegistrationError> {
        if self.action.trim().is_empty() {
            return Err(RegistrationError::EmptyAction);
        }

        let mut probe_instance = (self.factory)();
        let probe = Probe::of(probe_instance.as_mut());
        drop(probe_instance);

        unique(&probe.path_names)?;
        unique(&probe.query_names)?;
        if let Some(template) = &self.path_template {
            let declared: HashSet<&str> = template_names(template).collect();
            if let Some(name) = probe.path_names.iter().find(|n| !declared.contains(*n)) {
                return Err(RegistrationError::UnknownPathParameter {
                    name: (*name).to_owned(),
                    template: template.clone(),
                });
            }
        }

        let config = RouteConfig {
            action: Arc::from(self.action),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            factory: self.factory,
            capabilities: probe.capabilities,
            mime_types: self.mime_types,
            error_formatter: self.error_formatter,
            cache_max_age: self.cache_max_age,
            path_template: self.path_template,
        };
        debug!(action = %config.action, capabilities = ?config.capabilities, "route registered");
        Ok(Runner::new(config))
    }
}

fn unique(names: &[&'static str]) -> Result<(), RegistrationError> {
    let mut seen = HashSet::new();
    match names.iter().find(|name| !seen.insert(**name)) {
        Some(name) => Err(RegistrationError::DuplicateParameter((*name).to_owned())),
        None => Ok(()),
    }
}
