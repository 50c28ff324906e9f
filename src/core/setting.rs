//! Static-or-dynamic configuration values.
//!
//! Group and transition settings such as priority or debounce may be fixed
//! literals or functions of the transition context. A dynamic value can only
//! be materialized when a context is available; without one it reads as unset.

use super::context::Context;
use std::fmt;
use std::sync::Arc;

/// A configuration value that is either a literal or computed from context.
///
/// # Example
///
/// ```rust
/// use statecraft::core::Setting;
/// use serde_json::json;
///
/// let fixed: Setting<u64> = Setting::Static(100);
/// let scaled = Setting::dynamic(|ctx| ctx["load"].as_u64().unwrap_or(0) * 10);
///
/// assert_eq!(fixed.resolve(None), Some(100));
/// assert_eq!(scaled.resolve(None), None);
/// assert_eq!(scaled.resolve(Some(&json!({ "load": 3 }))), Some(30));
/// ```
pub enum Setting<T> {
    Static(T),
    Dynamic(Arc<dyn Fn(&Context) -> T + Send + Sync>),
}

impl<T: Clone> Setting<T> {
    /// Wrap a context function as a dynamic setting.
    ///
    /// # Deadlocks
    ///
    /// The function runs while the owning machine's lock is held. It must
    /// only read the context it is given: calling back into the machine
    /// (`machine.context()`, `group.is_enabled(..)`, ...) blocks forever.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&Context) -> T + Send + Sync + 'static,
    {
        Setting::Dynamic(Arc::new(f))
    }

    /// Materialize the value.
    ///
    /// Static values always resolve. Dynamic values resolve only when a
    /// context is supplied.
    pub fn resolve(&self, context: Option<&Context>) -> Option<T> {
        match (self, context) {
            (Setting::Static(value), _) => Some(value.clone()),
            (Setting::Dynamic(f), Some(ctx)) => Some(f(ctx)),
            (Setting::Dynamic(_), None) => None,
        }
    }

    /// The literal value, if this setting is static.
    pub fn as_static(&self) -> Option<&T> {
        match self {
            Setting::Static(value) => Some(value),
            Setting::Dynamic(_) => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Setting::Dynamic(_))
    }
}

impl<T: Clone> Clone for Setting<T> {
    fn clone(&self) -> Self {
        match self {
            Setting::Static(value) => Setting::Static(value.clone()),
            Setting::Dynamic(f) => Setting::Dynamic(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Setting<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Setting::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

impl<T> From<T> for Setting<T> {
    fn from(value: T) -> Self {
        Setting::Static(value)
    }
}
