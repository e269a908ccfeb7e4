//! Implicit, hierarchically-scoped key-value state that follows the logical
//! flow of a program instead of its call signatures.
//!
//! Bindings made with [`update`] are visible to everything in the block's
//! dynamic extent: arbitrarily deep calls, and any closure wrapped with
//! [`preserve`] that runs later on another thread. Typical uses are request
//! and job correlation ids, logging prefixes, and per-call configuration
//! overrides.
//!
//! ```
//! use serde_json::json;
//!
//! taskspace::update([("request_id", json!("r-42"))], || {
//!     // Any code in this dynamic extent sees the binding, however deep.
//!     assert_eq!(taskspace::read("request_id"), Some(json!("r-42")));
//!
//!     // Closures headed for another thread carry their scope with them.
//!     let callback = taskspace::preserve(|| taskspace::read("request_id"));
//!     std::thread::spawn(move || {
//!         assert_eq!(callback(), Some(Some(json!("r-42"))));
//!     })
//!     .join()
//!     .unwrap();
//! });
//! ```
//!
//! # Integrating a concurrency substrate
//!
//! The core knows nothing about timers, sockets, or actor mailboxes. An
//! adapter for such a substrate captures a scope where a logical unit of work
//! is created (a connection accepted, an actor spawned) and wraps every later
//! callback of that unit with [`preserve`], or holds the `Arc<Scope>` and
//! calls [`enter`] around each dispatch. Nothing else is required; scopes are
//! plain shared values.

pub mod errors;
pub mod filter;
pub mod scope;
mod entry;
mod registry;

use std::sync::Arc;

use serde_json::Value;

pub use entry::{clean, enter, fork, preserve, update};
pub use errors::{Result, ScopeError};
pub use filter::{AroundFilter, Thunk};
pub use scope::Scope;

/// Read `key` from the calling thread's active scope, ancestors included.
pub fn read(key: &str) -> Option<Value> {
    registry::current().get(key)
}

/// Bind `key` on the calling thread's active scope.
///
/// Fails with [`ScopeError::InvalidMutation`] when the active scope rule does
/// not hold; see [`Scope::set`].
pub fn write(key: impl Into<String>, value: Value) -> errors::Result<()> {
    registry::current().set(key, value)
}

/// The calling thread's active scope, lazily rooted on first access.
pub fn current() -> Arc<Scope> {
    registry::current()
}

/// Attach an around-filter to `scope`. It runs the next time the scope is
/// newly crossed by [`enter`]; first-registered filters wrap later ones.
pub fn register_filter<F>(scope: &Arc<Scope>, filter: F)
where
    F: for<'a> Fn(Thunk<'a>) + Send + Sync + 'static,
{
    scope.push_filter(Arc::new(filter));
}

/// Attach an around-filter to the calling thread's current scope.
pub fn around_filter<F>(filter: F)
where
    F: for<'a> Fn(Thunk<'a>) + Send + Sync + 'static,
{
    register_filter(&registry::current(), filter);
}
