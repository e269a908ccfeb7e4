use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use itertools::Itertools;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, ScopeError};
use crate::filter::AroundFilter;
use crate::registry;

/// One scope in the context tree: local bindings plus an immutable link to the
/// scope it was created under.
///
/// Scopes are handed around as `Arc<Scope>`: the active pointers of several
/// threads and any number of captured callables may hold the same node at
/// once. The parent link is fixed at creation, so the tree is acyclic by
/// construction and no cycle detection is ever needed.
pub struct Scope {
    /// Bindings local to this scope only; ancestors are consulted by `get`.
    data: RwLock<HashMap<String, Value>>,
    parent: Option<Arc<Scope>>,
    /// Around-filters in registration order.
    filters: Mutex<Vec<AroundFilter>>,
    /// Per-key lookup memo: the ancestor depth the key resolved at (0 = this
    /// scope), or `None` once a lookup established it is unbound everywhere.
    cache: Mutex<HashMap<String, Option<usize>>>,
}

impl Scope {
    /// An empty scope with no parent. Roots are always writable.
    pub fn root() -> Arc<Self> {
        Self::build(HashMap::new(), None)
    }

    /// A scope holding `data` under `parent`. Passing `None` makes another
    /// root, which is how `clean` hides the current chain.
    pub fn new<K, I>(data: I, parent: Option<Arc<Scope>>) -> Arc<Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let data = data.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::build(data, parent)
    }

    fn build(data: HashMap<String, Value>, parent: Option<Arc<Scope>>) -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(data),
            parent,
            filters: Mutex::new(Vec::new()),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve `key` against this scope and its ancestors, nearest first.
    ///
    /// The first resolution memoizes the depth the key was found at, or that
    /// it was found nowhere; later lookups jump straight to that depth instead
    /// of walking the chain again.
    pub fn get(&self, key: &str) -> Option<Value> {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied();
        if let Some(slot) = cached {
            return slot.and_then(|depth| self.read_at(depth, key));
        }

        let mut node = self;
        let mut depth = 0;
        loop {
            if let Some(value) = node.read_local(key) {
                self.remember(key, Some(depth));
                return Some(value);
            }
            match node.parent.as_deref() {
                Some(parent) => {
                    node = parent;
                    depth += 1;
                }
                None => {
                    self.remember(key, None);
                    return None;
                }
            }
        }
    }

    /// Bind `key` locally.
    ///
    /// Allowed only while this scope is the calling thread's active scope, or
    /// when it has no parent. A local write shadows whatever an earlier lookup
    /// may have resolved in an ancestor, so the cached entry for `key` is
    /// dropped before the write is published.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if self.parent.is_some() && !registry::is_active(self) {
            debug!(key = %key, "rejected write to inactive scope");
            return Err(ScopeError::InvalidMutation { key });
        }
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
        Ok(())
    }

    /// Whether `key` is bound here or in any ancestor.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Every key visible from this scope, nearest scope first; a key bound at
    /// several levels appears once, at the level that shadows the rest. Keys
    /// of one level are sorted so the result is deterministic.
    pub fn keys(&self) -> Vec<String> {
        self.chain()
            .flat_map(|scope| {
                let local = scope.data.read().unwrap_or_else(PoisonError::into_inner);
                let mut keys: Vec<String> = local.keys().cloned().collect();
                keys.sort();
                keys
            })
            .unique()
            .collect()
    }

    /// Every value bound to `key` along the chain, nearest first. Useful when
    /// each level contributes (log prefixes, say) rather than shadows.
    pub fn get_all(&self, key: &str) -> Vec<Value> {
        self.chain()
            .filter_map(|scope| scope.read_local(key))
            .collect()
    }

    /// `[self, parent, …, root]`.
    pub fn ancestors(self: &Arc<Self>) -> Vec<Arc<Scope>> {
        std::iter::successors(Some(Arc::clone(self)), |scope| scope.parent.clone()).collect()
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    /// Method form of [`crate::enter`].
    pub fn enter<R>(self: &Arc<Self>, block: impl FnOnce() -> R) -> Option<R> {
        crate::entry::enter(self, block)
    }

    /// Capture against this specific scope: the returned callable re-enters
    /// `self` on every invocation, from any thread, restoring the invoking
    /// thread's previous scope afterwards. [`crate::preserve`] is
    /// `current().wrap(…)`.
    pub fn wrap<R, F>(self: &Arc<Self>, block: F) -> impl Fn() -> Option<R> + Send + Sync
    where
        F: Fn() -> R + Send + Sync,
    {
        let scope = Arc::clone(self);
        move || crate::entry::enter(&scope, &block)
    }

    /// Borrow-walk from this scope to the root.
    pub(crate) fn chain(&self) -> impl Iterator<Item = &Scope> + '_ {
        std::iter::successors(Some(self), |scope| scope.parent.as_deref())
    }

    pub(crate) fn push_filter(&self, filter: AroundFilter) {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(filter);
    }

    /// Registration-ordered snapshot, so entry composition never holds the
    /// lock while filters run.
    pub(crate) fn filter_snapshot(&self) -> Vec<AroundFilter> {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn read_at(&self, depth: usize, key: &str) -> Option<Value> {
        self.chain().nth(depth).and_then(|scope| scope.read_local(key))
    }

    fn read_local(&self, key: &str) -> Option<Value> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remember(&self, key: &str, slot: Option<usize>) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), slot);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<&String> = local.keys().collect();
        keys.sort();
        f.debug_struct("Scope")
            .field("depth", &(self.chain().count() - 1))
            .field("local", &keys)
            .finish()
    }
}
