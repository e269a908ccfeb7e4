use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::filter::{compose_and_run, AroundFilter};
use crate::registry;
use crate::scope::Scope;

// Restores the thread's previous active scope on drop, so the swap in `enter`
// is undone exactly once on every exit path, panic unwinds included.
struct RestoreOnExit {
    previous: Option<Arc<Scope>>,
}

impl Drop for RestoreOnExit {
    fn drop(&mut self) {
        registry::restore(self.previous.take());
    }
}

/// Enter `scope` for the duration of `block`.
///
/// Around-filters of scopes newly crossed on the way in run around the block,
/// rootmost outermost. Re-entering the already-active scope, or a descendant
/// of it, runs only the filters below the previous scope, so no filter fires
/// a second time for one logical activation. Entering an unrelated scope (a
/// capture replayed on another thread, say) runs the full root-to-scope chain.
///
/// Returns `Some` with the block's result, or `None` when a filter dropped its
/// thunk instead of running it. Panics propagate to the caller after the
/// previous scope has been restored.
pub fn enter<R>(scope: &Arc<Scope>, block: impl FnOnce() -> R) -> Option<R> {
    let previous = registry::peek();
    let filters = newly_crossed(scope, previous.as_deref());
    trace!(filters = filters.len(), "entering scope");

    registry::set_current(Arc::clone(scope));
    let _restore = RestoreOnExit { previous };

    let mut result = None;
    compose_and_run(filters, Box::new(|| result = Some(block())));
    result
}

// Filters attached strictly between `scope` and the previously active scope,
// ordered outermost (rootmost) first. Walking leaf-first and stopping at
// `previous` covers the unrelated-scope case too: `previous` never shows up,
// so the whole chain contributes.
fn newly_crossed(scope: &Arc<Scope>, previous: Option<&Scope>) -> Vec<AroundFilter> {
    let crossed: Vec<&Scope> = scope
        .chain()
        .take_while(|node| previous.map_or(true, |prev| !std::ptr::eq(*node, prev)))
        .collect();

    let mut filters = Vec::new();
    for node in crossed.into_iter().rev() {
        filters.extend(node.filter_snapshot());
    }
    filters
}

/// Run `block` in a fresh child of the current scope holding the bindings in
/// `delta`; everything unspecified is inherited.
pub fn update<R, K, I>(delta: I, block: impl FnOnce() -> R) -> Option<R>
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    let child = Scope::new(delta, Some(registry::current()));
    enter(&child, block)
}

/// Run `block` in a fresh root: nothing from the current chain is visible and
/// no ancestor filters run.
pub fn clean<R>(block: impl FnOnce() -> R) -> Option<R> {
    let scope = Scope::new(std::iter::empty::<(String, Value)>(), None);
    enter(&scope, block)
}

/// Swap the calling thread's active scope, in place, for a fresh empty child
/// of itself.
///
/// No filters run and no restore point is created; the enclosing [`enter`]
/// still restores its own previous scope on exit. The child is active the
/// moment this returns, so immediate writes satisfy the mutation rule and land
/// on the child, never on the scope that was entered: copy-on-write isolation
/// without re-triggering setup/teardown.
pub fn fork() -> Arc<Scope> {
    let child = Scope::new(std::iter::empty::<(String, Value)>(), Some(registry::current()));
    trace!("forked active scope");
    registry::set_current(Arc::clone(&child));
    child
}

/// Capture the current scope into a callable that replays `block` inside it.
///
/// The callable may be invoked later, from any thread, any number of times
/// (zero included); each invocation swaps only the invoking thread's active
/// slot and restores it afterwards, so one shared callable is safe to call
/// concurrently. Writes performed during a replay land on the captured scope
/// exactly as they would in an ordinary entry.
pub fn preserve<R, F>(block: F) -> impl Fn() -> Option<R> + Send + Sync
where
    F: Fn() -> R + Send + Sync,
{
    let captured = registry::current();
    move || enter(&captured, &block)
}
