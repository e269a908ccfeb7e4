use std::cell::RefCell;
use std::sync::Arc;

use crate::scope::Scope;

thread_local! {
    // Active scope for this thread. `None` until first use; entry guards may
    // also put `None` back when the thread had never touched the registry.
    static ACTIVE: RefCell<Option<Arc<Scope>>> = const { RefCell::new(None) };
}

/// The calling thread's active scope, creating a fresh root on first access.
/// Each thread owns its slot outright, so switching it is never observable
/// from another thread and needs no lock.
pub fn current() -> Arc<Scope> {
    ACTIVE.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.as_ref() {
            Some(scope) => Arc::clone(scope),
            None => {
                let root = Scope::root();
                *slot = Some(Arc::clone(&root));
                root
            }
        }
    })
}

/// Like [`current`], but without materializing a root on an untouched thread.
pub(crate) fn peek() -> Option<Arc<Scope>> {
    ACTIVE.with(|slot| slot.borrow().clone())
}

pub(crate) fn set_current(scope: Arc<Scope>) {
    ACTIVE.with(|slot| *slot.borrow_mut() = Some(scope));
}

/// Put back whatever [`peek`] returned before a swap, `None` included.
pub(crate) fn restore(previous: Option<Arc<Scope>>) {
    ACTIVE.with(|slot| *slot.borrow_mut() = previous);
}

/// Pointer-identity check against the slot; never initializes it.
pub(crate) fn is_active(scope: &Scope) -> bool {
    ACTIVE.with(|slot| {
        slot.borrow()
            .as_deref()
            .is_some_and(|active| std::ptr::eq(active, scope))
    })
}
