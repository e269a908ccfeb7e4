use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use taskspace::{current, enter, preserve, read, register_filter, update, Scope};

fn no_delta() -> std::iter::Empty<(&'static str, Value)> {
    std::iter::empty()
}

fn counting(count: &Arc<AtomicUsize>) -> impl for<'a> Fn(taskspace::Thunk<'a>) + Send + Sync {
    let count = Arc::clone(count);
    move |thunk| {
        count.fetch_add(1, Ordering::SeqCst);
        thunk.run();
    }
}

#[test]
fn filter_runs_around_entry() {
    let scope = Scope::new([("k", json!(1))], Some(current()));
    let count = Arc::new(AtomicUsize::new(0));
    register_filter(&scope, counting(&count));

    let out = enter(&scope, || read("k"));

    assert_eq!(out, Some(Some(json!(1))));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn reentering_active_scope_skips_filter() {
    let scope = Scope::new(no_delta(), Some(current()));
    let count = Arc::new(AtomicUsize::new(0));
    register_filter(&scope, counting(&count));

    enter(&scope, || {
        enter(&scope, || {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        });
    });
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn entering_a_child_skips_the_already_crossed_parent_filter() {
    let parent = Scope::new(no_delta(), Some(current()));
    let count = Arc::new(AtomicUsize::new(0));
    register_filter(&parent, counting(&count));

    enter(&parent, || {
        let child = Scope::new(no_delta(), Some(current()));
        enter(&child, || {});
    });
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn filters_run_again_after_a_full_exit() {
    let parent = Scope::new(no_delta(), Some(current()));
    let count = Arc::new(AtomicUsize::new(0));
    register_filter(&parent, counting(&count));
    let leaf = Scope::new(no_delta(), Some(parent.clone()));

    // Two separate activations from outside the chain: the parent is newly
    // crossed each time.
    enter(&leaf, || {});
    enter(&leaf, || {});
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn filters_on_one_scope_run_in_registration_order() {
    let scope = Scope::new(no_delta(), Some(current()));
    let calls = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&calls);
    register_filter(&scope, move |thunk| {
        first.lock().unwrap().push("first");
        thunk.run();
    });
    let second = Arc::clone(&calls);
    register_filter(&scope, move |thunk| {
        second.lock().unwrap().push("second");
        thunk.run();
    });

    enter(&scope, || {});
    assert_eq!(*calls.lock().unwrap(), ["first", "second"]);
}

#[test]
fn parent_filter_wraps_child_filter() {
    let parent = Scope::new(no_delta(), Some(current()));
    let child = Scope::new(no_delta(), Some(parent.clone()));
    let calls = Arc::new(Mutex::new(Vec::new()));

    let p = Arc::clone(&calls);
    register_filter(&parent, move |thunk| {
        p.lock().unwrap().push("parent-enter");
        thunk.run();
        p.lock().unwrap().push("parent-exit");
    });
    let c = Arc::clone(&calls);
    register_filter(&child, move |thunk| {
        c.lock().unwrap().push("child-enter");
        thunk.run();
        c.lock().unwrap().push("child-exit");
    });

    enter(&child, || {});
    assert_eq!(
        *calls.lock().unwrap(),
        ["parent-enter", "child-enter", "child-exit", "parent-exit"]
    );
}

#[test]
fn around_filter_registers_on_the_current_scope() {
    let count = Arc::new(AtomicUsize::new(0));
    let callback = update(no_delta(), || {
        taskspace::around_filter(counting(&count));
        preserve(|| ())
    })
    .unwrap();

    // Registration alone fires nothing; the next fresh crossing does.
    assert_eq!(count.load(Ordering::SeqCst), 0);
    callback();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn short_circuiting_filter_yields_none() {
    let scope = Scope::new(no_delta(), Some(current()));
    register_filter(&scope, |thunk| drop(thunk));
    assert_eq!(enter(&scope, || 42), None);
}

#[test]
fn panicking_block_still_restores_previous_scope() {
    update([("outer", json!(1))], || {
        let before = current();
        let result = catch_unwind(AssertUnwindSafe(|| {
            update([("inner", json!(2))], || -> () { panic!("boom") });
        }));
        assert!(result.is_err());
        assert!(Arc::ptr_eq(&before, &current()));
        assert_eq!(read("inner"), None);
        assert_eq!(read("outer"), Some(json!(1)));
    });
}

#[test]
fn filter_can_translate_a_panic_from_its_thunk() {
    let scope = Scope::new(no_delta(), Some(current()));
    let translated = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&translated);
    register_filter(&scope, move |thunk| {
        if catch_unwind(AssertUnwindSafe(|| thunk.run())).is_err() {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    let before = current();
    let out = enter(&scope, || -> () { panic!("translate me") });

    // The filter swallowed the failure, so entry reports no result; the
    // active scope is back regardless.
    assert_eq!(out, None);
    assert_eq!(translated.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&before, &current()));
}
