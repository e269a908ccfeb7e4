use std::sync::Arc;

/// The rest of the computation, as handed to an around-filter.
///
/// A filter receives the thunk by value and may run it at most once. Dropping
/// it without running short-circuits the scope entry: the wrapped block never
/// executes and `enter` yields `None`.
pub struct Thunk<'a> {
    inner: Option<Box<dyn FnOnce() + 'a>>,
}

impl<'a> Thunk<'a> {
    pub(crate) fn new(inner: Box<dyn FnOnce() + 'a>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Run the wrapped computation, consuming the thunk.
    pub fn run(mut self) {
        if let Some(inner) = self.inner.take() {
            inner();
        }
    }
}

/// Setup/teardown wrapper attached to a scope.
///
/// Shared via `Arc` so a scope entered from several threads runs the same
/// filter object; the filter itself decides whether to run its thunk.
pub type AroundFilter = Arc<dyn for<'a> Fn(Thunk<'a>) + Send + Sync>;

/// Fold `filters` (outermost first) around `innermost` and run the result.
///
/// The first filter in the slice ends up wrapping all the others, which in
/// turn wrap the innermost computation. An empty slice just runs `innermost`.
pub(crate) fn compose_and_run<'a>(filters: Vec<AroundFilter>, innermost: Box<dyn FnOnce() + 'a>) {
    let mut next = innermost;
    for filter in filters.into_iter().rev() {
        next = Box::new(move || filter(Thunk::new(next)));
    }
    next();
}
