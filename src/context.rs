//! Per-promise configuration: the dispatch scheduler, the double resolution
//! hook and whether resolution traces capture backtraces.
//!
//! Every promise carries the `Context` it was created in, and promises derived
//! from it through chaining inherit it. Nothing here is process-wide, so tests
//! can install a hook on one context without affecting any other.

use std::fmt;
use std::panic::Location;
use std::sync::{Arc, LazyLock};

use crate::diagnostics::DiagnosticHook;
use crate::promise::{IntoPromise, Promise, ResolveFn, Resolver};
use crate::scheduler::{self, Scheduler};
use crate::state::{ResolutionCell, Trace};

/// Set to `1` to capture backtraces in [`Context::default`].
pub const BACKTRACE_ENV: &str = "PROMISE_CELL_BACKTRACE";

static BACKTRACES_BY_DEFAULT: LazyLock<bool> = LazyLock::new(|| {
    std::env::var(BACKTRACE_ENV).is_ok_and(|value| value == "1" || value.eq_ignore_ascii_case("true"))
});

#[derive(Clone)]
pub struct Context {
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) hook: Option<Arc<dyn DiagnosticHook>>,
    pub(crate) backtraces: bool,
}

impl Context {
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            hook: None,
            backtraces: *BACKTRACES_BY_DEFAULT,
        }
    }

    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    /// Reports double resolution to `hook` instead of aborting.
    pub fn with_hook(mut self, hook: impl DiagnosticHook + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn with_backtraces(mut self, enabled: bool) -> Self {
        self.backtraces = enabled;
        self
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn hook(&self) -> Option<&Arc<dyn DiagnosticHook>> {
        self.hook.as_ref()
    }

    pub fn captures_backtraces(&self) -> bool {
        self.backtraces
    }

    /// A pending promise and the handle that settles it.
    pub fn pending<T, E>(&self) -> (Promise<T, E>, Resolver<T, E>)
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        let promise = Promise::from_cell(self.clone(), ResolutionCell::pending());
        let resolver = Resolver::new(promise.clone());
        (promise, resolver)
    }

    /// Hands `executor` the resolve/reject entry points of a new promise.
    pub fn promise<T, E, F>(&self, executor: F) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        F: FnOnce(Resolver<T, E>),
    {
        let (promise, resolver) = self.pending();
        executor(resolver);
        promise
    }

    /// Like [`promise`](Context::promise) for producers that cannot fail.
    pub fn promise_resolve_only<T, E, F>(&self, executor: F) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        F: FnOnce(ResolveFn<T>),
    {
        let (promise, resolver) = self.pending();
        executor(Arc::new(move |value| resolver.resolve(value)));
        promise
    }

    /// Runs `compute` immediately and captures its outcome.
    #[track_caller]
    pub fn attempt<T, E, F>(&self, compute: F) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        self.completed(compute())
    }

    /// A promise that is resolved from the start.
    #[track_caller]
    pub fn completed<T, E>(&self, outcome: Result<T, E>) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        let trace = Trace::capture(Location::caller(), self.backtraces);
        Promise::from_cell(self.clone(), ResolutionCell::resolved(outcome, trace))
    }

    #[track_caller]
    pub fn success<T, E>(&self, value: T) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.completed(Ok(value))
    }

    #[track_caller]
    pub fn failure<T, E>(&self, error: E) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.completed(Err(error))
    }

    /// Runs `work` on this context's scheduler; the promise settles with
    /// whatever it produces.
    pub fn spawn<E, F, P>(&self, work: F) -> Promise<P::Output, E>
    where
        E: Clone + Send + 'static,
        F: FnOnce() -> P + Send + 'static,
        P: IntoPromise<E>,
    {
        let (promise, resolver) = self.pending();
        self.scheduler.schedule(Box::new(move || work().pipe(resolver)));
        self.scheduler.wake();
        promise
    }
}

impl Default for Context {
    /// The global queue, no hook, backtraces per [`BACKTRACE_ENV`].
    fn default() -> Self {
        Self::new(scheduler::global().clone())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("hook", &self.hook.is_some())
            .field("backtraces", &self.backtraces)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RunLoop;
    use crate::Error;

    #[test]
    fn test_builder() {
        let context = Context::new(RunLoop::new())
            .with_backtraces(true)
            .with_hook(|_: &crate::DoubleResolution| {});
        assert!(context.captures_backtraces());
        assert!(context.hook().is_some());
        assert!(!context.scheduler().is_current());
    }

    #[test]
    fn test_attempt_runs_eagerly() {
        let context = Context::new(RunLoop::new());
        let promise: Promise<i32, Error> = context.attempt(|| Ok(3));
        assert!(matches!(promise.peek(), Some(Ok(3))));
    }

    #[test]
    fn test_spawn_runs_on_scheduler() {
        let run_loop = RunLoop::new();
        let context = Context::new(run_loop.clone());
        let promise = context.spawn(|| Ok::<_, Error>("done"));
        assert!(promise.is_pending());
        run_loop.run_until_idle();
        assert!(matches!(promise.peek(), Some(Ok("done"))));
    }
}
