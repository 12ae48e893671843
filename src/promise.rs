//! The promise core: one mutex-guarded unit holding the resolution cell, the
//! listener queue and the dispatch context, shared by [`Promise`] handles and
//! their [`Resolver`]s.

use std::cell::Cell;
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::context::Context;
use crate::diagnostics::{self, DoubleResolution, PromiseId};
use crate::scheduler::{Scheduler, Work};
use crate::state::{OutcomeKind, ResolutionCell, State, Trace};
use crate::Error;

type Listener<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

/// The resolve half handed to resolve-only producers.
pub type ResolveFn<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Subscriber<T, E> {
    key: u64,
    callback: Listener<T, E>,
    /// Dispatch on this scheduler instead of the promise's own.
    via: Option<Arc<dyn Scheduler>>,
}

struct Inner<T, E> {
    id: PromiseId,
    cell: ResolutionCell<T, E>,
    listeners: Vec<Subscriber<T, E>>,
    next_listener: u64,
    context: Context,
}

/// Listeners taken out of the queue by one drain, with what they need to run.
struct Drain<T, E> {
    outcome: Result<T, E>,
    subscribers: Vec<Subscriber<T, E>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Clone, E: Clone> Inner<T, E> {
    fn take_drain(&mut self) -> Option<Drain<T, E>> {
        let outcome = self.cell.state().outcome()?;
        if self.listeners.is_empty() {
            return None;
        }
        Some(Drain {
            outcome: outcome.clone(),
            subscribers: std::mem::take(&mut self.listeners),
            scheduler: self.context.scheduler.clone(),
        })
    }
}

impl<T, E> Drain<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn dispatch(self) {
        let Drain {
            outcome,
            subscribers,
            scheduler,
        } = self;
        log::trace!("dispatching {} listener(s)", subscribers.len());
        let mut batch = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers {
            match subscriber.via {
                Some(via) => {
                    let outcome = outcome.clone();
                    let callback = subscriber.callback;
                    run_on(&via, Box::new(move || callback(outcome)));
                }
                None => batch.push(subscriber.callback),
            }
        }
        if batch.is_empty() {
            return;
        }
        run_on(
            &scheduler,
            Box::new(move || {
                for callback in batch {
                    callback(outcome.clone());
                }
            }),
        );
    }
}

/// Nested inline dispatches allowed on one thread before falling back to the
/// scheduler's queue. Each level settles one more link of a chain.
const MAX_INLINE_DEPTH: usize = 32;

thread_local! {
    static INLINE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one level of inline dispatch until dropped.
struct InlineFrame;

impl InlineFrame {
    fn enter() -> Option<Self> {
        INLINE_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_INLINE_DEPTH {
                return None;
            }
            depth.set(current + 1);
            Some(InlineFrame)
        })
    }
}

impl Drop for InlineFrame {
    fn drop(&mut self) {
        INLINE_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

fn run_on(scheduler: &Arc<dyn Scheduler>, work: Work) {
    if scheduler.is_current() {
        if let Some(_frame) = InlineFrame::enter() {
            work();
            return;
        }
    }
    scheduler.schedule(work);
    scheduler.wake();
}

/// A single-assignment container for a `Result<T, E>`.
///
/// `Promise` is a cheap handle: clones refer to the same instance.
/// Continuations attached with [`then`](Promise::then),
/// [`catch`](Promise::catch) and [`always`](Promise::always) run on the
/// scheduler of the promise's [`Context`] once it settles.
///
/// # Examples
///
/// ```
/// use promise_cell::Promise;
/// use std::time::Duration;
///
/// let answer = Promise::<i32>::success(42).then(|x| Ok(x + 1));
/// assert_eq!(answer.wait(Duration::from_secs(5)).unwrap(), 43);
/// ```
pub struct Promise<T, E = Error> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Settles the promise it was created with. Cloneable, so producers may race
/// each other; only the first settlement counts.
pub struct Resolver<T, E = Error> {
    promise: Promise<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

/// Anything a continuation may return: a plain outcome, or a promise whose
/// eventual outcome the downstream promise adopts.
pub trait IntoPromise<E> {
    type Output: Clone + Send + 'static;

    /// Settles `resolver` with this value's outcome, now or once known.
    fn pipe(self, resolver: Resolver<Self::Output, E>);
}

impl<T, E> IntoPromise<E> for Result<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = T;

    fn pipe(self, resolver: Resolver<T, E>) {
        resolver.settle(self)
    }
}

impl<T, E> IntoPromise<E> for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = T;

    fn pipe(self, resolver: Resolver<T, E>) {
        self.subscribe(move |outcome| resolver.settle(outcome));
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn from_cell(context: Context, cell: ResolutionCell<T, E>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                id: PromiseId::next(),
                cell,
                listeners: Vec::new(),
                next_listener: 0,
                context,
            })),
        }
    }

    /// A pending promise in the default context and the handle that settles it.
    pub fn pending() -> (Self, Resolver<T, E>) {
        Context::default().pending()
    }

    /// Hands `executor` the resolve/reject entry points.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_cell::Promise;
    /// use futures::executor::block_on;
    /// use std::thread;
    ///
    /// let promise = Promise::<String>::new(|resolver| {
    ///     thread::spawn(move || resolver.resolve("🍓".into()));
    /// });
    /// assert_eq!(block_on(async { promise.await }).unwrap(), "🍓");
    /// ```
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        Context::default().promise(executor)
    }

    pub fn new_resolve_only<F>(executor: F) -> Self
    where
        F: FnOnce(ResolveFn<T>),
    {
        Context::default().promise_resolve_only(executor)
    }

    /// Runs `compute` right away and captures its outcome.
    #[track_caller]
    pub fn attempt<F>(compute: F) -> Self
    where
        F: FnOnce() -> Result<T, E>,
    {
        Context::default().attempt(compute)
    }

    #[track_caller]
    pub fn completed(outcome: Result<T, E>) -> Self {
        Context::default().completed(outcome)
    }

    #[track_caller]
    pub fn success(value: T) -> Self {
        Context::default().success(value)
    }

    #[track_caller]
    pub fn failure(error: E) -> Self {
        Context::default().failure(error)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> PromiseId {
        self.lock().id
    }

    /// The context derived promises are created in.
    pub fn context(&self) -> Context {
        self.lock().context.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().cell.state().is_pending()
    }

    pub fn is_resolved(&self) -> bool {
        !self.is_pending()
    }

    /// A copy of the outcome, if settled.
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.lock().cell.state().outcome().cloned()
    }

    fn settle_at(&self, outcome: Result<T, E>, location: &'static Location<'static>, strict: bool) -> bool {
        let mut inner = self.lock();
        if !strict && !inner.cell.state().is_pending() {
            return false;
        }
        let attempted = OutcomeKind::of(&outcome);
        let trace = Trace::capture(location, inner.context.backtraces);
        match inner.cell.write(outcome, trace) {
            Ok(()) => {
                let drain = inner.take_drain();
                drop(inner);
                if let Some(drain) = drain {
                    drain.dispatch();
                }
                true
            }
            Err(violating) => {
                let report = DoubleResolution {
                    promise: inner.id,
                    attempted,
                    original: inner
                        .cell
                        .resolved_at()
                        .cloned()
                        .unwrap_or_else(|| violating.clone()),
                    violating,
                };
                let hook = inner.context.hook.clone();
                drop(inner);
                diagnostics::report(hook.as_deref(), &report);
                false
            }
        }
    }

    fn push_listener(&self, callback: Listener<T, E>, via: Option<Arc<dyn Scheduler>>) -> u64 {
        let (key, drain) = {
            let mut inner = self.lock();
            let key = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.push(Subscriber { key, callback, via });
            (key, inner.take_drain())
        };
        if let Some(drain) = drain {
            drain.dispatch();
        }
        key
    }

    pub(crate) fn subscribe<F>(&self, callback: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.push_listener(Box::new(callback), None);
    }

    /// Registers `callback` to be dispatched on `scheduler` rather than on the
    /// promise's own.
    ///
    /// Returns a key for [`unsubscribe`](Promise::unsubscribe).
    pub(crate) fn subscribe_via<F>(&self, scheduler: Arc<dyn Scheduler>, callback: F) -> u64
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.push_listener(Box::new(callback), Some(scheduler))
    }

    /// Drops a listener that has not been dispatched yet.
    pub(crate) fn unsubscribe(&self, key: u64) {
        self.lock().listeners.retain(|subscriber| subscriber.key != key);
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// A pending promise in this promise's context, settled by `step` once
    /// this one settles.
    fn chain<R, F>(&self, step: F) -> Promise<R, E>
    where
        R: Clone + Send + 'static,
        F: FnOnce(Result<T, E>, Resolver<R, E>) + Send + 'static,
    {
        let (downstream, resolver) = self.context().pending();
        self.subscribe(move |outcome| step(outcome, resolver));
        downstream
    }

    /// Runs `on_success` with the value; failures skip it and pass through.
    ///
    /// `on_success` returns either a `Result` or another promise, whose
    /// outcome the returned promise adopts.
    pub fn then<F, P>(&self, on_success: F) -> Promise<P::Output, E>
    where
        F: FnOnce(T) -> P + Send + 'static,
        P: IntoPromise<E>,
    {
        self.chain(move |outcome, resolver| match outcome {
            Ok(value) => on_success(value).pipe(resolver),
            Err(error) => resolver.settle(Err(error)),
        })
    }

    /// Runs `on_failure` with the error to recover; successes pass through.
    pub fn catch<F, P>(&self, on_failure: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> P + Send + 'static,
        P: IntoPromise<E, Output = T>,
    {
        self.chain(move |outcome, resolver| match outcome {
            Ok(value) => resolver.settle(Ok(value)),
            Err(error) => on_failure(error).pipe(resolver),
        })
    }

    /// Runs `on_settled` with the outcome either way.
    pub fn always<F, P>(&self, on_settled: F) -> Promise<P::Output, E>
    where
        F: FnOnce(Result<T, E>) -> P + Send + 'static,
        P: IntoPromise<E>,
    {
        self.chain(move |outcome, resolver| on_settled(outcome).pipe(resolver))
    }

    /// Observes a failure without recovering from it.
    pub fn on_rejection<F>(&self, observer: F) -> &Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.subscribe(move |outcome| {
            if let Err(error) = outcome {
                observer(error);
            }
        });
        self
    }

    /// A derived promise whose continuations run on `scheduler`.
    pub fn resolve_on(&self, scheduler: impl Scheduler + 'static) -> Promise<T, E> {
        let context = self.context().with_scheduler(scheduler);
        let (downstream, resolver) = context.pending();
        self.subscribe(move |outcome| resolver.settle(outcome));
        downstream
    }

    /// Moves this promise's own continuations onto `scheduler`.
    pub fn resolving_on(&self, scheduler: impl Scheduler + 'static) -> &Self {
        self.lock().context.scheduler = Arc::new(scheduler);
        self
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn new(promise: Promise<T, E>) -> Self {
        Self { promise }
    }

    #[track_caller]
    pub fn resolve(&self, value: T) {
        self.promise.settle_at(Ok(value), Location::caller(), true);
    }

    #[track_caller]
    pub fn reject(&self, error: E) {
        self.promise.settle_at(Err(error), Location::caller(), true);
    }

    /// Settles with `outcome`. Settling twice is reported to the context's
    /// hook, or aborts the process when there is none.
    #[track_caller]
    pub fn settle(&self, outcome: Result<T, E>) {
        self.promise.settle_at(outcome, Location::caller(), true);
    }

    /// Settles with `outcome` unless already settled; returns whether this
    /// call won.
    #[track_caller]
    pub fn try_settle(&self, outcome: Result<T, E>) -> bool {
        self.promise.settle_at(outcome, Location::caller(), false)
    }

    pub fn is_pending(&self) -> bool {
        self.promise.is_pending()
    }

    pub fn promise(&self) -> &Promise<T, E> {
        &self.promise
    }
}

impl<T, E> From<Result<T, E>> for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    #[track_caller]
    fn from(outcome: Result<T, E>) -> Self {
        Promise::completed(outcome)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        write!(f, "Promise<{}> {{ ", std::any::type_name::<T>())?;
        match inner.cell.state() {
            State::Pending => write!(f, "pending")?,
            State::Resolved(Ok(value)) => write!(f, "resolved({value:?})")?,
            State::Resolved(Err(error)) => write!(f, "rejected({error:?})")?,
        }
        write!(f, " }}")
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}
