//! Bridges to blocking code and deadlines.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::scheduler;
use crate::{timer, Error, Promise};

/// Outcome of [`Promise::with_lifetime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimedResult<T> {
    Finished(T),
    TimedOut,
}

/// A one-shot slot a waiting thread sleeps on.
struct Signal<T> {
    outcome: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Signal<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn notify(&self, outcome: T) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.ready.notify_all();
    }

    fn wait_until(&self, deadline: Instant) -> Option<T> {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.take() {
                return Some(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = self
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    // Far enough to never elapse in practice.
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365 * 30))
}

impl Context {
    /// A promise that resolves once `delay` has elapsed.
    pub fn after<E>(&self, delay: Duration) -> Promise<(), E>
    where
        E: Clone + Send + 'static,
    {
        let (promise, resolver) = self.pending();
        timer::schedule_at(deadline_after(delay), Box::new(move || resolver.resolve(())));
        promise
    }
}

impl<E> Promise<(), E>
where
    E: Clone + Send + 'static,
{
    /// A promise in the default context that resolves once `delay` has elapsed.
    pub fn after(delay: Duration) -> Self {
        Context::default().after(delay)
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    /// Blocks the calling thread until the promise settles or `timeout`
    /// elapses, in which case it fails with [`Error::TimedOut`].
    pub fn wait(&self, timeout: Duration) -> Result<T, E> {
        self.wait_until(deadline_after(timeout))
    }

    pub fn wait_until(&self, deadline: Instant) -> Result<T, E> {
        if let Some(outcome) = self.peek() {
            return outcome;
        }
        let signal = Arc::new(Signal::new());
        let notify = signal.clone();
        let key = self.subscribe_via(Arc::new(scheduler::wait_queue().clone()), move |outcome| {
            notify.notify(outcome)
        });
        match signal.wait_until(deadline) {
            Some(outcome) => outcome,
            None => {
                self.unsubscribe(key);
                log::debug!("promise {} not settled before its deadline", self.id());
                Err(Error::TimedOut.into())
            }
        }
    }

    /// Races this promise against a `lifetime` timer. The promise keeps
    /// running after losing; its outcome is dropped.
    pub fn with_lifetime(&self, lifetime: Duration) -> Promise<TimedResult<T>, E> {
        let finished = self.then(|value| Ok(TimedResult::Finished(value)));
        let expired = self
            .context()
            .after(lifetime)
            .then(|()| Ok(TimedResult::TimedOut));
        Promise::any([finished, expired])
    }
}
