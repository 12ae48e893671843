//! Joining and racing promises.

use std::sync::{Arc, Mutex, PoisonError};

use crate::{Error, Promise};

struct Join<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
    failed: bool,
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Resolves with every value once all inputs succeed, in input order, or
    /// with the first failure.
    ///
    /// An empty input resolves right away with an empty `Vec`. A failure does
    /// not affect the other inputs; their values are dropped when they arrive.
    pub fn all<I>(promises: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        let Some(first) = promises.first() else {
            return Promise::success(Vec::new());
        };
        let (joined, resolver) = first.context().pending();
        let state = Arc::new(Mutex::new(Join {
            slots: vec![None; promises.len()],
            remaining: promises.len(),
            failed: false,
        }));

        for (index, promise) in promises.iter().enumerate() {
            let state = state.clone();
            let resolver = resolver.clone();
            promise.always(move |outcome| {
                match outcome {
                    Ok(value) => {
                        let values = {
                            let mut join = state.lock().unwrap_or_else(PoisonError::into_inner);
                            if join.failed {
                                return Ok(());
                            }
                            join.slots[index] = Some(value);
                            join.remaining -= 1;
                            if join.remaining > 0 {
                                return Ok(());
                            }
                            std::mem::take(&mut join.slots)
                        };
                        resolver.try_settle(Ok(values.into_iter().flatten().collect()));
                    }
                    Err(error) => {
                        {
                            let mut join = state.lock().unwrap_or_else(PoisonError::into_inner);
                            join.failed = true;
                            join.slots.clear();
                        }
                        resolver.try_settle(Err(error));
                    }
                }
                Ok::<(), E>(())
            });
        }
        joined
    }

    /// Settles with the outcome of whichever input settles first.
    ///
    /// Inputs that are already settled win in iteration order. An empty input
    /// fails with [`Error::EmptyInput`]. Losing inputs keep running; their
    /// outcomes are ignored.
    pub fn any<I>(promises: I) -> Promise<T, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
        E: From<Error>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        let Some(first) = promises.first() else {
            return Promise::failure(Error::EmptyInput.into());
        };
        let context = first.context();
        if let Some(outcome) = promises.iter().find_map(|promise| promise.peek()) {
            return context.completed(outcome);
        }
        let (race, resolver) = context.pending();
        for promise in &promises {
            let resolver = resolver.clone();
            promise.always(move |outcome| {
                resolver.try_settle(outcome);
                Ok::<(), E>(())
            });
        }
        race
    }
}
