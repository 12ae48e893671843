//! Conveniences built only on [`Promise::then`], [`Promise::catch`] and
//! [`Promise::always`].

use crate::{Context, Promise};

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn observe_output<F>(&self, observer: F) -> Promise<T, E>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.then(move |value| {
            observer(&value);
            Ok(value)
        })
    }

    pub fn observe_failure<F>(&self, observer: F) -> Promise<T, E>
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.catch(move |error| {
            observer(&error);
            Err(error)
        })
    }

    pub fn observe_always<F>(&self, observer: F) -> Promise<T, E>
    where
        F: FnOnce(&Result<T, E>) + Send + 'static,
    {
        self.always(move |outcome| {
            observer(&outcome);
            outcome
        })
    }

    /// Discards the value in favor of `value`.
    pub fn replace<R>(&self, value: R) -> Promise<R, E>
    where
        R: Clone + Send + 'static,
    {
        self.then(move |_| Ok(value))
    }

    /// Pairs the value with the value of the promise `next` builds from it.
    pub fn zip<R, F>(&self, next: F) -> Promise<(T, R), E>
    where
        R: Clone + Send + 'static,
        F: FnOnce(&T) -> Promise<R, E> + Send + 'static,
    {
        self.then(move |value| {
            let other = next(&value);
            other.then(move |other| Ok((value, other)))
        })
    }

    /// Fails with `error` unless the value equals `expected`.
    pub fn expect_eq(&self, expected: T, error: E) -> Promise<T, E>
    where
        T: PartialEq,
    {
        self.then(move |value| if value == expected { Ok(value) } else { Err(error) })
    }
}

impl<T, E> Promise<Option<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Unwraps the value, failing with `error` on `None`.
    pub fn some_or(&self, error: E) -> Promise<T, E> {
        self.then(move |value| value.ok_or(error))
    }

    pub fn map_some<R, F>(&self, map: F) -> Promise<Option<R>, E>
    where
        R: Clone + Send + 'static,
        F: FnOnce(T) -> Result<R, E> + Send + 'static,
    {
        self.then(move |value| value.map(map).transpose())
    }
}

impl<T, E> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn map_each<R, F>(&self, map: F) -> Promise<Vec<R>, E>
    where
        R: Clone + Send + 'static,
        F: FnMut(T) -> Result<R, E> + Send + 'static,
    {
        self.then(move |values| values.into_iter().map(map).collect::<Result<Vec<R>, E>>())
    }

    pub fn filter_each<F>(&self, mut keep: F) -> Promise<Vec<T>, E>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.then(move |values| Ok(values.into_iter().filter(|value| keep(value)).collect::<Vec<T>>()))
    }

    pub fn first(&self) -> Promise<Option<T>, E> {
        self.then(|values| Ok(values.into_iter().next()))
    }

    /// Maps every element, keeping only the `Some` results.
    pub fn filter_map_each<R, F>(&self, map: F) -> Promise<Vec<R>, E>
    where
        R: Clone + Send + 'static,
        F: FnMut(T) -> Option<R> + Send + 'static,
    {
        self.then(move |values| Ok(values.into_iter().filter_map(map).collect::<Vec<R>>()))
    }

    pub fn sorted(&self) -> Promise<Vec<T>, E>
    where
        T: Ord,
    {
        self.then(|mut values| {
            values.sort();
            Ok(values)
        })
    }

    pub fn fold<A, F>(&self, init: A, step: F) -> Promise<A, E>
    where
        A: Clone + Send + 'static,
        F: FnMut(A, T) -> A + Send + 'static,
    {
        self.then(move |values| Ok(values.into_iter().fold(init, step)))
    }
}

impl<T, E> Promise<Vec<Vec<T>>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn flatten(&self) -> Promise<Vec<T>, E> {
        self.then(|nested| Ok(nested.into_iter().flatten().collect::<Vec<T>>()))
    }
}

/// Builds one promise per item, each started only after the previous one
/// succeeded, and joins them in order.
pub fn serial<I, T, E, F>(context: &Context, items: I, mut generator: F) -> Promise<Vec<T>, E>
where
    I: IntoIterator,
    I::Item: Send + 'static,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: FnMut(I::Item) -> Promise<T, E> + Clone + Send + 'static,
{
    let mut promises: Vec<Promise<T, E>> = Vec::new();
    for item in items {
        let next = match promises.last() {
            None => generator(item),
            Some(previous) => {
                let mut generator = generator.clone();
                previous.then(move |_| generator(item))
            }
        };
        promises.push(next);
    }
    if promises.is_empty() {
        return context.success(Vec::new());
    }
    Promise::all(promises)
}
