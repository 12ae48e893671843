//! Awaiting a promise.
//!
//! A [`Promise`] can be awaited from any executor. The first poll of a pending
//! promise registers one listener that wakes the most recently seen waker.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::Promise;

#[derive(Debug)]
enum WakerState {
    Waiting(Waker),
    Woken,
}

/// The future returned by awaiting a [`Promise`].
///
/// # Examples
///
/// ```
/// use promise_cell::Promise;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (promise, resolver) = Promise::<String>::pending();
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received {:?}", promise.await);
/// }));
/// resolver.resolve("Hi".into());
/// task1.join().expect("The task1 thread has panicked.");
/// ```
#[derive(Debug)]
pub struct PromiseFuture<T, E> {
    promise: Promise<T, E>,
    waker: Option<Arc<Mutex<WakerState>>>,
}

impl<T, E> Future for PromiseFuture<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.promise.peek() {
            return Poll::Ready(outcome);
        }
        match &this.waker {
            Some(slot) => {
                let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
                *state = WakerState::Waiting(cx.waker().clone());
            }
            None => {
                let slot = Arc::new(Mutex::new(WakerState::Waiting(cx.waker().clone())));
                let listener = slot.clone();
                this.waker = Some(slot);
                this.promise.subscribe(move |_| {
                    let state = std::mem::replace(
                        &mut *listener.lock().unwrap_or_else(PoisonError::into_inner),
                        WakerState::Woken,
                    );
                    if let WakerState::Waiting(waker) = state {
                        waker.wake()
                    }
                });
            }
        }
        Poll::Pending
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = PromiseFuture<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseFuture {
            promise: self,
            waker: None,
        }
    }
}
