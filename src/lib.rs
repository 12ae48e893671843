//! Single-assignment promises with scheduler-aware continuations.
//!
//! A [`Promise`] starts pending and is settled exactly once with a success
//! value or a failure. Continuations attached with [`Promise::then`],
//! [`Promise::catch`] and [`Promise::always`] are dispatched through the
//! [`Scheduler`] of the promise's [`Context`] once it settles. Promises can be
//! joined with [`Promise::all`], raced with [`Promise::any`], awaited, or
//! waited on from blocking code with [`Promise::wait`].
//!
//! ```
//! use promise_cell::{Context, Promise, RunLoop};
//!
//! let run_loop = RunLoop::new();
//! let context = Context::new(run_loop.clone());
//! let (promise, resolver) = context.pending::<i32, promise_cell::Error>();
//! let doubled = promise.then(|x| Ok(x * 2));
//!
//! resolver.resolve(21);
//! run_loop.run_until_idle();
//! assert_eq!(doubled.peek().unwrap().unwrap(), 42);
//! ```

use std::sync::Arc;

pub mod blocking;
pub mod combinators;
pub mod context;
pub mod diagnostics;
pub mod erased;
pub mod ext;
pub mod future;
pub mod promise;
pub mod scheduler;
pub mod state;
mod timer;

pub use blocking::TimedResult;
pub use context::Context;
pub use diagnostics::{DiagnosticHook, DoubleResolution, PromiseId};
pub use erased::{Erased, OpaquePromise};
pub use future::PromiseFuture;
pub use promise::{IntoPromise, Promise, ResolveFn, Resolver};
pub use scheduler::{QueueScheduler, RunLoop, Scheduler, Work};
pub use state::{OutcomeKind, State, Trace};

/// Failures produced by the crate itself. Operations that synthesize one of
/// these require the promise's error type to implement `From<Error>`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// `any` was given nothing to race.
    #[error("no promises to race")]
    EmptyInput,

    /// An erased value did not hold the requested type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The deadline elapsed before the promise settled.
    #[error("timed out")]
    TimedOut,

    /// Any other failure, carried opaquely.
    #[error("{0}")]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Other(Arc::from(error.into()))
    }
}
