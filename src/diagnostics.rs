//! Reporting of double resolution.
//!
//! Settling a promise twice is a programmer error. When the promise's
//! [`Context`](crate::Context) carries a [`DiagnosticHook`] the hook receives a
//! [`DoubleResolution`] report and the second write is discarded; without one
//! the process is aborted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::{OutcomeKind, Trace};

/// Process-unique identifier of a promise instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromiseId(u64);

impl PromiseId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An attempt to settle a promise that was already settled.
#[derive(Debug, Clone)]
pub struct DoubleResolution {
    pub promise: PromiseId,
    pub attempted: OutcomeKind,
    pub original: Trace,
    pub violating: Trace,
}

impl fmt::Display for DoubleResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "promise {} resolved twice: {} attempted at {}, first resolved at {}",
            self.promise,
            self.attempted,
            self.violating.location(),
            self.original.location()
        )
    }
}

/// Observer consulted when a promise is resolved more than once.
pub trait DiagnosticHook: Send + Sync {
    fn on_double_resolution(&self, report: &DoubleResolution);
}

impl<F> DiagnosticHook for F
where
    F: Fn(&DoubleResolution) + Send + Sync,
{
    fn on_double_resolution(&self, report: &DoubleResolution) {
        self(report)
    }
}

pub(crate) fn report(hook: Option<&dyn DiagnosticHook>, report: &DoubleResolution) {
    match hook {
        Some(hook) => {
            log::warn!("{report}; discarding the second outcome");
            hook.on_double_resolution(report);
        }
        None => {
            log::error!("{report}\noriginal: {}\nviolating: {}", report.original, report.violating);
            std::process::abort();
        }
    }
}
