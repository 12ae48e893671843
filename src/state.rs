//! The resolution cell: a pending/resolved slot that accepts exactly one
//! write, plus the call-site record of that write.

use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// The underlying status of a promise.
#[derive(Debug, Clone)]
pub enum State<T, E> {
    Pending,
    Resolved(Result<T, E>),
}

impl<T, E> State<T, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }

    pub fn outcome(&self) -> Option<&Result<T, E>> {
        match self {
            State::Pending => None,
            State::Resolved(outcome) => Some(outcome),
        }
    }
}

/// Which side of a `Result` a resolution carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Failure,
}

impl OutcomeKind {
    pub fn of<T, E>(outcome: &Result<T, E>) -> Self {
        match outcome {
            Ok(_) => OutcomeKind::Success,
            Err(_) => OutcomeKind::Failure,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Success => f.write_str("success"),
            OutcomeKind::Failure => f.write_str("failure"),
        }
    }
}

/// Where a resolution was attempted.
///
/// The source location is always recorded. A full backtrace is only captured
/// when the owning [`Context`](crate::Context) has backtraces enabled, since
/// capturing one on every resolution is expensive.
#[derive(Clone)]
pub struct Trace {
    location: &'static Location<'static>,
    backtrace: Option<Arc<Backtrace>>,
}

impl Trace {
    pub(crate) fn capture(location: &'static Location<'static>, with_backtrace: bool) -> Self {
        Self {
            location,
            backtrace: with_backtrace.then(|| Arc::new(Backtrace::force_capture())),
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location)?;
        if let Some(backtrace) = &self.backtrace {
            write!(f, "\n{backtrace}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("location", &self.location)
            .field("backtrace", &self.backtrace.is_some())
            .finish()
    }
}

/// State plus the trace of the one write it accepted.
#[derive(Debug)]
pub(crate) struct ResolutionCell<T, E> {
    state: State<T, E>,
    resolved_at: Option<Trace>,
}

impl<T, E> ResolutionCell<T, E> {
    pub(crate) fn pending() -> Self {
        Self {
            state: State::Pending,
            resolved_at: None,
        }
    }

    pub(crate) fn resolved(outcome: Result<T, E>, trace: Trace) -> Self {
        Self {
            state: State::Resolved(outcome),
            resolved_at: Some(trace),
        }
    }

    pub(crate) fn state(&self) -> &State<T, E> {
        &self.state
    }

    pub(crate) fn resolved_at(&self) -> Option<&Trace> {
        self.resolved_at.as_ref()
    }

    /// Moves the cell from pending to resolved. An already resolved cell is
    /// left untouched and the violating trace is handed back.
    pub(crate) fn write(&mut self, outcome: Result<T, E>, trace: Trace) -> Result<(), Trace> {
        if !self.state.is_pending() {
            return Err(trace);
        }
        self.state = State::Resolved(outcome);
        self.resolved_at = Some(trace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn here() -> Trace {
        Trace::capture(Location::caller(), false)
    }

    #[test]
    fn test_cell_accepts_one_write() {
        let mut cell = ResolutionCell::<i32, ()>::pending();
        assert!(cell.state().is_pending());
        assert!(cell.write(Ok(1), here()).is_ok());

        let first = cell.resolved_at().map(|trace| trace.location().line());
        let rejected = cell.write(Err(()), here()).unwrap_err();
        assert_ne!(Some(rejected.location().line()), first);
        assert!(matches!(cell.state().outcome(), Some(Ok(1))));
    }

    #[test]
    fn test_trace_backtrace_is_opt_in() {
        assert!(here().backtrace().is_none());
        let trace = Trace::capture(Location::caller(), true);
        assert!(trace.backtrace().is_some());
        assert!(trace.to_string().starts_with(file!()));
    }

    #[test]
    fn test_outcome_kind() {
        assert_eq!(OutcomeKind::of(&Ok::<_, ()>(1)), OutcomeKind::Success);
        assert_eq!(OutcomeKind::of(&Err::<(), _>(1)), OutcomeKind::Failure);
        assert_eq!(OutcomeKind::Failure.to_string(), "failure");
    }
}
