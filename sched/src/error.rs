use std::fmt;

/// Misuse errors that are programmer errors, not ordinary runtime outcomes.
///
/// Per the error taxonomy: not-found and already-in-state conditions are
/// reported through ordinary return values (`false`, an empty `Vec`, or
/// `None`) and never reach here. `SchedulerError` is reserved for the rows
/// the design calls "fail loudly": they indicate the host or a task is
/// holding the scheduler wrong, and the only reasonable response is to
/// panic rather than let the scheduler limp on in an inconsistent state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// `step`/`run`/`timer_step` was called while a task is already running.
    Reentrant,
    /// A `WaitCondition` predicate was registered with an empty name list,
    /// which means it can never be re-evaluated and the task would block
    /// forever.
    PredicateHasNoConditionVariables,
    /// `WaitDuration`, `CreateRate`, or `Sleep` was yielded to a bare
    /// [`crate::Scheduler`] that has no timer backend. These three requests
    /// are serviced by [`crate::TimerScheduler`] only.
    NoTimerBackend,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reentrant => {
                write!(f, "step() called while a task is already running")
            }
            Self::PredicateHasNoConditionVariables => write!(
                f,
                "WaitCondition predicate names no condition variables; it would never wake"
            ),
            Self::NoTimerBackend => write!(
                f,
                "WaitDuration/CreateRate/Sleep requires a TimerScheduler, not a bare Scheduler"
            ),
        }
    }
}

impl std::error::Error for SchedulerError {}
