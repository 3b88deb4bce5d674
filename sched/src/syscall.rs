use crate::condvar::CondName;
use crate::rate::RateId;
use crate::task::TaskBody;
use crate::tid::Tid;

/// The closed set of suspension requests a task may yield.
///
/// This is a tagged union rather than a trait-object hierarchy, per the
/// Design Notes' guidance on system-call dispatch: the handler table lives
/// on the scheduler, keyed on this enum's discriminant, instead of each
/// request kind carrying its own virtual `handle()` method.
pub enum Syscall {
    /// Re-queue the caller at the tail of the ready queue and do nothing
    /// else. Useful for voluntarily yielding a turn.
    Pass,
    /// Ask for a handle identifying the scheduler itself.
    GetScheduler,
    /// Ask for the caller's own `Tid`.
    GetTid,
    /// Spawn a new task with the given human-readable label.
    NewTask {
        label: String,
        body: Box<dyn TaskBody>,
    },
    /// Terminate the given task if it is alive.
    KillTask(Tid),
    /// Terminate each of the given tasks that is alive.
    KillTasks(Vec<Tid>),
    /// Terminate every living task except the ones named (the caller is
    /// always implicitly excluded — see Open Question #2 in `DESIGN.md`).
    KillAllTasksExcept(Vec<Tid>),
    /// Pause the given task.
    PauseTask(Tid),
    /// Pause each of the given tasks.
    PauseTasks(Vec<Tid>),
    /// Resume the given paused task.
    ResumeTask(Tid),
    /// Resume each of the given paused tasks.
    ResumeTasks(Vec<Tid>),
    /// Block until the given task terminates.
    WaitTask(Tid),
    /// Block until any one of the given tasks terminates.
    WaitAnyTasks(Vec<Tid>),
    /// Block until every one of the given tasks has terminated.
    WaitAllTasks(Vec<Tid>),
    /// Block for (approximately) this many seconds. Requires a
    /// [`crate::TimerScheduler`].
    WaitDuration(f64),
    /// Block until `predicate` returns true. `names` is the explicit list
    /// of condition-variable names the predicate reads — see the Design
    /// Notes on predicate introspection for why this is explicit here
    /// rather than inferred.
    WaitCondition {
        names: Vec<CondName>,
        predicate: Box<dyn Fn() -> bool + Send>,
    },
    /// Sleep long enough to hold the given rate. Requires a
    /// [`crate::TimerScheduler`].
    Sleep(RateId),
    /// Construct a new [`crate::Rate`] ticking at the given frequency, in
    /// Hz. Requires a [`crate::TimerScheduler`].
    CreateRate(f64),
}
