use std::collections::HashSet;

use crate::condvar::CondName;
use crate::rate::RateId;
use crate::scheduler::SchedulerHandle;
use crate::syscall::Syscall;
use crate::tid::Tid;

/// A suspended computation.
///
/// The source this design is ported from represents a task as a Python
/// generator: a function that runs until it `yield`s a request, and is
/// later resumed with one value. Rust has no stable generators, so a task
/// is instead a hand-written state machine — the Design Notes' guidance for
/// ports to languages without native coroutines. `TaskBody::resume` is that
/// state machine's single entry point: it is called with a [`SchedulerHandle`]
/// good for the duration of this call, plus whatever [`Resume`] value
/// answers the request the task most recently yielded, and it runs until the
/// task's next suspension point.
///
/// Passing the handle as a parameter on every call, rather than handing a
/// task a reference it could try to hold onto across a suspension, is how
/// the Design Notes say to port "the scheduler calls back into itself" to a
/// single-ownership language: the handle is only live for the `resume` call
/// that produced it, so a task reaches `new_task`/`kill_task`/`pause_task`/
/// `resume_task`/`list_all_tids`/`get_current_tid`/`current_time`/
/// `create_rate` synchronously, without a suspend/resume round trip, by
/// calling straight through it.
///
/// Any blanket `FnMut(SchedulerHandle, Resume) -> Step` closure implements
/// this automatically (see the impl below), which covers the common case of
/// a task written as a small closure that matches on an internal `enum
/// State`.
///
/// `Send` is a supertrait so that `Box<dyn TaskBody>` is itself `Send`,
/// which [`crate::SyncScheduler`] needs in order to move a whole scheduler
/// (tasks and all) across the thread boundary its `run` loop runs on. A
/// purely single-threaded [`crate::Scheduler`] pays this as a minor
/// ergonomic cost: task closures must capture `Arc`/`Mutex` rather than
/// `Rc`/`RefCell` if they share state with the outside world.
pub trait TaskBody: Send {
    fn resume(&mut self, sched: SchedulerHandle<'_>, value: Resume) -> Step;
}

impl<F> TaskBody for F
where
    F: FnMut(SchedulerHandle<'_>, Resume) -> Step + Send,
{
    fn resume(&mut self, sched: SchedulerHandle<'_>, value: Resume) -> Step {
        self(sched, value)
    }
}

/// What a task's computation produced when last driven.
pub enum Step {
    /// The task yielded a suspension request and wants to be resumed later.
    Suspend(Syscall),
    /// The task's computation finished normally.
    Done,
}

/// The value delivered to a task's [`TaskBody::resume`] on its next step.
///
/// Every suspension request kind in `Syscall` has exactly one corresponding
/// `Resume` shape, matching the "value returned to task on resume" column
/// of the suspension-request catalogue.
#[derive(Debug, Clone)]
pub enum Resume {
    /// The very first resume of a freshly spawned task, and the answer to
    /// `Pass`.
    Unit,
    Bool(bool),
    Tid(Tid),
    OptionTid(Option<Tid>),
    Tids(Vec<Tid>),
    /// Answer to `Sleep`: the delta computed by `Rate::sleep`, positive if
    /// the rate slept and non-positive if it overran.
    Elapsed(f64),
    /// Answer to `GetScheduler`. See [`crate::SchedulerAck`] for why this
    /// carries no live reference into the scheduler — `resume`'s own
    /// [`SchedulerHandle`] parameter is the real way to reach it now.
    Handle(crate::SchedulerAck),
    /// Answer to `CreateRate`.
    Rate(RateId),
    /// Answer to `WaitAllTasks`: whether every requested TID has now
    /// terminated, plus which of the requested TIDs actually existed and
    /// were registered against (see Open Question #3 in `DESIGN.md`).
    WaitAll { completed: bool, registered: Vec<Tid> },
}

/// Meaningful only while a task sits in the exit-wait map: which of
/// `WaitTask`/`WaitAnyTasks`/`WaitAllTasks` registered it, and therefore how
/// its resume value should be shaped and when it should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// `WaitTask`: waiting on exactly one target, resumed with
    /// `Option<Tid>` (`None` if the target never existed).
    Single,
    /// `WaitAnyTasks`: wakes on the first of several targets to terminate.
    Any,
    /// `WaitAllTasks`: wakes only once every registered target has
    /// terminated.
    All,
}

/// A task's registered `WaitCondition` predicate, kept on the task so the
/// condition-wait map only needs to carry a `Tid` per name.
pub(crate) struct CondWait {
    pub(crate) predicate: Box<dyn Fn() -> bool + Send>,
    pub(crate) names: Vec<CondName>,
}

/// One task: its identifier, its suspended computation, the value it will
/// be resumed with next, and whatever bookkeeping its current wait state
/// needs.
pub(crate) struct Task {
    pub(crate) label: String,
    pub(crate) body: Box<dyn TaskBody>,
    pub(crate) send_value: Resume,
    pub(crate) wait_mode: WaitMode,
    pub(crate) cond_wait: Option<CondWait>,
    /// While in the exit-wait map: the targets this task is still waiting
    /// on. For `WaitTask`/`WaitAnyTasks` this is the full target set, so the
    /// other entries can be torn down once one of them fires; for
    /// `WaitAllTasks` entries are removed one at a time as each target
    /// terminates, so emptying this set is what signals completion.
    pub(crate) exit_wait_remaining: HashSet<Tid>,
    /// For `WaitAllTasks` only: the full set of TIDs actually registered
    /// against (i.e. that existed at call time), handed back to the caller
    /// alongside the `bool` completion flag — see Open Question #3 in
    /// `DESIGN.md`.
    pub(crate) exit_wait_registered: Vec<Tid>,
    /// Set once this task's wake event has fired while it was paused in a
    /// wait set. Held until `resume_task` actually delivers it. See the
    /// "deferred wake" resolution in `DESIGN.md`.
    pub(crate) deferred_wake: Option<Resume>,
}

impl Task {
    pub(crate) fn new(label: String, body: Box<dyn TaskBody>) -> Self {
        Self {
            label,
            body,
            send_value: Resume::Unit,
            wait_mode: WaitMode::Single,
            cond_wait: None,
            exit_wait_remaining: HashSet::new(),
            exit_wait_registered: Vec::new(),
            deferred_wake: None,
        }
    }
}
