//! A single-threaded, cooperative task scheduler for mission-style control
//! programs: long-running supervisory logic expressed as a collection of
//! lightweight tasks that suspend on timers, conditions, or on the lifecycle
//! of other tasks.
//!
//! The scheduler never pre-empts a task: a task runs from one suspension
//! point to the next without interruption, and yields exactly one
//! [`Syscall`] at each suspension point describing what it wants. There is
//! no parallel execution, no persistence across restarts, and no priority
//! or fairness beyond FIFO ordering of the ready queue.
//!
//! [`Scheduler`] is the base: tasks, the ready queue, condition variables,
//! pause/resume, exit-wait propagation. It has no notion of wall-clock time
//! and will panic if a task yields a request that needs one
//! ([`Syscall::WaitDuration`], [`Syscall::CreateRate`],
//! [`Syscall::Sleep`]). [`TimerScheduler`] wraps it and adds a timer heap,
//! `run`, and `timer_step` to service those three requests, driven by a
//! [`Clock`] the host provides.

#![warn(clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

mod clock;
mod condvar;
mod error;
mod rate;
mod scheduler;
mod sync;
mod syscall;
mod task;
mod tid;
mod timer;

pub use clock::{BlockingSleep, Clock, SystemClock, SystemSleep};
pub use condvar::{CondName, CondVar};
pub use error::SchedulerError;
pub use rate::{Rate, RateId};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use sync::SyncScheduler;
pub use syscall::Syscall;
pub use task::{Resume, Step, TaskBody, WaitMode};
pub use tid::Tid;
pub use timer::TimerScheduler;

pub mod testing {
    //! Deterministic test doubles for the host-time interface
    //! ([`crate::Clock`]/[`crate::BlockingSleep`]), for driving a
    //! [`crate::TimerScheduler`] in tests without depending on real elapsed
    //! time.
    pub use crate::clock::testing::*;
}

/// Acknowledgement answering [`Syscall::GetScheduler`].
///
/// The source this design is ported from hands a task a live reference to
/// the scheduler object itself, which a Python generator can freely call
/// back into between its own suspension points. Rust's ownership rules
/// don't allow a `Task`'s boxed computation to hold a live `&mut Scheduler`
/// across its own suspension, the way a generator frame can hold a closed-over
/// reference — so a *stored* handle can't outlive one `resume` call.
///
/// The Design Notes resolve this by having the scheduler "pass itself as a
/// parameter during each resume step" instead of handing out a reference the
/// task could stash: every [`TaskBody::resume`] call already receives a real
/// [`SchedulerHandle`] as an argument, usable for the duration of that call
/// only. `GetScheduler` predates that and is kept because the suspension-request
/// catalogue names it, but answering it is now a formality — `SchedulerAck`
/// carries nothing, since the task already had everything it needed the
/// moment `resume` was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerAck;
