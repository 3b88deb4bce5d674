use std::sync::{Condvar, Mutex, MutexGuard};

use crate::clock::Clock;
use crate::timer::TimerScheduler;

/// Wraps a [`TimerScheduler`] behind a single mutex plus a condvar signal,
/// for hosts that want to deliver external events — an asynchronous sensor
/// update into a condition variable, an external timer wake-up — from
/// threads other than the one driving the scheduler's `run` loop.
///
/// Per §5: *all* task code still runs under the lock. Other threads never
/// touch a task directly; they only acquire the lock, apply a mutation
/// (typically a [`crate::CondVar::set`] call), and signal, exactly the way
/// [`SyncScheduler::with_locked`] is structured. This buys correctness, not
/// concurrency — the point is a single, deterministic core fed by several
/// event sources, not parallel task execution, which remains out of scope
/// (§1).
///
/// The teacher's kernel solves the analogous problem with a plain
/// `SpinLock` around shared scheduler state (`sched::schedcore::RUN_QUEUE`)
/// since it never blocks a whole CPU waiting for another one; a hosted,
/// potentially-blocking `run` loop needs to actually sleep without spinning,
/// hence `Mutex` + `Condvar` instead of a spinlock here.
pub struct SyncScheduler<C: Clock> {
    state: Mutex<TimerScheduler<C>>,
    signal: Condvar,
}

impl<C: Clock> SyncScheduler<C> {
    pub fn new(clock: C) -> Self {
        Self {
            state: Mutex::new(TimerScheduler::new(clock)),
            signal: Condvar::new(),
        }
    }

    /// Acquires the lock, gives `f` mutable access to the wrapped
    /// scheduler, then wakes anyone blocked in [`SyncScheduler::run`]. Use
    /// this from another thread to, say, call [`crate::CondVar::set`] on a
    /// condition variable the mission's tasks are blocked on.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned, i.e. another thread holding it
    /// panicked while a task was running.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut TimerScheduler<C>) -> R) -> R {
        let mut guard = self.lock();
        let result = f(&mut guard);
        self.signal.notify_all();
        result
    }

    /// Same as [`SyncScheduler::with_locked`], named for the host-timer use
    /// case in §6: a host thread that owns a real timer source calls this
    /// to enqueue the wake-up the core promised to honour.
    pub fn schedule_timer_from_host(&self, f: impl FnOnce(&mut TimerScheduler<C>)) {
        self.with_locked(f);
    }

    fn lock(&self) -> MutexGuard<'_, TimerScheduler<C>> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Drives the scheduler to completion on the calling thread, holding
    /// the lock except while blocked waiting for the next event: either the
    /// earliest pending timer's deadline, or (if there is no pending timer)
    /// a signal from [`SyncScheduler::with_locked`] on another thread.
    ///
    /// Unlike [`TimerScheduler::run`], which sleeps unconditionally for the
    /// full gap until the next deadline, this wakes early whenever another
    /// thread delivers an event, so an out-of-band condition-variable write
    /// or host timer callback is observed as soon as it happens rather than
    /// only at the next scheduled deadline.
    pub fn run(&self) {
        let mut guard = self.lock();
        loop {
            guard.step();
            let deadline = guard.next_deadline();
            if deadline.is_none() && !guard.has_outstanding_work() {
                break;
            }
            guard = match deadline {
                None => self.signal.wait(guard).unwrap_or_else(|poisoned| {
                    let (guard, _) = poisoned.into_parts();
                    guard
                }),
                Some(deadline) => {
                    let now = guard.current_time();
                    let wait = deadline.saturating_duration_since(now);
                    let (guard, _timeout) = self
                        .signal
                        .wait_timeout(guard, wait)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    guard
                }
            };
            guard.timer_step();
        }
    }

    /// Runs one non-blocking pass: fires due timers and drains the ready
    /// queue, without ever waiting on the condvar. For a host that polls
    /// the scheduler from its own already-running loop instead of handing
    /// this thread over to [`SyncScheduler::run`].
    pub fn timer_step(&self) {
        self.with_locked(TimerScheduler::timer_step);
    }
}
