//! A toy mission for an underwater probe, showing how a host wires up
//! `mission-sched`: a main task drives a survey path while two background
//! tasks run alongside it (depth control, a timed battery-low trip), then
//! a second, smaller mission shows a condition variable woken by a host
//! loop driving the scheduler by hand instead of through `run`.
//!
//! This mirrors the shape of the mission this scheduler was designed for
//! (navigate to a site, deploy instruments, run supervisory loops
//! concurrently, tear them down once the main path finishes or a monitor
//! trips) without being a literal port of any particular script: mission
//! code is a consumer of the library, not something the library specifies.
//!
//! Task closures capture `Arc`/`Mutex` rather than `Rc`/`Cell`: `TaskBody`
//! requires `Send` (see `mission_sched`'s docs on why), which an `Rc`
//! capture would violate.

use std::sync::{Arc, Mutex};

use mission_sched::{CondVar, Resume, Scheduler, SchedulerHandle, Step, Syscall, SystemClock, SystemSleep, Tid, TimerScheduler};

/// Depth-hold loop: logs the held depth once a second until killed.
fn depth_control(target_depth_m: f64) -> impl FnMut(SchedulerHandle, Resume) -> Step + Send {
    move |_sched: SchedulerHandle, _value: Resume| {
        log::info!("holding depth {target_depth_m:.1}m");
        Step::Suspend(Syscall::WaitDuration(1.0))
    }
}

/// Simulated battery monitor: ticks down on a fixed timer and, once it has
/// ticked `trips` times, kills every other task and finishes. A real
/// mission would instead gate this on a `CondVar` a sensor-reading thread
/// writes to (see `condition_wake_demo` below and `mission_sched::SyncScheduler`
/// for that pattern) — this version needs nothing but the timer to keep the
/// `TimerScheduler::run` demo self-contained and deterministic.
///
/// Reaching its own TID and tearing down its siblings goes straight through
/// the `SchedulerHandle` passed into this call rather than round-tripping
/// through `GetTid`/`KillAllTasksExcept` suspension requests — both are
/// direct-call methods, so there's nothing to suspend for.
fn battery_monitor(trips: u32) -> impl FnMut(SchedulerHandle, Resume) -> Step + Send {
    let mut remaining = trips;
    move |mut sched: SchedulerHandle, _value: Resume| {
        if remaining > 0 {
            remaining -= 1;
            return Step::Suspend(Syscall::WaitDuration(0.1));
        }
        log::warn!("battery low, requesting shutdown");
        let self_tid = sched.get_current_tid().expect("task is running");
        let killed = sched.kill_all_tasks_except(&[self_tid]);
        log::warn!("shutdown killed {} task(s): {killed:?}", killed.len());
        Step::Done
    }
}

/// The main survey: logs progress through a handful of waypoints, pausing
/// briefly at each, then tears down the background task it spawned.
fn survey(waypoints: usize, depth_tid_slot: Arc<Mutex<Option<Tid>>>) -> impl FnMut(SchedulerHandle, Resume) -> Step + Send {
    let mut leg = 0usize;
    move |mut sched: SchedulerHandle, _value: Resume| {
        if leg == 0 {
            leg += 1;
            log::info!("leaving dock");
            let depth_tid = sched.spawn("depth_control", depth_control(8.0));
            *depth_tid_slot.lock().unwrap() = Some(depth_tid);
            return Step::Suspend(Syscall::WaitDuration(0.05));
        }
        if leg <= waypoints {
            log::info!("leg {leg}/{waypoints} underway");
            leg += 1;
            return Step::Suspend(Syscall::WaitDuration(0.05));
        }
        if let Some(depth_tid) = depth_tid_slot.lock().unwrap().take() {
            log::info!("survey complete, stopping depth control");
            sched.kill_task(depth_tid);
        }
        Step::Done
    }
}

fn main() {
    env_logger::init();

    let mut sched = TimerScheduler::new(SystemClock);
    let depth_tid_slot = Arc::new(Mutex::new(None));

    sched.spawn("survey", survey(4, depth_tid_slot));
    sched.spawn("battery_monitor", battery_monitor(3));

    sched.run(&SystemSleep);
    log::info!("survey mission ended, {} task(s) remain", sched.list_all_tids().len());

    condition_wake_demo();
}

/// Shows the other way a task blocks: `WaitCondition` against a `CondVar`
/// the host writes directly, driving the base (non-timer) `Scheduler` one
/// `step` at a time — the pattern this scheduler uses when the value a
/// task is waiting on comes from something other than a clock (a sensor
/// reading, an external event). See `mission_sched::SyncScheduler` for the
/// thread-safe version of this same loop.
fn condition_wake_demo() {
    let mut sched = Scheduler::new();
    let chlorophyll = Arc::new(CondVar::new("chlorophyll", 0.0f64));
    let chlorophyll_for_task = Arc::clone(&chlorophyll);

    let mut registered = false;
    sched.spawn("bloom_watch", move |_sched: SchedulerHandle, _value: Resume| {
        if !registered {
            registered = true;
            let chlorophyll = Arc::clone(&chlorophyll_for_task);
            return Step::Suspend(Syscall::WaitCondition {
                names: vec![chlorophyll.name().clone()],
                predicate: Box::new(move || chlorophyll.get() > 5.0),
            });
        }
        log::info!("chlorophyll bloom detected, starting dense sample");
        Step::Done
    });
    sched.step();

    let mut reading = 0.0f64;
    while !sched.list_all_tids().is_empty() {
        reading += 1.0;
        chlorophyll.set(&mut sched, reading);
        sched.step();
    }
}
