use std::time::{Duration, Instant};

/// The host-time interface the timer-driven scheduler consumes: a source of
/// monotonic-enough wall time. The core never calls `Instant::now()`
/// directly so that tests can drive it with a fake clock instead of
/// depending on real elapsed time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// A `Clock` backed by `std::time::Instant`, for hosts that just want real
/// wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// The other half of the host-time interface: a way to actually wait for
/// wall-clock time to pass. Only used by [`crate::TimerScheduler::run`];
/// hosts that drive their own main loop and call
/// [`crate::TimerScheduler::timer_step`] instead never need this.
pub trait BlockingSleep {
    fn sleep(&self, duration: Duration);
}

/// A `BlockingSleep` backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSleep;

impl BlockingSleep for SystemSleep {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic test doubles for [`Clock`] and [`BlockingSleep`].
///
/// `std::time::Instant` cannot be manufactured at an arbitrary point, only
/// read from `Instant::now()` or advanced by adding a `Duration`, so
/// `VirtualClock` fixes a base instant at construction and tracks an
/// explicit offset that tests advance by hand — no real time ever passes.
pub mod testing {
    use super::{BlockingSleep, Clock};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    #[derive(Debug)]
    pub struct VirtualClock {
        base: Instant,
        offset: Cell<Duration>,
    }

    impl VirtualClock {
        #[must_use]
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Cell::new(Duration::ZERO),
            }
        }

        /// Moves the clock forward by `by`. Never moves it backward, since
        /// the scheduler's min-heap assumes monotonic time.
        pub fn advance(&self, by: Duration) {
            self.offset.set(self.offset.get() + by);
        }
    }

    impl Default for VirtualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for VirtualClock {
        fn now(&self) -> Instant {
            self.base + self.offset.get()
        }
    }

    /// A `BlockingSleep` that just advances the paired `VirtualClock`
    /// instead of actually blocking the test thread.
    #[derive(Debug)]
    pub struct AdvanceVirtualClock<'a>(pub &'a VirtualClock);

    impl BlockingSleep for AdvanceVirtualClock<'_> {
        fn sleep(&self, duration: Duration) {
            self.0.advance(duration);
        }
    }

    /// `Rc<VirtualClock>` implements both halves of the host-time
    /// interface, so a test can hand one clone to a `TimerScheduler` (as its
    /// `Clock`) and keep another clone around to drive as the
    /// `BlockingSleep` passed to `run`, without fighting the borrow checker
    /// over a single borrowed `&VirtualClock`.
    impl Clock for Rc<VirtualClock> {
        fn now(&self) -> Instant {
            VirtualClock::now(self)
        }
    }

    impl BlockingSleep for Rc<VirtualClock> {
        fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }
    }
}
