use std::time::{Duration, Instant};

/// Handle to a [`Rate`] created by `CreateRate`, opaque to tasks — the
/// actual `Rate` state lives inside the [`crate::TimerScheduler`] that
/// created it, the same way a `Tid` is an opaque reference into the
/// scheduler's task map rather than the task itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateId(pub(crate) u64);

/// Periodic-loop aide: remembers when it last ticked and computes the
/// remaining slice until the next tick should fire.
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    duration: Duration,
    last_tick_time: Instant,
}

impl Rate {
    pub(crate) fn new(frequency_hz: f64, now: Instant) -> Self {
        assert!(frequency_hz > 0.0, "rate frequency must be positive");
        Self {
            duration: Duration::from_secs_f64(1.0 / frequency_hz),
            last_tick_time: now,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn last_tick_time(&self) -> Instant {
        self.last_tick_time
    }

    /// Computes how long is left until the next tick is due, as of `now`.
    /// Positive means there's time left to sleep; non-positive means the
    /// rate has already overrun and should fire immediately.
    pub(crate) fn remaining(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_tick_time);
        self.duration.as_secs_f64() - elapsed.as_secs_f64()
    }

    /// Records that a tick just happened at `fire_time`. Does not attempt to
    /// recover phase after an overrun — the next `remaining` call simply
    /// measures from here.
    pub(crate) fn record_tick(&mut self, fire_time: Instant) {
        self.last_tick_time = fire_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_is_positive_before_duration_elapses() {
        let now = Instant::now();
        let rate = Rate::new(10.0, now);
        let delta = rate.remaining(now + Duration::from_millis(50));
        assert!(delta > 0.0, "expected positive remaining slice, got {delta}");
    }

    #[test]
    fn remaining_is_non_positive_after_overrun() {
        let now = Instant::now();
        let rate = Rate::new(10.0, now);
        let delta = rate.remaining(now + Duration::from_millis(150));
        assert!(delta <= 0.0, "expected overrun to be non-positive, got {delta}");
    }

    #[test]
    fn record_tick_resets_the_window_without_accumulating_drift() {
        let t0 = Instant::now();
        let mut rate = Rate::new(10.0, t0);
        let fire_time = t0 + Duration::from_millis(150); // 50ms overrun
        rate.record_tick(fire_time);
        // The next window measures from the actual fire time, not from
        // where the overrun "should" have ended, so phase is not chased.
        let delta = rate.remaining(fire_time + Duration::from_millis(100));
        assert!(delta > 0.0);
    }
}
