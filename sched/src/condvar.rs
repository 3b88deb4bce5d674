use std::fmt;
use std::sync::{Arc, Mutex};

use crate::scheduler::Scheduler;

/// The name a condition variable is registered under in the scheduler's
/// condition-wait map. Cheap to clone; several `(predicate, task)` entries
/// and several `CondVar`s may share one name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CondName(Arc<str>);

impl CondName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }
}

impl From<&str> for CondName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CondName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for CondName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named storage cell of a scalar value, owned by whoever builds the
/// mission (typically alongside the scheduler), whose writes wake tasks
/// blocked in `WaitCondition`.
///
/// The original source implements condition variables as attribute
/// descriptors on a `Scheduler` subclass, so that `sched.energy_level = 5`
/// transparently notifies waiters. Rust has no transparent attribute
/// interception, so per the Design Notes this is explicit: `get()`/`set()`
/// methods, with `set()` calling [`Scheduler::notify`] itself.
///
/// Backed by a `Mutex` rather than a `RefCell`: a predicate closure
/// registered with `WaitCondition` captures its `CondVar`s by `Arc` and may
/// be called from inside [`Scheduler::notify`] regardless of which thread
/// last wrote the value, and a [`crate::SyncScheduler`] host may write a
/// `CondVar` from a thread other than the one driving the scheduler's `run`
/// loop (§5) — both need `CondVar` to be `Sync`, which `RefCell` never is.
pub struct CondVar<T> {
    name: CondName,
    value: Mutex<T>,
}

impl<T: Clone> CondVar<T> {
    pub fn new(name: impl Into<CondName>, initial: T) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(initial),
        }
    }

    pub fn name(&self) -> &CondName {
        &self.name
    }

    pub fn get(&self) -> T {
        self.value
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Updates the value and wakes every task whose predicate references
    /// this name and now evaluates true. Writing the same value still
    /// counts as a write and still triggers re-evaluation.
    pub fn set(&self, scheduler: &mut Scheduler, new_value: T) {
        *self
            .value
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = new_value;
        scheduler.notify(&self.name);
    }
}
