//! Scheduler port: recurring callbacks keyed to a [`Recurrence`].

use std::fmt;

use mqttrules_domain::recurrence::Recurrence;

/// Callback run on every fire. It must not touch agent state directly;
/// it should only enqueue work for the dispatcher.
pub type ScheduleCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Opaque handle to a scheduled entry, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleHandle(u64);

impl ScheduleHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScheduleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schedule#{}", self.0)
    }
}

/// Installs and cancels recurring callbacks.
pub trait Scheduler: Send + Sync {
    /// Run `callback` on every fire of `recurrence` until cancelled.
    fn schedule(&self, recurrence: Recurrence, callback: ScheduleCallback) -> ScheduleHandle;

    /// Stop future fires of `handle`. Unknown handles are ignored.
    fn cancel(&self, handle: ScheduleHandle);
}

impl<S: Scheduler> Scheduler for std::sync::Arc<S> {
    fn schedule(&self, recurrence: Recurrence, callback: ScheduleCallback) -> ScheduleHandle {
        (**self).schedule(recurrence, callback)
    }

    fn cancel(&self, handle: ScheduleHandle) {
        (**self).cancel(handle);
    }
}
