//! Tokio-backed [`Scheduler`]: one spawned task per scheduled entry.
//!
//! `@every` entries tick on the monotonic clock; cron entries sleep until
//! the next wall-clock occurrence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use mqttrules_domain::recurrence::Recurrence;
use mqttrules_domain::time;

use crate::ports::{ScheduleCallback, ScheduleHandle, Scheduler};

/// Runs scheduled callbacks on a tokio runtime.
pub struct TokioScheduler {
    runtime: Handle,
    next: AtomicU64,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl TokioScheduler {
    /// Spawn entries on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of entries not yet cancelled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, recurrence: Recurrence, callback: ScheduleCallback) -> ScheduleHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(schedule = %recurrence, id, "schedule installed");
        let task = self.runtime.spawn(fire_loop(recurrence, callback));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        ScheduleHandle::new(id)
    }

    fn cancel(&self, handle: ScheduleHandle) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id());
        if let Some(task) = task {
            task.abort();
            tracing::debug!(%handle, "schedule cancelled");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

async fn fire_loop(recurrence: Recurrence, callback: ScheduleCallback) {
    if let Some(period) = recurrence.interval() {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            callback();
        }
    }

    let mut after = time::now();
    loop {
        let Some(next) = recurrence.next_after(after) else {
            tracing::info!(schedule = %recurrence, "schedule has no further occurrences");
            return;
        };
        tokio::time::sleep(time::until(time::now(), next)).await;
        callback();
        after = next.max(time::now());
    }
}
