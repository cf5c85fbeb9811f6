//! Thread-per-job scheduler
//!
//! Every job gets its own OS thread that drives the callback on the tokio
//! runtime it was created in. Recurring threads sleep on a condvar so that
//! removal wakes them immediately instead of waiting out the interval.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;

use super::{JobCallback, JobScheduler, parse_schedule, until_next};
use crate::error::{GeneratorError, Result};

/// Stop flag shared between the scheduler and one recurring thread
#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cv.notify_all();
    }

    /// Sleep up to `timeout`. Returns true if stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

struct RecurringThread {
    cron: String,
    signal: Arc<StopSignal>,
}

/// OS-thread-backed job scheduler
pub struct ThreadJobScheduler {
    runtime: Handle,
    recurring: Mutex<HashMap<String, RecurringThread>>,
}

impl ThreadJobScheduler {
    /// Bind to the current tokio runtime
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| GeneratorError::Scheduler(format!("no tokio runtime: {}", e)))?;
        Ok(Self::with_runtime(runtime))
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime,
            recurring: Mutex::new(HashMap::new()),
        }
    }

    fn registrations(&self) -> MutexGuard<'_, HashMap<String, RecurringThread>> {
        self.recurring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn<F>(&self, name: String, body: F) -> Result<()>
    where
        F: FnOnce(Handle) + Send + 'static,
    {
        let runtime = self.runtime.clone();
        thread::Builder::new().name(name).spawn(move || body(runtime))?;
        Ok(())
    }

    /// Cron expression registered under `job_id`
    pub fn recurring_cron(&self, job_id: &str) -> Option<String> {
        self.registrations().get(job_id).map(|r| r.cron.clone())
    }
}

impl JobScheduler for ThreadJobScheduler {
    fn schedule_immediate(&self, job: JobCallback) -> Result<()> {
        self.spawn("revgen-immediate".to_string(), move |runtime| {
            runtime.block_on(job());
        })
    }

    fn schedule_delayed(&self, queue: &str, job: JobCallback, delay: Duration) -> Result<()> {
        self.spawn(format!("revgen-{}", queue), move |runtime| {
            thread::sleep(delay);
            runtime.block_on(job());
        })
    }

    fn schedule_recurring(&self, job_id: &str, job: JobCallback, cron: &str) -> Result<()> {
        let schedule = parse_schedule(cron)?;
        let signal = Arc::new(StopSignal::default());

        let mut registrations = self.registrations();
        let thread_signal = signal.clone();
        let id = job_id.to_string();
        self.spawn(format!("revgen-recurring-{}", job_id), move |runtime| {
            while let Some(wait) = until_next(&schedule, Utc::now()) {
                if thread_signal.wait(wait) {
                    break;
                }
                runtime.block_on(job());
            }
            tracing::debug!(job_id = %id, "Recurring thread exiting");
        })?;

        // The old thread stops only once its replacement is running
        let previous = registrations.insert(
            job_id.to_string(),
            RecurringThread {
                cron: cron.to_string(),
                signal,
            },
        );
        if let Some(previous) = previous {
            previous.signal.stop();
        }
        tracing::info!(job_id = job_id, cron = cron, "Recurring thread registered");
        Ok(())
    }

    /// Signals the thread and returns without joining it; a callback already
    /// in flight finishes on its own.
    fn remove_if_exists(&self, job_id: &str) {
        if let Some(registration) = self.registrations().remove(job_id) {
            registration.signal.stop();
            tracing::info!(job_id = job_id, "Recurring thread removed");
        }
    }

    fn has_recurring(&self, job_id: &str) -> bool {
        self.registrations().contains_key(job_id)
    }
}

impl Drop for ThreadJobScheduler {
    fn drop(&mut self) {
        for (_, registration) in self.registrations().drain() {
            registration.signal.stop();
        }
    }
}
