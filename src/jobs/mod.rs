//! Job scheduling port
//!
//! The boundary between the generator host and whatever actually runs a
//! callback now, later, or on a cron schedule. Backends:
//! - `QueueJobScheduler`: named tokio queues with fixed worker pools
//! - `ThreadJobScheduler`: one OS thread per job, interruptible recurring sleep
//! - `RecordingJobScheduler`: records calls and keeps callbacks for tests
//!   (`test-util` feature)
//!
//! A process picks exactly one backend; the host only sees this trait.

mod queue;
#[cfg(any(test, feature = "test-util"))]
mod recording;
mod thread;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;

use crate::error::{GeneratorError, Result};

pub use queue::QueueJobScheduler;
#[cfg(any(test, feature = "test-util"))]
pub use recording::{JobCall, RecordingJobScheduler};
pub use thread::ThreadJobScheduler;

/// A repeatable unit of scheduled work.
///
/// Recurring registrations invoke the same callback many times, so it is a
/// factory of futures rather than a single future.
pub type JobCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a `JobCallback`
pub fn job<F, Fut>(f: F) -> JobCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as BoxFuture<'static, ()>)
}

/// Fire-and-forget scheduling operations.
///
/// `Ok(())` means the job was accepted, not that it ran.
pub trait JobScheduler: Send + Sync {
    /// Run `job` at the earliest opportunity, asynchronously to the caller
    fn schedule_immediate(&self, job: JobCallback) -> Result<()>;

    /// Run `job` no earlier than `delay` from now on the `queue` lane
    fn schedule_delayed(&self, queue: &str, job: JobCallback, delay: Duration) -> Result<()>;

    /// Register `job` under `job_id` to fire per `cron`.
    ///
    /// An existing registration with the same id is removed first, then the
    /// new one is added.
    fn schedule_recurring(&self, job_id: &str, job: JobCallback, cron: &str) -> Result<()>;

    /// Cancel a recurring registration; no-op if absent
    fn remove_if_exists(&self, job_id: &str);

    /// Whether a recurring registration exists for `job_id`
    fn has_recurring(&self, job_id: &str) -> bool;
}

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires `sec min hour day-of-month month day-of-week [year]`;
/// callers use standard 5-field cron starting at minutes.
pub fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse a 5, 6 or 7 field cron expression
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(&normalize_cron(expression)).map_err(|e| GeneratorError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Time until the next occurrence strictly after `now`, or None if the
/// schedule has no further occurrences.
pub(crate) fn until_next(schedule: &Schedule, now: DateTime<Utc>) -> Option<Duration> {
    let next = schedule.after(&now).next()?;
    Some((next - now).to_std().unwrap_or(Duration::ZERO))
}
