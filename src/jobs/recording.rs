//! In-memory scheduler for tests
//!
//! Records every call in order and keeps the callbacks so a test can run
//! them when it chooses. Nothing executes on its own.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{JobCallback, JobScheduler, parse_schedule};
use crate::error::{GeneratorError, Result};

/// One call made against the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCall {
    Immediate,
    Delayed { queue: String, delay: Duration },
    Recurring { job_id: String, cron: String },
    Remove { job_id: String },
}

#[derive(Default)]
struct Recorded {
    calls: Vec<JobCall>,
    pending: Vec<JobCallback>,
    recurring: HashMap<String, (String, JobCallback)>,
    failure: Option<String>,
}

/// Scheduler that records instead of running
#[derive(Default)]
pub struct RecordingJobScheduler {
    inner: Mutex<Recorded>,
}

impl RecordingJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following schedule call fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        self.state().failure = Some(message.into());
    }

    fn check_failure(&self) -> Result<()> {
        match &self.state().failure {
            Some(message) => Err(GeneratorError::Scheduler(message.clone())),
            None => Ok(()),
        }
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<JobCall> {
        self.state().calls.clone()
    }

    /// Number of `remove_if_exists` calls for `job_id`
    pub fn removals(&self, job_id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, JobCall::Remove { job_id: id } if id == job_id))
            .count()
    }

    /// Number of one-shot jobs waiting to run
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Run and discard every queued one-shot job. Returns how many ran.
    pub async fn run_pending(&self) -> usize {
        let jobs = std::mem::take(&mut self.state().pending);
        let count = jobs.len();
        for job in jobs {
            job().await;
        }
        count
    }

    /// Invoke the recurring callback registered as `job_id` once
    pub async fn fire_recurring(&self, job_id: &str) -> bool {
        let job = self.state().recurring.get(job_id).map(|(_, job)| job.clone());
        match job {
            Some(job) => {
                job().await;
                true
            }
            None => false,
        }
    }

    /// Cron expression registered under `job_id`
    pub fn recurring_cron(&self, job_id: &str) -> Option<String> {
        self.state().recurring.get(job_id).map(|(cron, _)| cron.clone())
    }
}

impl JobScheduler for RecordingJobScheduler {
    fn schedule_immediate(&self, job: JobCallback) -> Result<()> {
        self.check_failure()?;
        let mut state = self.state();
        state.calls.push(JobCall::Immediate);
        state.pending.push(job);
        Ok(())
    }

    fn schedule_delayed(&self, queue: &str, job: JobCallback, delay: Duration) -> Result<()> {
        self.check_failure()?;
        let mut state = self.state();
        state.calls.push(JobCall::Delayed {
            queue: queue.to_string(),
            delay,
        });
        state.pending.push(job);
        Ok(())
    }

    fn schedule_recurring(&self, job_id: &str, job: JobCallback, cron: &str) -> Result<()> {
        self.check_failure()?;
        parse_schedule(cron)?;
        let mut state = self.state();
        state.calls.push(JobCall::Recurring {
            job_id: job_id.to_string(),
            cron: cron.to_string(),
        });
        state
            .recurring
            .insert(job_id.to_string(), (cron.to_string(), job));
        Ok(())
    }

    fn remove_if_exists(&self, job_id: &str) {
        let mut state = self.state();
        state.calls.push(JobCall::Remove {
            job_id: job_id.to_string(),
        });
        state.recurring.remove(job_id);
    }

    fn has_recurring(&self, job_id: &str) -> bool {
        self.state().recurring.contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> JobCallback {
        let counter = counter.clone();
        job(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn test_records_in_order_and_runs_pending() {
        let scheduler = RecordingJobScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_immediate(counting(&counter)).unwrap();
        scheduler
            .schedule_delayed("delayed", counting(&counter), Duration::from_secs(5))
            .unwrap();

        assert_eq!(
            scheduler.calls(),
            vec![
                JobCall::Immediate,
                JobCall::Delayed {
                    queue: "delayed".into(),
                    delay: Duration::from_secs(5)
                }
            ]
        );
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.run_pending().await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_recurring_fire_and_remove() {
        let scheduler = RecordingJobScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule_recurring("9", counting(&counter), "*/15 * * * *")
            .unwrap();
        assert!(scheduler.fire_recurring("9").await);
        assert!(scheduler.fire_recurring("9").await);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        scheduler.remove_if_exists("9");
        assert!(!scheduler.has_recurring("9"));
        assert!(!scheduler.fire_recurring("9").await);
        assert_eq!(scheduler.removals("9"), 1);
    }

    #[test]
    fn test_fail_with() {
        let scheduler = RecordingJobScheduler::new();
        scheduler.fail_with("backend down");
        let err = scheduler
            .schedule_immediate(job(|| async {}))
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Scheduler(_)));
        assert!(scheduler.calls().is_empty());
    }

    #[test]
    fn test_recurring_rejects_bad_cron() {
        let scheduler = RecordingJobScheduler::new();
        assert!(scheduler
            .schedule_recurring("1", job(|| async {}), "bogus")
            .is_err());
        assert!(!scheduler.has_recurring("1"));
    }
}
