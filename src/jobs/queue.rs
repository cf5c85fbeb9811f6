//! Named tokio queues
//!
//! Each queue is an unbounded channel drained by a fixed pool of worker
//! tasks. Delayed jobs sleep on their own task and are then pushed onto the
//! requested queue. Recurring registrations are tasks that wake at each cron
//! occurrence and push onto the default queue.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{JobCallback, JobScheduler, parse_schedule, until_next};
use crate::error::{GeneratorError, Result};

struct Lane {
    tx: mpsc::UnboundedSender<JobCallback>,
    workers: Vec<JoinHandle<()>>,
}

struct RecurringRegistration {
    cron: String,
    handle: JoinHandle<()>,
}

/// Queue-backed job scheduler
pub struct QueueJobScheduler {
    runtime: Handle,
    lanes: HashMap<String, Lane>,
    default_queue: String,
    recurring: Mutex<HashMap<String, RecurringRegistration>>,
}

impl QueueJobScheduler {
    /// Start worker pools for every queue in `queues` (name -> worker count).
    ///
    /// Must be called from within a tokio runtime. `default_queue` has to be
    /// one of the configured queues.
    pub fn new(default_queue: &str, queues: &BTreeMap<String, usize>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| GeneratorError::Scheduler(format!("no tokio runtime: {}", e)))?;

        if !queues.contains_key(default_queue) {
            return Err(GeneratorError::Scheduler(format!(
                "default queue '{}' is not configured",
                default_queue
            )));
        }

        let mut lanes = HashMap::new();
        for (name, &count) in queues {
            if count == 0 {
                return Err(GeneratorError::Scheduler(format!(
                    "queue '{}' needs at least one worker",
                    name
                )));
            }
            lanes.insert(name.clone(), Self::spawn_lane(&runtime, name, count));
        }

        tracing::info!(
            default_queue = default_queue,
            queues = queues.len(),
            "Queue job scheduler started"
        );

        Ok(Self {
            runtime,
            lanes,
            default_queue: default_queue.to_string(),
            recurring: Mutex::new(HashMap::new()),
        })
    }

    fn spawn_lane(runtime: &Handle, name: &str, count: usize) -> Lane {
        let (tx, rx) = mpsc::unbounded_channel::<JobCallback>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..count)
            .map(|worker| {
                let rx = rx.clone();
                let queue = name.to_string();
                runtime.spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(job) = next else {
                            break;
                        };
                        // Run on its own task so a panicking job doesn't take the worker down
                        if let Err(e) = tokio::spawn(job()).await {
                            tracing::warn!(queue = %queue, worker, error = %e, "Job panicked");
                        }
                    }
                    tracing::debug!(queue = %queue, worker, "Queue worker exiting");
                })
            })
            .collect();

        Lane { tx, workers }
    }

    fn lane(&self, queue: &str) -> Result<&Lane> {
        if let Some(lane) = self.lanes.get(queue) {
            return Ok(lane);
        }
        tracing::warn!(queue = queue, fallback = %self.default_queue, "Unknown queue, using default");
        self.lanes.get(&self.default_queue).ok_or_else(|| {
            GeneratorError::Scheduler(format!("default queue '{}' missing", self.default_queue))
        })
    }

    fn registrations(&self) -> MutexGuard<'_, HashMap<String, RecurringRegistration>> {
        self.recurring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cron expression registered under `job_id`
    pub fn recurring_cron(&self, job_id: &str) -> Option<String> {
        self.registrations().get(job_id).map(|r| r.cron.clone())
    }

    /// Names of the configured queues
    pub fn queue_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.lanes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl JobScheduler for QueueJobScheduler {
    fn schedule_immediate(&self, job: JobCallback) -> Result<()> {
        let lane = self.lane(&self.default_queue)?;
        lane.tx
            .send(job)
            .map_err(|_| GeneratorError::Scheduler("default queue is closed".to_string()))
    }

    fn schedule_delayed(&self, queue: &str, job: JobCallback, delay: Duration) -> Result<()> {
        let tx = self.lane(queue)?.tx.clone();
        let queue = queue.to_string();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).is_err() {
                tracing::warn!(queue = %queue, "Queue closed before delayed job was due");
            }
        });
        Ok(())
    }

    fn schedule_recurring(&self, job_id: &str, job: JobCallback, cron: &str) -> Result<()> {
        let schedule = parse_schedule(cron)?;
        let tx = self.lane(&self.default_queue)?.tx.clone();

        let mut registrations = self.registrations();
        let id = job_id.to_string();
        let handle = self.runtime.spawn(async move {
            while let Some(wait) = until_next(&schedule, Utc::now()) {
                tokio::time::sleep(wait).await;
                if tx.send(job.clone()).is_err() {
                    break;
                }
            }
            tracing::debug!(job_id = %id, "Recurring registration finished");
        });

        let previous = registrations.insert(
            job_id.to_string(),
            RecurringRegistration {
                cron: cron.to_string(),
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        tracing::info!(job_id = job_id, cron = cron, "Recurring job registered");
        Ok(())
    }

    fn remove_if_exists(&self, job_id: &str) {
        if let Some(registration) = self.registrations().remove(job_id) {
            registration.handle.abort();
            tracing::info!(job_id = job_id, "Recurring job removed");
        }
    }

    fn has_recurring(&self, job_id: &str) -> bool {
        self.registrations().contains_key(job_id)
    }
}

impl Drop for QueueJobScheduler {
    fn drop(&mut self) {
        for (_, registration) in self.registrations().drain() {
            registration.handle.abort();
        }
        for lane in self.lanes.values() {
            for worker in &lane.workers {
                worker.abort();
            }
        }
    }
}
