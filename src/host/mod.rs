//! Generator host
//!
//! Owns the reviewer registry and every piece of scheduled work derived from
//! it. A single async mutex per host guards the registry, the running-flag
//! toggles, worker handles, and each emission.

mod generator;
mod worker;

use std::time::Duration;

use crate::domain::ReviewerId;

pub use generator::GeneratorHost;

/// Host settings
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Lane delayed dispatches are routed to
    pub delayed_queue: String,
    /// Pause between iterations of a started reviewer
    pub worker_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            delayed_queue: "delayed".to_string(),
            worker_interval: Duration::from_secs(5),
        }
    }
}

impl HostConfig {
    pub fn with_worker_interval(mut self, interval: Duration) -> Self {
        self.worker_interval = interval;
        self
    }
}

/// Sent by a continuous worker when it leaves its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    Exited { reviewer_id: ReviewerId, epoch: u64 },
}
