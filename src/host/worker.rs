//! Continuous worker for a started reviewer

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::WorkerEvent;
use super::generator::GeneratorHost;
use crate::domain::ReviewerId;

/// Host-side handle to one worker task
pub(super) struct WorkerHandle {
    pub epoch: u64,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn(
        host: Weak<GeneratorHost>,
        reviewer_id: ReviewerId,
        epoch: u64,
        interval: Duration,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(host, reviewer_id, epoch, interval, stop_rx, events));
        Self { epoch, stop, task }
    }

    /// Ask the worker to leave its loop. Does not wait.
    pub fn signal_stop(&self) {
        // Err only means the worker already exited
        let _ = self.stop.send(true);
    }

    /// Wait for the worker task to finish
    pub async fn join(self, reviewer_id: ReviewerId) {
        if let Err(e) = self.task.await {
            tracing::warn!(reviewer_id, error = %e, "Worker task ended abnormally");
        }
    }
}

/// Emit, then sleep `interval` or until stopped, until the reviewer is gone
/// or a stop arrives.
async fn run(
    host: Weak<GeneratorHost>,
    reviewer_id: ReviewerId,
    epoch: u64,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    tracing::info!(reviewer_id, epoch, "Worker started");

    loop {
        if *stop.borrow_and_update() {
            break;
        }
        let Some(host) = host.upgrade() else {
            break;
        };
        let ran = host.generate_for(reviewer_id).await;
        drop(host);
        if !ran {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            // Fires on a stop request or when the handle was dropped
            _ = stop.changed() => break,
        }
    }

    tracing::info!(reviewer_id, epoch, "Worker exited");
    let _ = events.send(WorkerEvent::Exited { reviewer_id, epoch });
}
