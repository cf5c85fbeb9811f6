//! GeneratorHost: registry, dispatch and reviewer lifecycle

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, mpsc, watch};

use super::worker::WorkerHandle;
use super::{HostConfig, WorkerEvent};
use crate::domain::{
    ExecutionPolicy, GenerateReviewRequest, PolicyKind, Reviewer, ReviewerId, TeacherId,
};
use crate::emission;
use crate::error::{GeneratorError, Result};
use crate::jobs::{self, JobCallback, JobScheduler, parse_schedule};
use crate::registry::ReviewerRegistry;
use crate::store::ReviewStore;

/// Everything the host lock guards
#[derive(Default)]
struct HostState {
    registry: ReviewerRegistry,
    workers: HashMap<ReviewerId, WorkerHandle>,
    /// Reviewers with a live recurring registration
    recurring: HashSet<ReviewerId>,
    next_epoch: u64,
}

impl HostState {
    /// Clear the running flag and signal the worker, if any
    fn request_stop(&mut self, id: ReviewerId) {
        if let Some(reviewer) = self.registry.find_mut(id) {
            reviewer.running = false;
        }
        if let Some(worker) = self.workers.get(&id) {
            worker.signal_stop();
        }
    }
}

/// Recurring registrations are keyed by the reviewer id
fn job_id(id: ReviewerId) -> String {
    id.to_string()
}

/// Scheduling facade over the reviewer registry
pub struct GeneratorHost {
    this: Weak<GeneratorHost>,
    state: Mutex<HostState>,
    store: Arc<dyn ReviewStore>,
    jobs: Arc<dyn JobScheduler>,
    config: HostConfig,
    events: mpsc::UnboundedSender<WorkerEvent>,
    /// Count of scheduled callbacks that have finished
    completed: watch::Sender<u64>,
}

impl std::fmt::Debug for GeneratorHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorHost")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GeneratorHost {
    /// Load the registry from the store and start the worker reaper.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn load(
        store: Arc<dyn ReviewStore>,
        jobs: Arc<dyn JobScheduler>,
        config: HostConfig,
    ) -> Result<Arc<Self>> {
        let reviewers = store.list_reviewers_with_teachers().await?;
        let registry: ReviewerRegistry = reviewers.into_iter().collect();
        tracing::info!(reviewers = registry.len(), "Reviewer registry loaded");

        let (events, event_rx) = mpsc::unbounded_channel();
        let host = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            state: Mutex::new(HostState {
                registry,
                ..HostState::default()
            }),
            store,
            jobs,
            config,
            events,
            completed: watch::Sender::new(0),
        });

        tokio::spawn(reap_workers(Arc::downgrade(&host), event_rx));
        Ok(host)
    }

    /// Callback handed to the job scheduler. Holds only a weak reference, so
    /// pending jobs never keep the host alive.
    fn callback(&self, id: ReviewerId) -> JobCallback {
        let host = self.this.clone();
        jobs::job(move || {
            let host = host.clone();
            async move {
                match host.upgrade() {
                    Some(host) => {
                        host.generate_for(id).await;
                        host.completed.send_modify(|n| *n += 1);
                    }
                    None => tracing::debug!(reviewer_id = id, "Host gone, scheduled job dropped"),
                }
            }
        })
    }

    /// Watch the number of finished scheduled callbacks. Worker iterations
    /// are not counted.
    pub fn completed_jobs(&self) -> watch::Receiver<u64> {
        self.completed.subscribe()
    }

    /// Register a new reviewer in the stopped state. Returns false if the id
    /// is already registered.
    pub async fn create_reviewer(&self, mut reviewer: Reviewer) -> Result<bool> {
        reviewer.validate()?;
        reviewer.running = false;
        let id = reviewer.id;

        let mut state = self.state.lock().await;
        if !state.registry.add(reviewer) {
            tracing::warn!(reviewer_id = id, "Reviewer already registered");
            return Ok(false);
        }
        tracing::info!(reviewer_id = id, "Reviewer created");
        Ok(true)
    }

    /// Remove a reviewer and everything scheduled for it. Unknown ids count
    /// as already deleted.
    ///
    /// Any recurring registration is removed before the registry entry, and
    /// a running worker is joined before this returns.
    pub async fn delete_reviewer(&self, id: ReviewerId) -> bool {
        let worker = {
            let mut state = self.state.lock().await;
            let Some(reviewer) = state.registry.find(id) else {
                tracing::debug!(reviewer_id = id, "Delete of unknown reviewer");
                return true;
            };

            if reviewer.policy.is_recurring() || state.recurring.contains(&id) {
                self.jobs.remove_if_exists(&job_id(id));
                state.recurring.remove(&id);
                if let Err(e) = self.store.delete_recurring_job(&job_id(id)).await {
                    tracing::warn!(reviewer_id = id, error = %e, "Failed to delete recurring job row");
                }
            }

            state.registry.remove(id);
            let worker = state.workers.remove(&id);
            if let Some(worker) = &worker {
                worker.signal_stop();
            }
            worker
        };

        // Outside the lock: the worker may be waiting on it
        if let Some(worker) = worker {
            worker.join(id).await;
        }

        tracing::info!(reviewer_id = id, "Reviewer deleted");
        true
    }

    /// Dispatch one generation request by its policy kind.
    ///
    /// The reviewer must be registered and the request must carry the
    /// parameter its kind needs; both are checked before the scheduler sees
    /// anything.
    pub async fn generate_review(&self, request: &GenerateReviewRequest) -> Result<()> {
        let id = request.reviewer_id;
        let mut state = self.state.lock().await;
        if !state.registry.contains(id) {
            return Err(GeneratorError::ReviewerNotFound(id));
        }

        match request.kind {
            PolicyKind::Immediate => {
                self.jobs.schedule_immediate(self.callback(id))?;
            }
            PolicyKind::Delayed => {
                let delay = request.delay.ok_or(GeneratorError::MissingParameter {
                    policy: PolicyKind::Delayed,
                    parameter: "delay",
                })?;
                self.jobs
                    .schedule_delayed(&self.config.delayed_queue, self.callback(id), delay)?;
            }
            PolicyKind::Recurring => {
                let cron = request
                    .cron
                    .as_deref()
                    .ok_or(GeneratorError::MissingParameter {
                        policy: PolicyKind::Recurring,
                        parameter: "cron",
                    })?;
                self.jobs
                    .schedule_recurring(&job_id(id), self.callback(id), cron)?;
                state.recurring.insert(id);
                if let Err(e) = self.store.save_recurring_job(&job_id(id), id, cron).await {
                    tracing::warn!(reviewer_id = id, error = %e, "Recurring job registered but not persisted");
                }
            }
        }

        tracing::info!(reviewer_id = id, kind = %request.kind, "Review generation dispatched");
        Ok(())
    }

    /// Scheduled-callback form of generation.
    ///
    /// A reviewer deleted since scheduling is a silent no-op. Returns true if
    /// the emission routine ran.
    pub async fn generate_for(&self, id: ReviewerId) -> bool {
        let state = self.state.lock().await;
        let Some(reviewer) = state.registry.find(id) else {
            tracing::debug!(reviewer_id = id, "Reviewer gone, generation skipped");
            return false;
        };
        emission::emit_review(reviewer, self.store.as_ref()).await;
        true
    }

    /// Start a continuous worker. False if the reviewer is unknown, already
    /// running, or has no teachers.
    pub async fn start_reviewer(&self, id: ReviewerId) -> bool {
        let mut state = self.state.lock().await;
        let Some(reviewer) = state.registry.find_mut(id) else {
            tracing::debug!(reviewer_id = id, "Start of unknown reviewer");
            return false;
        };
        if reviewer.running {
            tracing::debug!(reviewer_id = id, "Reviewer already running");
            return false;
        }
        if !reviewer.can_start() {
            tracing::warn!(reviewer_id = id, "Reviewer has no teachers, not starting");
            return false;
        }
        reviewer.running = true;

        state.next_epoch += 1;
        let worker = WorkerHandle::spawn(
            self.this.clone(),
            id,
            state.next_epoch,
            self.config.worker_interval,
            self.events.clone(),
        );
        // A previous worker still winding down is replaced; its stop sender
        // drops with it, which ends its loop
        state.workers.insert(id, worker);

        tracing::info!(reviewer_id = id, "Reviewer started");
        true
    }

    /// Request a running worker to stop. Does not wait for it. Unknown ids
    /// count as already stopped.
    pub async fn stop_reviewer(&self, id: ReviewerId) -> bool {
        let mut state = self.state.lock().await;
        if !state.registry.contains(id) {
            tracing::debug!(reviewer_id = id, "Stop of unknown reviewer");
            return true;
        }
        state.request_stop(id);
        tracing::info!(reviewer_id = id, "Reviewer stop requested");
        true
    }

    /// Add teachers to a registered reviewer. False if unknown.
    pub async fn assign_teachers(&self, id: ReviewerId, teachers: &[TeacherId]) -> bool {
        let mut state = self.state.lock().await;
        let Some(reviewer) = state.registry.find_mut(id) else {
            return false;
        };
        reviewer.teachers.extend(teachers.iter().copied());
        true
    }

    /// Remove teachers from a registered reviewer. A running reviewer left
    /// without teachers is stopped. False if unknown.
    pub async fn unassign_teachers(&self, id: ReviewerId, teachers: &[TeacherId]) -> bool {
        let mut state = self.state.lock().await;
        let Some(reviewer) = state.registry.find_mut(id) else {
            return false;
        };
        for teacher in teachers {
            reviewer.teachers.remove(teacher);
        }
        if reviewer.running && !reviewer.can_start() {
            tracing::info!(reviewer_id = id, "Last teacher removed, stopping reviewer");
            state.request_stop(id);
        }
        true
    }

    /// Replace a reviewer's policy. False if unknown.
    ///
    /// Leaving `Recurring` drops the live registration; a new cron on a
    /// registered reviewer replaces the schedule.
    pub async fn update_policy(&self, id: ReviewerId, policy: ExecutionPolicy) -> Result<bool> {
        if let ExecutionPolicy::Recurring(cron) = &policy {
            parse_schedule(cron)?;
        }

        let mut state = self.state.lock().await;
        if !state.registry.contains(id) {
            return Ok(false);
        }
        let registered = state.recurring.contains(&id);

        match &policy {
            ExecutionPolicy::Recurring(cron) if registered => {
                self.jobs
                    .schedule_recurring(&job_id(id), self.callback(id), cron)?;
                if let Err(e) = self.store.save_recurring_job(&job_id(id), id, cron).await {
                    tracing::warn!(reviewer_id = id, error = %e, "Failed to persist recurring job row");
                }
            }
            ExecutionPolicy::Recurring(_) => {}
            _ => {
                let was_recurring = state
                    .registry
                    .find(id)
                    .is_some_and(|r| r.policy.is_recurring());
                if registered || was_recurring {
                    self.jobs.remove_if_exists(&job_id(id));
                    state.recurring.remove(&id);
                    if let Err(e) = self.store.delete_recurring_job(&job_id(id)).await {
                        tracing::warn!(reviewer_id = id, error = %e, "Failed to delete recurring job row");
                    }
                }
            }
        }

        if let Some(reviewer) = state.registry.find_mut(id) {
            tracing::info!(reviewer_id = id, from = %reviewer.policy.kind(), to = %policy.kind(), "Policy updated");
            reviewer.policy = policy;
        }
        Ok(true)
    }

    /// Re-register persisted recurring jobs. Rows whose reviewer is no
    /// longer registered are deleted. Returns how many were restored.
    pub async fn restore_recurring_jobs(&self) -> Result<usize> {
        let rows = self.store.list_recurring_jobs().await?;
        let mut state = self.state.lock().await;
        let mut restored = 0;

        for row in rows {
            if !state.registry.contains(row.reviewer_id) {
                tracing::info!(job_id = %row.job_id, reviewer_id = row.reviewer_id, "Dropping recurring job for missing reviewer");
                if let Err(e) = self.store.delete_recurring_job(&row.job_id).await {
                    tracing::warn!(job_id = %row.job_id, error = %e, "Failed to delete stale recurring job row");
                }
                continue;
            }
            match self
                .jobs
                .schedule_recurring(&row.job_id, self.callback(row.reviewer_id), &row.cron)
            {
                Ok(()) => {
                    state.recurring.insert(row.reviewer_id);
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!(job_id = %row.job_id, error = %e, "Failed to restore recurring job");
                }
            }
        }

        tracing::info!(restored, "Recurring jobs restored");
        Ok(restored)
    }

    /// Stop every worker and wait for all of them
    pub async fn shutdown(&self) {
        let workers: Vec<(ReviewerId, WorkerHandle)> = {
            let mut state = self.state.lock().await;
            for reviewer in state.registry.iter_mut() {
                reviewer.running = false;
            }
            state.workers.drain().collect()
        };

        for (_, worker) in &workers {
            worker.signal_stop();
        }
        let count = workers.len();
        for (id, worker) in workers {
            worker.join(id).await;
        }
        tracing::info!(workers = count, "Generator host shut down");
    }

    /// Snapshot of one reviewer
    pub async fn reviewer(&self, id: ReviewerId) -> Option<Reviewer> {
        self.state.lock().await.registry.find(id).cloned()
    }

    /// Snapshot of all reviewers, ordered by id
    pub async fn reviewers(&self) -> Vec<Reviewer> {
        let state = self.state.lock().await;
        let mut reviewers: Vec<Reviewer> = state.registry.iter().cloned().collect();
        reviewers.sort_by_key(|r| r.id);
        reviewers
    }

    pub async fn is_running(&self, id: ReviewerId) -> bool {
        self.state
            .lock()
            .await
            .registry
            .find(id)
            .is_some_and(|r| r.running)
    }

    /// Whether the host holds a live recurring registration for `id`
    pub async fn has_recurring(&self, id: ReviewerId) -> bool {
        self.state.lock().await.recurring.contains(&id)
    }

    /// Worker handles not yet reaped
    pub async fn active_workers(&self) -> usize {
        self.state.lock().await.workers.len()
    }
}

/// Clear worker handles as their tasks exit. A stale epoch means the handle
/// was already replaced by a newer start.
async fn reap_workers(host: Weak<GeneratorHost>, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(host) = host.upgrade() else {
            break;
        };
        match event {
            WorkerEvent::Exited { reviewer_id, epoch } => {
                let mut state = host.state.lock().await;
                let current = state.workers.get(&reviewer_id).map(|w| w.epoch);
                if current == Some(epoch) {
                    state.workers.remove(&reviewer_id);
                    if let Some(reviewer) = state.registry.find_mut(reviewer_id) {
                        reviewer.running = false;
                    }
                    tracing::debug!(reviewer_id, epoch, "Worker handle cleared");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GradeRange, GradeRanges};
    use crate::jobs::{JobCall, RecordingJobScheduler};
    use crate::store::SqliteReviewStore;
    use std::time::Duration;

    struct Fixture {
        host: Arc<GeneratorHost>,
        jobs: Arc<RecordingJobScheduler>,
        store: Arc<SqliteReviewStore>,
        teacher: TeacherId,
    }

    async fn fixture() -> Fixture {
        fixture_with_interval(Duration::from_millis(10)).await
    }

    async fn fixture_with_interval(interval: Duration) -> Fixture {
        let store = Arc::new(SqliteReviewStore::open_in_memory().unwrap());
        let teacher = store.insert_teacher("Ada", "Lovelace").await.unwrap();
        let jobs = Arc::new(RecordingJobScheduler::new());
        let config = HostConfig::default().with_worker_interval(interval);
        let host = GeneratorHost::load(store.clone(), jobs.clone(), config)
            .await
            .unwrap();
        Fixture {
            host,
            jobs,
            store,
            teacher,
        }
    }

    fn reviewer(id: ReviewerId, policy: ExecutionPolicy, teachers: &[TeacherId]) -> Reviewer {
        Reviewer::new(
            id,
            format!("reviewer-{}", id),
            GradeRanges::uniform(GradeRange::new(50, 90).unwrap()),
            policy,
        )
        .with_teachers(teachers.iter().copied())
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn test_load_populates_registry() {
        let store = Arc::new(SqliteReviewStore::open_in_memory().unwrap());
        let teacher = store.insert_teacher("Ada", "Lovelace").await.unwrap();
        let id = store
            .insert_reviewer(&reviewer(0, ExecutionPolicy::Immediate, &[teacher]))
            .await
            .unwrap();

        let host = GeneratorHost::load(store, Arc::new(RecordingJobScheduler::new()), HostConfig::default())
            .await
            .unwrap();

        let loaded = host.reviewer(id).await.unwrap();
        assert!(loaded.teachers.contains(&teacher));
        assert!(!loaded.running);
    }

    #[tokio::test]
    async fn test_create_duplicate_keeps_first() {
        let f = fixture().await;
        assert!(f.host.create_reviewer(reviewer(1, ExecutionPolicy::Immediate, &[])).await.unwrap());

        let mut second = reviewer(1, ExecutionPolicy::Immediate, &[f.teacher]);
        second.name = "impostor".to_string();
        assert!(!f.host.create_reviewer(second).await.unwrap());

        let kept = f.host.reviewer(1).await.unwrap();
        assert_eq!(kept.name, "reviewer-1");
        assert!(kept.teachers.is_empty());
        assert_eq!(f.host.reviewers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid() {
        let f = fixture().await;
        let bad = reviewer(1, ExecutionPolicy::Recurring("nope".into()), &[]);
        assert!(f.host.create_reviewer(bad).await.is_err());
        assert!(f.host.reviewer(1).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_creates_one_wins() {
        let f = fixture().await;
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let host = f.host.clone();
            tasks.push(tokio::spawn(async move {
                host.create_reviewer(reviewer(5, ExecutionPolicy::Immediate, &[])).await.unwrap()
            }));
        }
        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(2, ExecutionPolicy::Immediate, &[])).await.unwrap();
        assert!(f.host.delete_reviewer(2).await);
        assert!(f.host.reviewer(2).await.is_none());
        assert!(f.host.delete_reviewer(2).await);
        assert!(f.host.delete_reviewer(404).await);
    }

    #[tokio::test]
    async fn test_delete_non_recurring_never_removes() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(4, ExecutionPolicy::Immediate, &[])).await.unwrap();
        f.host.delete_reviewer(4).await;
        assert_eq!(f.jobs.removals("4"), 0);
    }

    #[tokio::test]
    async fn test_delete_recurring_removes_registration() {
        let f = fixture().await;
        let cron = "*/15 * * * *";
        f.host
            .create_reviewer(reviewer(3, ExecutionPolicy::Recurring(cron.into()), &[f.teacher]))
            .await
            .unwrap();
        f.host
            .generate_review(&GenerateReviewRequest::recurring(3, cron))
            .await
            .unwrap();
        assert!(f.jobs.has_recurring("3"));
        assert_eq!(f.store.list_recurring_jobs().await.unwrap().len(), 1);

        assert!(f.host.delete_reviewer(3).await);
        assert!(!f.jobs.has_recurring("3"));
        assert_eq!(f.jobs.removals("3"), 1);
        assert!(!f.host.has_recurring(3).await);
        assert!(f.store.list_recurring_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recurring_dispatch_on_immediate_reviewer_not_orphaned() {
        let f = fixture().await;
        f.host
            .create_reviewer(reviewer(6, ExecutionPolicy::Immediate, &[f.teacher]))
            .await
            .unwrap();
        f.host
            .generate_review(&GenerateReviewRequest::recurring(6, "0 * * * *"))
            .await
            .unwrap();

        f.host.delete_reviewer(6).await;
        assert!(!f.jobs.has_recurring("6"));
    }

    #[tokio::test]
    async fn test_generate_unknown_reviewer_fails_fast() {
        let f = fixture().await;
        let err = f
            .host
            .generate_review(&GenerateReviewRequest::immediate(77))
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::ReviewerNotFound(77)));
        assert!(f.jobs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_generate_missing_cron() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(8, ExecutionPolicy::Immediate, &[])).await.unwrap();
        let request = GenerateReviewRequest {
            reviewer_id: 8,
            kind: PolicyKind::Recurring,
            delay: None,
            cron: None,
        };
        let err = f.host.generate_review(&request).await.unwrap_err();
        assert!(matches!(
            err,
            GeneratorError::MissingParameter { parameter: "cron", .. }
        ));
        assert!(f.jobs.calls().is_empty());
        assert!(!f.host.has_recurring(8).await);
    }

    #[tokio::test]
    async fn test_delayed_routes_to_delayed_queue() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(9, ExecutionPolicy::Immediate, &[f.teacher])).await.unwrap();
        f.host
            .generate_review(&GenerateReviewRequest::delayed(9, Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(
            f.jobs.calls(),
            vec![JobCall::Delayed {
                queue: "delayed".into(),
                delay: Duration::from_secs(30)
            }]
        );
        assert_eq!(f.jobs.run_pending().await, 1);
        assert_eq!(f.store.list_reviews(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_error_propagates() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(10, ExecutionPolicy::Immediate, &[])).await.unwrap();
        f.jobs.fail_with("backend down");
        let err = f
            .host
            .generate_review(&GenerateReviewRequest::immediate(10))
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Scheduler(_)));
    }

    #[tokio::test]
    async fn test_callback_after_delete_is_silent() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(11, ExecutionPolicy::Immediate, &[f.teacher])).await.unwrap();
        f.host
            .generate_review(&GenerateReviewRequest::immediate(11))
            .await
            .unwrap();
        f.host.delete_reviewer(11).await;

        assert_eq!(f.jobs.run_pending().await, 1);
        assert!(f.store.list_reviews(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_callback_after_host_dropped_is_silent() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(12, ExecutionPolicy::Immediate, &[f.teacher])).await.unwrap();
        f.host
            .generate_review(&GenerateReviewRequest::immediate(12))
            .await
            .unwrap();
        drop(f.host);

        assert_eq!(f.jobs.run_pending().await, 1);
        assert!(f.store.list_reviews(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_jobs_counts_callbacks() {
        let f = fixture().await;
        let mut completed = f.host.completed_jobs();
        f.host.create_reviewer(reviewer(22, ExecutionPolicy::Immediate, &[f.teacher])).await.unwrap();
        f.host
            .generate_review(&GenerateReviewRequest::immediate(22))
            .await
            .unwrap();
        assert!(!completed.has_changed().unwrap());

        assert_eq!(f.jobs.run_pending().await, 1);
        assert!(completed.has_changed().unwrap());
        assert_eq!(*completed.borrow_and_update(), 1);

        // A callback for a deleted reviewer still completes
        f.host
            .generate_review(&GenerateReviewRequest::immediate(22))
            .await
            .unwrap();
        f.host.delete_reviewer(22).await;
        f.jobs.run_pending().await;
        assert_eq!(*completed.borrow(), 2);
    }

    #[tokio::test]
    async fn test_start_rules() {
        let f = fixture().await;
        assert!(!f.host.start_reviewer(99).await);

        f.host.create_reviewer(reviewer(13, ExecutionPolicy::Immediate, &[])).await.unwrap();
        assert!(!f.host.start_reviewer(13).await);
        assert!(!f.host.is_running(13).await);
        assert_eq!(f.host.active_workers().await, 0);
    }

    #[tokio::test]
    async fn test_start_stop_worker_emits_and_reaps() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(14, ExecutionPolicy::Immediate, &[f.teacher])).await.unwrap();

        assert!(f.host.start_reviewer(14).await);
        assert!(!f.host.start_reviewer(14).await);
        assert!(f.host.is_running(14).await);

        let store = f.store.clone();
        wait_for(|| {
            let store = store.clone();
            async move { store.list_reviews(None).await.unwrap().len() >= 2 }
        })
        .await;

        assert!(f.host.stop_reviewer(14).await);
        assert!(!f.host.is_running(14).await);

        let host = f.host.clone();
        wait_for(|| {
            let host = host.clone();
            async move { host.active_workers().await == 0 }
        })
        .await;

        // Restartable after stop
        assert!(f.host.start_reviewer(14).await);
        f.host.shutdown().await;
        assert!(!f.host.is_running(14).await);
        assert_eq!(f.host.active_workers().await, 0);
    }

    #[tokio::test]
    async fn test_stop_unknown_is_success() {
        let f = fixture().await;
        assert!(f.host.stop_reviewer(1234).await);
    }

    #[tokio::test]
    async fn test_delete_joins_running_worker() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(15, ExecutionPolicy::Immediate, &[f.teacher])).await.unwrap();
        assert!(f.host.start_reviewer(15).await);

        assert!(f.host.delete_reviewer(15).await);
        assert_eq!(f.host.active_workers().await, 0);

        let before = f.store.list_reviews(None).await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.store.list_reviews(None).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_stop_wakes_sleeping_worker() {
        let f = fixture_with_interval(Duration::from_secs(3600)).await;
        f.host.create_reviewer(reviewer(20, ExecutionPolicy::Immediate, &[f.teacher])).await.unwrap();
        assert!(f.host.start_reviewer(20).await);

        let store = f.store.clone();
        wait_for(|| {
            let store = store.clone();
            async move { store.list_reviews(None).await.unwrap().len() == 1 }
        })
        .await;

        // The worker is now inside its hour-long sleep
        assert!(f.host.stop_reviewer(20).await);
        let host = f.host.clone();
        tokio::time::timeout(Duration::from_secs(1), async move {
            while host.active_workers().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stopped worker was not reaped within a second");
        assert_eq!(f.store.list_reviews(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_wakes_sleeping_worker() {
        let f = fixture_with_interval(Duration::from_secs(3600)).await;
        f.host.create_reviewer(reviewer(21, ExecutionPolicy::Immediate, &[f.teacher])).await.unwrap();
        assert!(f.host.start_reviewer(21).await);

        let store = f.store.clone();
        wait_for(|| {
            let store = store.clone();
            async move { store.list_reviews(None).await.unwrap().len() == 1 }
        })
        .await;

        let deleted = tokio::time::timeout(Duration::from_secs(1), f.host.delete_reviewer(21))
            .await
            .expect("delete blocked on a sleeping worker");
        assert!(deleted);
        assert_eq!(f.host.active_workers().await, 0);
    }

    #[tokio::test]
    async fn test_unassign_last_teacher_stops_running() {
        let f = fixture().await;
        f.host.create_reviewer(reviewer(16, ExecutionPolicy::Immediate, &[f.teacher])).await.unwrap();
        assert!(f.host.start_reviewer(16).await);

        assert!(f.host.unassign_teachers(16, &[f.teacher]).await);
        assert!(!f.host.is_running(16).await);
        assert!(!f.host.start_reviewer(16).await);

        assert!(f.host.assign_teachers(16, &[f.teacher]).await);
        assert!(f.host.start_reviewer(16).await);
        f.host.shutdown().await;

        assert!(!f.host.assign_teachers(404, &[f.teacher]).await);
    }

    #[tokio::test]
    async fn test_update_policy_away_from_recurring() {
        let f = fixture().await;
        let cron = "0 * * * *";
        f.host
            .create_reviewer(reviewer(17, ExecutionPolicy::Recurring(cron.into()), &[f.teacher]))
            .await
            .unwrap();
        f.host
            .generate_review(&GenerateReviewRequest::recurring(17, cron))
            .await
            .unwrap();

        assert!(f.host.update_policy(17, ExecutionPolicy::Immediate).await.unwrap());
        assert!(!f.jobs.has_recurring("17"));
        assert!(!f.host.has_recurring(17).await);
        assert_eq!(f.host.reviewer(17).await.unwrap().policy, ExecutionPolicy::Immediate);

        // Delete no longer touches the scheduler
        f.host.delete_reviewer(17).await;
        assert_eq!(f.jobs.removals("17"), 1);
    }

    #[tokio::test]
    async fn test_update_policy_new_cron_replaces() {
        let f = fixture().await;
        f.host
            .create_reviewer(reviewer(18, ExecutionPolicy::Recurring("0 * * * *".into()), &[]))
            .await
            .unwrap();
        f.host
            .generate_review(&GenerateReviewRequest::recurring(18, "0 * * * *"))
            .await
            .unwrap();

        f.host
            .update_policy(18, ExecutionPolicy::Recurring("*/5 * * * *".into()))
            .await
            .unwrap();
        assert_eq!(f.jobs.recurring_cron("18").as_deref(), Some("*/5 * * * *"));

        assert!(!f.host.update_policy(404, ExecutionPolicy::Immediate).await.unwrap());
        assert!(f
            .host
            .update_policy(18, ExecutionPolicy::Recurring("bad".into()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_restore_recurring_jobs() {
        let f = fixture().await;
        f.host
            .create_reviewer(reviewer(19, ExecutionPolicy::Recurring("0 * * * *".into()), &[f.teacher]))
            .await
            .unwrap();
        f.store.save_recurring_job("19", 19, "0 * * * *").await.unwrap();
        f.store.save_recurring_job("20", 20, "0 * * * *").await.unwrap();

        assert_eq!(f.host.restore_recurring_jobs().await.unwrap(), 1);
        assert!(f.jobs.has_recurring("19"));
        assert!(!f.jobs.has_recurring("20"));
        assert!(f.host.has_recurring(19).await);

        let rows = f.store.list_recurring_jobs().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reviewer_id, 19);

        assert!(f.jobs.fire_recurring("19").await);
        assert_eq!(f.store.list_reviews(Some(f.teacher)).await.unwrap().len(), 1);
    }
}
