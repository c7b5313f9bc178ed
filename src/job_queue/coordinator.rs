//! Keyed job queue coordinator
//!
//! Jobs sharing a queue key run one at a time in submission order. Jobs with
//! different keys run concurrently, bounded by the global concurrency limit.
//! All scheduling state sits behind one mutex that is only held for short,
//! non-blocking bookkeeping; `Job::perform` always runs outside of it.

use super::gate::ExecutionGate;
use super::limit::ConcurrencyLimit;
use super::metrics::{LogMetricsSink, QueueMetricsSink};
use super::types::{
    Admission, ExecutingJob, JobId, JobOutcome, PendingJob, QueueCounts, QueueKey, QueueSnapshot,
    SharedJob,
};
use super::worker::{WorkerHandle, WorkerLaunch};
use crate::errors::{JobQueueError, JobQueueResult, StateConsistencyError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Coordinator for keyed, serialised job execution
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct JobQueue {
    core: Arc<QueueCore>,
}

/// State and collaborators shared between the handle and its workers
pub(super) struct QueueCore {
    state: Mutex<QueueState>,
    gate: ExecutionGate,
    limit: ConcurrencyLimit,
    metrics: Arc<dyn QueueMetricsSink>,
    /// Taken before the state lock is released so counts reach the sink in
    /// the order the transitions happened
    publish_order: Mutex<()>,
    runtime: Handle,
}

#[derive(Default)]
struct QueueState {
    /// Backlog in submission order; per-key order is this order filtered by key
    pending: VecDeque<PendingEntry>,
    /// At most one job per key
    executing: HashMap<QueueKey, ExecutingEntry>,
    /// Present exactly for the jobs in `executing`
    workers: HashMap<JobId, WorkerHandle>,
    violation: Option<StateConsistencyError>,
}

struct PendingEntry {
    queue: QueueKey,
    job: SharedJob,
    enqueued_at: DateTime<Utc>,
}

struct ExecutingEntry {
    job: SharedJob,
    started_at: DateTime<Utc>,
}

impl QueueState {
    fn counts(&self) -> QueueCounts {
        QueueCounts {
            executing: self.executing.len(),
            queued: self.pending.len(),
        }
    }

    fn find_executing(&self, id: JobId) -> Option<SharedJob> {
        self.executing
            .values()
            .find(|entry| entry.job.id() == id)
            .map(|entry| Arc::clone(&entry.job))
    }

    fn find_queued(&self, id: JobId) -> Option<SharedJob> {
        self.pending
            .iter()
            .find(|entry| entry.job.id() == id)
            .map(|entry| Arc::clone(&entry.job))
    }

    fn has_pending(&self, queue: &QueueKey) -> bool {
        self.pending.iter().any(|entry| &entry.queue == queue)
    }

    fn contains(&self, id: JobId) -> bool {
        self.workers.contains_key(&id) || self.pending.iter().any(|entry| entry.job.id() == id)
    }
}

impl QueueCore {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Critical sections never panic half-way through a mutation.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// A busy key always waits, whatever the global capacity, and so does a
    /// key with older jobs still in the backlog
    fn can_admit(&self, state: &QueueState, queue: &QueueKey) -> bool {
        !state.executing.contains_key(queue)
            && !state.has_pending(queue)
            && self.limit.has_capacity(state.executing.len())
    }

    /// Hand the counts of `state` to the metrics sink, then release the lock
    ///
    /// Launches must happen after this returns: a worker dropped on spawn
    /// publishes its own counts.
    fn publish_counts(&self, state: MutexGuard<'_, QueueState>) {
        self.publish(state, None);
    }

    fn publish(
        &self,
        state: MutexGuard<'_, QueueState>,
        finished: Option<(JobOutcome, Duration)>,
    ) {
        let counts = state.counts();
        let _order = self.publish_order.lock().unwrap_or_else(PoisonError::into_inner);
        drop(state);
        if let Some((outcome, elapsed)) = finished {
            self.metrics.record_outcome(outcome, elapsed);
        }
        self.metrics.record_counts(counts);
    }

    /// Register the worker handle and the executing entry in one critical section
    fn register(&self, state: &mut QueueState, queue: QueueKey, job: SharedJob) -> WorkerLaunch {
        let (launch, handle) = WorkerLaunch::new(queue.clone(), Arc::clone(&job));
        state.workers.insert(job.id(), handle);
        state.executing.insert(
            queue,
            ExecutingEntry {
                job,
                started_at: Utc::now(),
            },
        );
        launch
    }

    /// Start every backlog entry whose key is idle while capacity remains
    fn promote(&self, state: &mut QueueState) -> Vec<WorkerLaunch> {
        let mut launches = Vec::new();

        if !self.gate.is_enabled() {
            if !state.pending.is_empty() {
                debug!(
                    "Job execution disabled, leaving {} pending jobs in the backlog",
                    state.pending.len()
                );
            }
            return launches;
        }

        let mut index = 0;
        while index < state.pending.len() && self.limit.has_capacity(state.executing.len()) {
            if state.executing.contains_key(&state.pending[index].queue) {
                index += 1;
                continue;
            }
            let Some(entry) = state.pending.remove(index) else {
                break;
            };

            let waited = Utc::now() - entry.enqueued_at;
            info!(
                "Promoting job {} on queue {} after {}ms in backlog",
                entry.job.describe(),
                entry.queue,
                waited.num_milliseconds()
            );
            launches.push(self.register(state, entry.queue, entry.job));
        }

        launches
    }

    fn launch(self: &Arc<Self>, launches: Vec<WorkerLaunch>) {
        for launch in launches {
            launch.spawn(self);
        }
    }

    /// Completion bookkeeping, run by the worker's guard on every exit path
    pub(super) fn complete(
        self: &Arc<Self>,
        queue: &QueueKey,
        job_id: JobId,
        outcome: JobOutcome,
        elapsed: Duration,
    ) {
        let launches = {
            let mut state = self.lock();
            state.workers.remove(&job_id);

            let launches = match state.executing.remove(queue) {
                Some(entry) if entry.job.id() == job_id => self.promote(&mut state),
                previous => {
                    let found = previous.as_ref().map(|entry| entry.job.id());
                    if let Some(entry) = previous {
                        // belongs to another worker, leave it where it was
                        state.executing.insert(queue.clone(), entry);
                    }
                    let violation = StateConsistencyError {
                        queue: queue.clone(),
                        expected: job_id,
                        found,
                    };
                    error!("{}", violation);
                    if state.violation.is_none() {
                        state.violation = Some(violation);
                    }
                    Vec::new()
                }
            };

            self.publish(state, Some((outcome, elapsed)));
            launches
        };

        self.launch(launches);
    }
}

impl JobQueue {
    pub fn builder() -> JobQueueBuilder {
        JobQueueBuilder::default()
    }

    /// Coordinator on the current runtime with an unbounded limit and its own gate
    pub fn new() -> JobQueueResult<Self> {
        Self::builder().build()
    }

    /// Submit a job, by default on its own private queue
    ///
    /// Returns `Admission::Started` when the worker was started right away and
    /// `Admission::Queued` when the job waits behind its key or the limit.
    /// While execution is disabled the job is dropped (`Admission::Disabled`).
    pub fn submit(
        &self,
        job: SharedJob,
        queue: impl Into<Option<QueueKey>>,
    ) -> JobQueueResult<Admission> {
        let id = job.id();
        let queue: Option<QueueKey> = queue.into();
        let queue = queue.unwrap_or(QueueKey::Job(id));

        let (admission, launch) = {
            let mut state = self.core.lock();

            if let Some(violation) = &state.violation {
                return Err(violation.clone().into());
            }

            let result = if !self.core.gate.is_enabled() {
                debug!("Job execution disabled, dropping job {}", job.describe());
                (Admission::Disabled, None)
            } else if state.contains(id) {
                return Err(JobQueueError::DuplicateJob { id });
            } else if self.core.can_admit(&state, &queue) {
                let launch = self.core.register(&mut state, queue, job);
                (Admission::Started, Some(launch))
            } else {
                debug!("Queueing job {} on queue {}", job.describe(), queue);
                state.pending.push_back(PendingEntry {
                    queue,
                    job,
                    enqueued_at: Utc::now(),
                });
                (Admission::Queued, None)
            };

            self.core.publish_counts(state);
            result
        };

        if let Some(launch) = launch {
            launch.spawn(&self.core);
        }

        Ok(admission)
    }

    /// The job with this identity if it is executing
    pub fn is_executing(&self, id: JobId) -> Option<SharedJob> {
        self.core.lock().find_executing(id)
    }

    /// The job with this identity if it is waiting in the backlog
    pub fn is_queued(&self, id: JobId) -> Option<SharedJob> {
        self.core.lock().find_queued(id)
    }

    /// Executing or pending job with this identity
    ///
    /// Both views are read in one critical section so a job being promoted is
    /// never missed.
    pub fn find_by_id(&self, id: JobId) -> Option<SharedJob> {
        let state = self.core.lock();
        state.find_executing(id).or_else(|| state.find_queued(id))
    }

    /// All executing jobs
    pub fn executing(&self) -> Vec<SharedJob> {
        self.core
            .lock()
            .executing
            .values()
            .map(|entry| Arc::clone(&entry.job))
            .collect()
    }

    /// Remove a pending job so it never runs
    ///
    /// Returns false when no pending job has this identity; an executing job
    /// with the same identity is left alone.
    pub fn dequeue(&self, id: JobId) -> bool {
        let mut state = self.core.lock();
        let Some(index) = state.pending.iter().position(|entry| entry.job.id() == id) else {
            return false;
        };
        if let Some(entry) = state.pending.remove(index) {
            info!("Dequeued job {} from queue {}", entry.job.describe(), entry.queue);
        }

        self.core.publish_counts(state);
        true
    }

    /// Wait for the worker running job `id` to finish its bookkeeping
    ///
    /// Returns immediately when no worker runs the job (finished, never
    /// started, or only pending). Returns false if `timeout` elapsed first.
    pub async fn wait(&self, id: JobId, timeout: Option<Duration>) -> bool {
        let done = {
            let state = self.core.lock();
            state.workers.get(&id).map(WorkerHandle::done)
        };
        match done {
            Some(done) => wait_for(done, timeout).await,
            None => true,
        }
    }

    /// Terminate the worker running job `id`
    ///
    /// The job future is dropped at its next await point and the normal
    /// completion bookkeeping runs, freeing the key for its next pending job.
    /// Returns false when no worker runs the job.
    pub fn kill(&self, id: JobId) -> bool {
        let state = self.core.lock();
        match state.workers.get(&id) {
            Some(handle) => {
                warn!("Killing job {}", id);
                handle.kill();
                true
            }
            None => false,
        }
    }

    /// Kill and join every worker, then drop all state
    ///
    /// Maintenance only: must not race with submissions.
    pub async fn clear(&self) {
        let workers: Vec<CancellationToken> = {
            let mut state = self.core.lock();
            state.pending.clear();
            state
                .workers
                .values()
                .map(|handle| {
                    handle.kill();
                    handle.done()
                })
                .collect()
        };

        if !workers.is_empty() {
            info!("Clearing job queue, killing {} workers", workers.len());
        }
        futures::future::join_all(workers.iter().map(CancellationToken::cancelled)).await;

        let mut state = self.core.lock();
        state.executing.clear();
        state.workers.clear();
        state.pending.clear();
        state.violation = None;
        self.core.publish_counts(state);
    }

    /// Run the promotion scan outside of a completion event
    ///
    /// Promotion otherwise only happens when a worker finishes, so a backlog
    /// left behind while execution was disabled needs this nudge after the
    /// gate is enabled again.
    pub fn promote_pending(&self) -> usize {
        let launches = {
            let mut state = self.core.lock();
            let launches = self.core.promote(&mut state);
            if !launches.is_empty() {
                self.core.publish_counts(state);
            }
            launches
        };

        let started = launches.len();
        self.core.launch(launches);
        started
    }

    /// Wait until no worker is running
    ///
    /// Only workers are waited for. A backlog nothing will promote (execution
    /// disabled, or left behind until `promote_pending`) does not keep this
    /// waiting. Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);

        loop {
            let next = {
                let state = self.core.lock();
                let next = state.workers.values().next().map(WorkerHandle::done);
                if next.is_none() {
                    // the last completions may still be publishing
                    drop(self.core.publish_order.lock().unwrap_or_else(PoisonError::into_inner));
                }
                next
            };
            let Some(next) = next else {
                return true;
            };

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, next.cancelled())
                        .await
                        .is_err()
                    {
                        return false;
                    }
                }
                None => next.cancelled().await,
            }
        }
    }

    /// Pending jobs grouped by key, oldest first
    pub fn grouped_queue(&self) -> BTreeMap<QueueKey, Vec<SharedJob>> {
        let state = self.core.lock();
        let mut grouped: BTreeMap<QueueKey, Vec<SharedJob>> = BTreeMap::new();
        for entry in &state.pending {
            grouped
                .entry(entry.queue.clone())
                .or_default()
                .push(Arc::clone(&entry.job));
        }
        grouped
    }

    /// Consistent view of executing and pending jobs
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.core.lock();

        let executing = state
            .executing
            .iter()
            .map(|(queue, entry)| {
                (
                    queue.clone(),
                    ExecutingJob {
                        id: entry.job.id(),
                        description: entry.job.describe(),
                        started_at: entry.started_at,
                    },
                )
            })
            .collect();

        let mut pending: BTreeMap<QueueKey, Vec<PendingJob>> = BTreeMap::new();
        for entry in &state.pending {
            pending.entry(entry.queue.clone()).or_default().push(PendingJob {
                id: entry.job.id(),
                description: entry.job.describe(),
                enqueued_at: entry.enqueued_at,
            });
        }

        QueueSnapshot {
            enabled: self.core.gate.is_enabled(),
            max_concurrent: self.core.limit.get(),
            executing,
            pending,
        }
    }

    /// Log the current snapshot and return it
    pub fn debug(&self) -> QueueSnapshot {
        let snapshot = self.snapshot();
        debug!(?snapshot, "job queue state");
        snapshot
    }

    pub fn counts(&self) -> QueueCounts {
        self.core.lock().counts()
    }

    /// Report a state consistency violation recorded by a completed worker
    pub fn check_consistency(&self) -> Result<(), StateConsistencyError> {
        match &self.core.lock().violation {
            Some(violation) => Err(violation.clone()),
            None => Ok(()),
        }
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.core.gate
    }

    pub fn limit(&self) -> &ConcurrencyLimit {
        &self.core.limit
    }
}

async fn wait_for(done: CancellationToken, timeout: Option<Duration>) -> bool {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, done.cancelled())
            .await
            .is_ok(),
        None => {
            done.cancelled().await;
            true
        }
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self
            .core
            .state
            .try_lock()
            .map(|state| state.counts())
            .unwrap_or_default();

        f.debug_struct("JobQueue")
            .field("enabled", &self.core.gate.is_enabled())
            .field("max_concurrent", &self.core.limit.get())
            .field("executing", &counts.executing)
            .field("queued", &counts.queued)
            .finish()
    }
}

/// Builder for [`JobQueue`]
#[derive(Default)]
pub struct JobQueueBuilder {
    gate: Option<ExecutionGate>,
    limit: Option<ConcurrencyLimit>,
    metrics: Option<Arc<dyn QueueMetricsSink>>,
    runtime: Option<Handle>,
}

impl JobQueueBuilder {
    /// Share an execution gate with other coordinators
    pub fn gate(mut self, gate: ExecutionGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn limit(mut self, limit: ConcurrencyLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn QueueMetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runtime workers are spawned on; defaults to the current one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> JobQueueResult<JobQueue> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };

        Ok(JobQueue {
            core: Arc::new(QueueCore {
                state: Mutex::new(QueueState::default()),
                gate: self.gate.unwrap_or_default(),
                limit: self.limit.unwrap_or_default(),
                metrics: self
                    .metrics
                    .unwrap_or_else(|| Arc::new(LogMetricsSink)),
                publish_order: Mutex::new(()),
                runtime,
            }),
        })
    }
}
