//! Worker tasks and their guaranteed completion bookkeeping

use super::coordinator::QueueCore;
use super::types::{JobId, JobOutcome, QueueKey, SharedJob};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Registered control surface of a running worker
///
/// Lives in the coordinator's worker map exactly as long as the job is in the
/// executing set.
#[derive(Debug)]
pub(super) struct WorkerHandle {
    kill: CancellationToken,
    done: CancellationToken,
}

impl WorkerHandle {
    /// Request termination; the job future is dropped at its next await point
    pub(super) fn kill(&self) {
        self.kill.cancel();
    }

    /// Token fired once the worker's bookkeeping has finished
    pub(super) fn done(&self) -> CancellationToken {
        self.done.clone()
    }
}

/// A worker registered under the lock but not spawned yet
///
/// Spawning happens after the lock is released so that a task dropped
/// synchronously (e.g. during runtime shutdown) cannot re-enter the lock.
#[must_use = "a registered worker must be spawned or its queue key stays busy"]
pub(super) struct WorkerLaunch {
    queue: QueueKey,
    job: SharedJob,
    kill: CancellationToken,
    done: CancellationToken,
}

impl WorkerLaunch {
    pub(super) fn new(queue: QueueKey, job: SharedJob) -> (Self, WorkerHandle) {
        let kill = CancellationToken::new();
        let done = CancellationToken::new();
        let handle = WorkerHandle {
            kill: kill.clone(),
            done: done.clone(),
        };
        (
            Self {
                queue,
                job,
                kill,
                done,
            },
            handle,
        )
    }

    /// Start the worker task on the coordinator's runtime
    pub(super) fn spawn(self, core: &Arc<QueueCore>) {
        let guard = CompletionGuard {
            core: Arc::clone(core),
            queue: self.queue,
            job_id: self.job.id(),
            started: Instant::now(),
            outcome: None,
            kill: self.kill.clone(),
            done: self.done,
        };
        core.runtime().spawn(run(self.job, self.kill, guard));
    }
}

async fn run(job: SharedJob, kill: CancellationToken, mut guard: CompletionGuard) {
    info!("Starting execution of job {} on queue {}", job.describe(), guard.queue);

    let outcome = tokio::select! {
        biased;
        _ = kill.cancelled() => {
            warn!("Job {} killed after {:?}", job.describe(), guard.started.elapsed());
            JobOutcome::Killed
        }
        result = job.perform() => match result {
            Ok(()) => {
                info!("Job {} completed successfully in {:?}", job.describe(), guard.started.elapsed());
                JobOutcome::Succeeded
            }
            Err(e) => {
                error!("Job {} failed after {:?}: {:#}", job.describe(), guard.started.elapsed(), e);
                JobOutcome::Failed
            }
        },
    };

    guard.outcome = Some(outcome);
}

/// Runs the promotion protocol when the worker task ends, whichever way
struct CompletionGuard {
    core: Arc<QueueCore>,
    queue: QueueKey,
    job_id: JobId,
    started: Instant,
    outcome: Option<JobOutcome>,
    kill: CancellationToken,
    done: CancellationToken,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let outcome = match self.outcome {
            Some(outcome) => outcome,
            None if self.kill.is_cancelled() => JobOutcome::Killed,
            None => {
                // panic inside perform, or the runtime dropped the task
                error!("Job {} ended without returning", self.job_id);
                JobOutcome::Failed
            }
        };

        self.core
            .complete(&self.queue, self.job_id, outcome, self.started.elapsed());
        self.done.cancel();
    }
}
