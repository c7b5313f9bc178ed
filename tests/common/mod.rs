//! Shared helpers for job queue integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use keyed_job_queue::job_queue::{Job, JobId, JobOutcome, QueueCounts, QueueMetricsSink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(5);

/// What a `HeldJob` does once released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Succeed,
    Fail,
    Panic,
}

/// Job that blocks in `perform` until the test releases it
#[derive(Debug)]
pub struct HeldJob {
    pub id: JobId,
    pub name: &'static str,
    started: CancellationToken,
    release: CancellationToken,
    finished: CancellationToken,
    finish: Finish,
}

impl HeldJob {
    pub fn new(name: &'static str) -> Arc<Self> {
        Self::with_finish(name, Finish::Succeed)
    }

    pub fn with_finish(name: &'static str, finish: Finish) -> Arc<Self> {
        Arc::new(Self {
            id: JobId::new(),
            name,
            started: CancellationToken::new(),
            release: CancellationToken::new(),
            finished: CancellationToken::new(),
            finish,
        })
    }

    pub fn release(&self) {
        self.release.cancel();
    }

    pub fn has_started(&self) -> bool {
        self.started.is_cancelled()
    }

    /// `perform` ran to its end (not killed)
    pub fn has_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    pub async fn wait_started(&self) {
        tokio::time::timeout(EVENTUALLY_TIMEOUT, self.started.cancelled())
            .await
            .unwrap_or_else(|_| panic!("job {} never started", self.name));
    }
}

#[async_trait]
impl Job for HeldJob {
    fn id(&self) -> JobId {
        self.id
    }

    async fn perform(&self) -> anyhow::Result<()> {
        self.started.cancel();
        self.release.cancelled().await;
        self.finished.cancel();
        match self.finish {
            Finish::Succeed => Ok(()),
            Finish::Fail => anyhow::bail!("job {} failed on purpose", self.name),
            Finish::Panic => panic!("job {} panicked on purpose", self.name),
        }
    }

    fn describe(&self) -> String {
        self.name.to_string()
    }
}

/// Records per-key overlap, global parallelism and per-key execution order
#[derive(Debug, Default)]
pub struct Probe {
    active_per_key: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub overlaps: AtomicUsize,
    pub order: Mutex<HashMap<String, Vec<usize>>>,
}

impl Probe {
    fn enter(&self, key: &str, seq: usize) {
        {
            let mut per_key = self.active_per_key.lock().unwrap();
            let running = per_key.entry(key.to_string()).or_default();
            *running += 1;
            if *running > 1 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.order
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(seq);

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
    }

    fn exit(&self, key: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        let mut per_key = self.active_per_key.lock().unwrap();
        if let Some(running) = per_key.get_mut(key) {
            *running -= 1;
        }
    }

    pub fn order_of(&self, key: &str) -> Vec<usize> {
        self.order
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

/// Short job reporting into a `Probe`
#[derive(Debug)]
pub struct ProbeJob {
    id: JobId,
    key: String,
    seq: usize,
    work: Duration,
    probe: Arc<Probe>,
}

impl ProbeJob {
    pub fn new(probe: &Arc<Probe>, key: impl Into<String>, seq: usize, work: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: JobId::new(),
            key: key.into(),
            seq,
            work,
            probe: Arc::clone(probe),
        })
    }
}

#[async_trait]
impl Job for ProbeJob {
    fn id(&self) -> JobId {
        self.id
    }

    async fn perform(&self) -> anyhow::Result<()> {
        self.probe.enter(&self.key, self.seq);
        tokio::time::sleep(self.work).await;
        self.probe.exit(&self.key);
        Ok(())
    }
}

/// Metrics sink keeping everything it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub counts: Mutex<Vec<QueueCounts>>,
    pub outcomes: Mutex<Vec<JobOutcome>>,
}

impl RecordingSink {
    pub fn last_counts(&self) -> Option<QueueCounts> {
        self.counts.lock().unwrap().last().copied()
    }

    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl QueueMetricsSink for RecordingSink {
    fn record_counts(&self, counts: QueueCounts) {
        self.counts.lock().unwrap().push(counts);
    }

    fn record_outcome(&self, outcome: JobOutcome, _elapsed: Duration) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}

pub fn counts(executing: usize, queued: usize) -> QueueCounts {
    QueueCounts { executing, queued }
}

/// Poll `condition` until it holds or the test times out
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENTUALLY_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
