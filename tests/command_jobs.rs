#![cfg(unix)]

use keyed_job_queue::job_queue::{Admission, Job, JobQueue, QueueKey};
use keyed_job_queue::jobs::{CommandJob, CommandSpec};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[tokio::test]
async fn test_commands_on_one_queue_run_in_order() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("order.log");

    let queue = JobQueue::new().unwrap();
    for step in 0..3 {
        let spec: CommandSpec = format!("build::sleep 0.0{step} && echo {step} >> {}", log.display())
            .parse()
            .unwrap();
        let key = spec.queue_key();
        queue.submit(Arc::new(spec.into_job()), key).unwrap();
    }

    assert!(queue.wait_idle(Some(Duration::from_secs(10))).await);
    let written = std::fs::read_to_string(&log).unwrap();
    assert_eq!(written.lines().collect::<Vec<_>>(), vec!["0", "1", "2"]);
}

#[tokio::test]
async fn test_killing_command_job_stops_the_process() {
    let queue = JobQueue::new().unwrap();
    let sleeper = Arc::new(CommandJob::new("sleep 30"));
    let next = Arc::new(CommandJob::new("true"));

    assert_eq!(
        queue.submit(sleeper.clone(), QueueKey::named("slow")).unwrap(),
        Admission::Started
    );
    assert_eq!(
        queue.submit(next.clone(), QueueKey::named("slow")).unwrap(),
        Admission::Queued
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    assert!(queue.kill(sleeper.id()));
    assert!(queue.wait(sleeper.id(), Some(Duration::from_secs(5))).await);
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(queue.wait_idle(Some(Duration::from_secs(5))).await);
    assert!(queue.find_by_id(next.id()).is_none());
}
