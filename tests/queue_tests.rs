//! Delivery guarantees of the task queue: leases, expiry, dead letters,
//! and journal recovery.


use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use talent_scout::config::QueueConfig;
use talent_scout::error::FatalReason;
use talent_scout::scheduler::{JobStatus, Priority, TaskQueue};
use talent_scout::worker::LeaseHeartbeat;
use test_harness::{test_config, Harness, Scripted};

fn config(visibility_ms: u64, max_attempts: u32) -> QueueConfig {
    QueueConfig {
        max_pending: 100,
        max_attempts,
        visibility_timeout: Duration::from_millis(visibility_ms),
        poll_interval: Duration::from_millis(10),
        journal_path: None,
    }
}

#[tokio::test]
async fn expired_lease_is_redelivered() {
    let queue = TaskQueue::new(config(50, 3));
    let id = Uuid::new_v4();
    queue.enqueue(id, Priority::Normal).await.unwrap();

    let first = queue.try_dequeue("worker-a").await.unwrap().unwrap();
    assert!(queue.try_dequeue("worker-b").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(80)).await;

    let second = queue.try_dequeue("worker-b").await.unwrap().unwrap();
    assert_eq!(second.job_id(), id);
    assert_eq!(second.item.attempts, 2);
    assert_eq!(second.item.last_error.as_deref(), Some("lease expired"));
    assert_ne!(first.lease_id, second.lease_id);

    // The stale lease can no longer settle the item.
    assert!(queue.ack(first.lease_id).await.is_err());
    queue.ack(second.lease_id).await.unwrap();
}

#[tokio::test]
async fn heartbeat_keeps_lease_alive() {
    let queue = Arc::new(TaskQueue::new(config(100, 3)));
    queue.enqueue(Uuid::new_v4(), Priority::Normal).await.unwrap();
    let lease = queue.try_dequeue("worker-a").await.unwrap().unwrap();

    let stop = LeaseHeartbeat::new(Duration::from_millis(30), queue.clone(), lease.lease_id).spawn();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(queue.reap_expired().await.unwrap(), 0);
    assert!(queue.try_dequeue("worker-b").await.unwrap().is_none());
    stop.cancel();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(queue.reap_expired().await.unwrap(), 1);
    assert_eq!(queue.depth().await.ready, 1);
}

#[tokio::test]
async fn final_expiry_dead_letters_the_item() {
    let queue = TaskQueue::new(config(30, 1));
    let id = Uuid::new_v4();
    queue.enqueue(id, Priority::Normal).await.unwrap();
    queue.try_dequeue("worker-a").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(queue.reap_expired().await.unwrap(), 1);

    let depth = queue.depth().await;
    assert_eq!((depth.ready, depth.leased, depth.dead_letters), (0, 0, 1));

    let dead = queue.drain_dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, id);
    assert_eq!(queue.depth().await.dead_letters, 0);

    // A dead-lettered job can be submitted again.
    assert!(queue.enqueue(id, Priority::Normal).await.unwrap());
}

#[tokio::test]
async fn concurrent_consumers_never_share_a_job() {
    let queue = Arc::new(TaskQueue::new(config(5_000, 3)));
    let mut expected = HashSet::new();
    for _ in 0..40 {
        let id = Uuid::new_v4();
        expected.insert(id);
        queue.enqueue(id, Priority::Normal).await.unwrap();
    }

    let consumers: Vec<_> = (0..4)
        .map(|n| {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(lease) = queue.try_dequeue(&format!("worker-{n}")).await.unwrap() {
                    taken.push(lease.job_id());
                    tokio::task::yield_now().await;
                }
                taken
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for consumer in consumers {
        for id in consumer.await.unwrap() {
            assert!(seen.insert(id), "job {id} delivered twice");
        }
    }
    assert_eq!(seen, expected);
    assert_eq!(queue.depth().await.leased, 40);
}

#[tokio::test]
async fn journal_recovers_ready_and_leased_items() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(5_000, 3);
    cfg.journal_path = Some(dir.path().join("queue.json"));

    let (done, leased, waiting) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    {
        let queue = TaskQueue::open(cfg.clone()).await.unwrap();
        queue.enqueue(done, Priority::High).await.unwrap();
        queue.enqueue(leased, Priority::Normal).await.unwrap();
        queue.enqueue(waiting, Priority::Low).await.unwrap();

        let lease = queue.try_dequeue("w").await.unwrap().unwrap();
        assert_eq!(lease.job_id(), done);
        queue.ack(lease.lease_id).await.unwrap();
        let lease = queue.try_dequeue("w").await.unwrap().unwrap();
        assert_eq!(lease.job_id(), leased);
        // Dropped here without settling, as if the process died.
    }

    let recovered = TaskQueue::open(cfg).await.unwrap();
    let depth = recovered.depth().await;
    assert_eq!((depth.ready, depth.leased), (2, 0));

    let mut ids = HashSet::new();
    while let Some(lease) = recovered.try_dequeue("w").await.unwrap() {
        ids.insert(lease.job_id());
    }
    assert_eq!(ids, HashSet::from([leased, waiting]));
}

#[tokio::test]
async fn housekeeping_fails_dead_lettered_jobs() {
    let mut config = test_config();
    config.queue.max_attempts = 1;
    config.queue.visibility_timeout = Duration::from_millis(40);
    config.worker.heartbeat_interval = Duration::from_millis(10);
    let h = Harness::with_config(Scripted::default(), config);
    let id = h.submit("Backend engineer", 1).await;

    // A worker takes the job and disappears.
    h.orchestrator.queue().try_dequeue("lost").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let report = h.orchestrator.housekeeping().await.unwrap();
    assert_eq!(report.reaped_leases, 1);
    assert_eq!(report.dead_lettered, 1);

    let status = h.orchestrator.get_status(id).await.unwrap();
    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error.unwrap().reason, FatalReason::MaxRetriesExceeded);
}

#[tokio::test]
async fn housekeeping_purges_expired_terminal_jobs() {
    let mut config = test_config();
    config.retention.job_ttl = Duration::from_millis(20);
    let h = Harness::with_config(Scripted::default(), config);
    let finished = h.submit("Backend engineer", 1).await;
    h.run_one().await;
    let pending = h.submit("Data engineer", 1).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = h.orchestrator.housekeeping().await.unwrap();
    assert_eq!(report.purged_jobs, 1);
    assert!(h.orchestrator.get_status(finished).await.is_err());
    assert!(h.orchestrator.get_status(pending).await.is_ok());
}
