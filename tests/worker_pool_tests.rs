//! Worker pool scheduling: concurrency ceiling, retries, and shutdown.


use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use talent_scout::error::FatalReason;
use talent_scout::scheduler::JobStatus;
use talent_scout::worker::WorkerPool;
use test_harness::{assert_eventually, test_config, Harness, Scripted};

#[tokio::test]
async fn pool_runs_submitted_jobs_to_completion() {
    let h = Harness::new(Scripted::with_candidates(&[("ana", 9.0), ("ben", 7.5)]));
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::spawn(h.orchestrator.clone(), shutdown.clone());
    assert_eq!(pool.size(), 2);

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(h.submit(&format!("Backend engineer #{n}"), 2).await);
    }

    let orchestrator = h.orchestrator.clone();
    assert_eventually(
        || {
            let orchestrator = orchestrator.clone();
            let ids = ids.clone();
            async move {
                for id in ids {
                    if orchestrator.get_status(id).await.unwrap().status != JobStatus::Completed {
                        return false;
                    }
                }
                true
            }
        },
        Duration::from_secs(5),
        "all jobs should complete",
    )
    .await;

    let depth = h.orchestrator.queue().depth().await;
    assert_eq!((depth.ready, depth.leased), (0, 0));
    pool.shutdown().await;
}

#[tokio::test]
async fn running_jobs_never_exceed_worker_count() {
    let scripted = Scripted {
        search_delay: Duration::from_millis(50),
        ..Scripted::default()
    };
    let h = Harness::with_config(scripted, test_config().with_workers(3));
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::spawn(h.orchestrator.clone(), shutdown.clone());

    for n in 0..9 {
        h.submit(&format!("Role {n}"), 1).await;
    }

    let orchestrator = h.orchestrator.clone();
    assert_eventually(
        || {
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .list_jobs()
                    .await
                    .iter()
                    .all(|job| job.status == JobStatus::Completed)
            }
        },
        Duration::from_secs(5),
        "all jobs should complete",
    )
    .await;

    assert_eq!(h.scripted.calls.search.load(Ordering::SeqCst), 9);
    let peak = h.scripted.calls.max_searches_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak}");
    assert!(peak >= 2, "pool should run jobs in parallel, peak {peak}");
    pool.shutdown().await;
}

#[tokio::test]
async fn redelivery_limit_fails_job_with_max_retries() {
    let scripted = Scripted::default();
    scripted.search_transient_failures.store(u32::MAX, Ordering::SeqCst);
    let h = Harness::new(scripted);
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::spawn(h.orchestrator.clone(), shutdown.clone());

    let id = h.submit("Backend engineer", 1).await;

    let orchestrator = h.orchestrator.clone();
    assert_eventually(
        || {
            let orchestrator = orchestrator.clone();
            async move { orchestrator.get_status(id).await.unwrap().status == JobStatus::Failed }
        },
        Duration::from_secs(5),
        "job should fail after exhausting deliveries",
    )
    .await;

    let status = h.orchestrator.get_status(id).await.unwrap();
    assert_eq!(status.error.unwrap().reason, FatalReason::MaxRetriesExceeded);
    assert_eq!(status.attempts, 3);
    // Three deliveries, each with three in-call attempts.
    assert_eq!(h.scripted.calls.search.load(Ordering::SeqCst), 9);
    assert_eq!(h.orchestrator.queue().depth().await.ready, 0);
    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_returns_unfinished_job_to_queue() {
    let scripted = Scripted {
        search_delay: Duration::from_secs(5),
        ..Scripted::default()
    };
    let mut config = test_config().with_workers(1);
    config.worker.grace_period = Duration::from_millis(50);
    config.worker.stage_timeout = Duration::from_secs(10);
    let h = Harness::with_config(scripted, config);
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::spawn(h.orchestrator.clone(), shutdown.clone());

    let id = h.submit("Backend engineer", 1).await;
    let orchestrator = h.orchestrator.clone();
    assert_eventually(
        || {
            let orchestrator = orchestrator.clone();
            async move { orchestrator.get_status(id).await.unwrap().status == JobStatus::Running }
        },
        Duration::from_secs(2),
        "job should start",
    )
    .await;

    let started = tokio::time::Instant::now();
    shutdown.cancel();
    pool.join().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    let depth = h.orchestrator.queue().depth().await;
    assert_eq!((depth.ready, depth.leased), (1, 0));
    assert_eq!(
        h.orchestrator.get_status(id).await.unwrap().status,
        JobStatus::Running
    );
}

#[tokio::test]
async fn panicking_job_is_requeued_and_worker_survives() {
    let scripted = Scripted::with_candidates(&[("ana", 9.0)]);
    scripted.search_panics.store(1, Ordering::SeqCst);
    let h = Harness::with_config(scripted, test_config().with_workers(1));
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::spawn(h.orchestrator.clone(), shutdown.clone());

    let first = h.submit("Backend engineer", 1).await;
    let second = h.submit("Data engineer", 1).await;

    let orchestrator = h.orchestrator.clone();
    assert_eventually(
        || {
            let orchestrator = orchestrator.clone();
            async move {
                for id in [first, second] {
                    if orchestrator.get_status(id).await.unwrap().status != JobStatus::Completed {
                        return false;
                    }
                }
                true
            }
        },
        Duration::from_secs(5),
        "the single worker should finish both jobs after the panic",
    )
    .await;

    assert_eq!(h.scripted.calls.search.load(Ordering::SeqCst), 3);
    let panicked = h.orchestrator.get_status(first).await.unwrap();
    assert_eq!(panicked.attempts, 2);
    assert_eq!(pool.size(), 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn closing_the_queue_stops_idle_workers() {
    let h = Harness::new(Scripted::default());
    let pool = WorkerPool::spawn(h.orchestrator.clone(), CancellationToken::new());

    h.orchestrator.queue().close().await;
    tokio::time::timeout(Duration::from_secs(2), pool.join())
        .await
        .expect("workers exit once the queue is closed");
}
