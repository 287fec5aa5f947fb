use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::heartbeat::LeaseHeartbeat;
use crate::error::{FatalReason, ScoutError};
use crate::orchestrator::{JobOutcome, Orchestrator};
use crate::scheduler::{Lease, NackOutcome};

/// Fixed set of workers pulling jobs from the orchestrator's queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Start `concurrency` workers. They stop dequeuing as soon as `shutdown`
    /// is cancelled and give in-flight jobs the configured grace period.
    pub fn spawn(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) -> Self {
        let concurrency = orchestrator.config().worker.concurrency;
        let handles = (0..concurrency)
            .map(|index| {
                let worker = Worker {
                    name: format!("worker-{index}"),
                    orchestrator: orchestrator.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        tracing::info!(workers = concurrency, "Worker pool started");
        Self { handles, shutdown }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Signal shutdown and wait for every worker to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

struct Worker {
    name: String,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let queue = self.orchestrator.queue().clone();
        loop {
            let lease = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                lease = queue.dequeue(&self.name) => lease,
            };
            let lease = match lease {
                Ok(Some(lease)) => lease,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(worker = %self.name, error = %e, "Dequeue failed");
                    tokio::time::sleep(queue.config().poll_interval).await;
                    continue;
                }
            };
            self.handle(lease).await;
        }
        tracing::debug!(worker = %self.name, "Worker exiting");
    }

    async fn handle(&self, lease: Lease) {
        let job_id = lease.job_id();
        tracing::debug!(worker = %self.name, job_id = %job_id, attempt = lease.item.attempts, "Dequeued job");

        let config = &self.orchestrator.config().worker;
        let heartbeat = LeaseHeartbeat::new(
            config.heartbeat_interval,
            self.orchestrator.queue().clone(),
            lease.lease_id,
        )
        .spawn();

        let outcome = self.run_with_grace(&lease, config.grace_period).await;
        heartbeat.cancel();

        match outcome {
            Some(outcome) if outcome.should_ack() => {
                if let Err(e) = self.orchestrator.queue().ack(lease.lease_id).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Ack failed");
                }
            }
            Some(JobOutcome::Retry(reason)) => self.give_back(&lease, reason).await,
            Some(_) => {}
            None => {
                tracing::warn!(job_id = %job_id, "Grace period elapsed, returning job to queue");
                self.give_back(&lease, "worker shut down".to_string()).await;
            }
        }
    }

    /// Process the job on its own task. Once shutdown starts the job gets
    /// `grace` to finish; `None` means it did not. A panic in the job is
    /// reported as a retry so the worker keeps running.
    async fn run_with_grace(&self, lease: &Lease, grace: Duration) -> Option<JobOutcome> {
        let orchestrator = self.orchestrator.clone();
        let leased = lease.clone();
        let mut task = tokio::spawn(async move { orchestrator.process(&leased).await });
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = self.shutdown.cancelled() => {
                match tokio::time::timeout(grace, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        task.abort();
                        return None;
                    }
                }
            }
        };
        match joined {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(worker = %self.name, job_id = %lease.job_id(), error = %e, "Job task panicked");
                Some(JobOutcome::Retry(format!("job task failed: {e}")))
            }
        }
    }

    async fn give_back(&self, lease: &Lease, reason: String) {
        let job_id = lease.job_id();
        match self.orchestrator.queue().nack(lease.lease_id, reason.clone()).await {
            Ok(NackOutcome::Requeued { attempts }) => {
                tracing::info!(job_id = %job_id, attempts, reason = %reason, "Job requeued");
            }
            Ok(NackOutcome::Exhausted(item)) => {
                let detail = format!("gave up after {} deliveries: {reason}", item.attempts);
                match self
                    .orchestrator
                    .fail_job(job_id, FatalReason::MaxRetriesExceeded, detail)
                    .await
                {
                    Ok(_) | Err(ScoutError::JobTerminal(_)) => {}
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to record exhausted job");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Nack failed");
            }
        }
    }
}
