//! Job lifecycle: submission, status and result queries, cancellation, and
//! driving a leased job through the pipeline (see [`pipeline`]).

mod pipeline;
pub mod progress;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::cache::SharedCache;
use crate::collaborators::{Collaborators, RetryPolicy};
use crate::config::PipelineConfig;
use crate::error::{FatalReason, Result, ScoutError};
use crate::scheduler::{
    Job, JobError, JobInput, JobResult, JobStage, JobStatus, JobStatusView, JobStore, TaskQueue,
};
use crate::scoring::ScoringPolicy;

pub use pipeline::JobOutcome;

/// What a housekeeping pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub reaped_leases: usize,
    pub dead_lettered: usize,
    pub purged_jobs: usize,
}

pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    collaborators: Collaborators,
    cache: SharedCache,
    queue: Arc<TaskQueue>,
    jobs: Arc<JobStore>,
    retry: RetryPolicy,
    scoring: ScoringPolicy,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        cache: SharedCache,
        queue: Arc<TaskQueue>,
        jobs: Arc<JobStore>,
    ) -> Result<Self> {
        config.validate()?;
        let retry = RetryPolicy::new(&config.retry, config.worker.stage_timeout);
        let scoring = ScoringPolicy::new(&config.scoring)?;
        tracing::debug!(
            max_attempts = retry.max_attempts(),
            call_timeout_ms = config.worker.stage_timeout.as_millis() as u64,
            fan_out = config.fan_out,
            "Orchestrator ready"
        );
        Ok(Self {
            config: Arc::new(config),
            collaborators,
            cache,
            queue,
            jobs,
            retry,
            scoring,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Validate, record, and enqueue a new job.
    pub async fn submit_job(&self, input: JobInput) -> Result<Uuid> {
        input.validate()?;
        let priority = input.options.priority;
        let job = Job::new(input);
        let id = job.id;
        self.jobs.insert(job).await?;

        if let Err(e) = self.queue.enqueue(id, priority).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to enqueue job, discarding");
            self.jobs.remove(&id).await?;
            return Err(e);
        }
        tracing::info!(job_id = %id, priority = %priority, "Job submitted");
        Ok(id)
    }

    pub async fn get_status(&self, id: Uuid) -> Result<JobStatusView> {
        self.jobs
            .get(&id)
            .await
            .map(|job| job.status_view())
            .ok_or(ScoutError::JobNotFound(id))
    }

    /// Final results of a completed job.
    pub async fn get_result(&self, id: Uuid) -> Result<JobResult> {
        let job = self.jobs.get(&id).await.ok_or(ScoutError::JobNotFound(id))?;
        if job.status() != JobStatus::Completed {
            return Err(ScoutError::JobNotComplete(id, job.status()));
        }
        Ok(job.result_view())
    }

    pub async fn list_jobs(&self) -> Vec<JobStatusView> {
        self.jobs
            .list()
            .await
            .iter()
            .map(Job::status_view)
            .collect()
    }

    /// Pending jobs fail at once; running jobs stop at the next checkpoint.
    pub async fn cancel_job(&self, id: Uuid) -> Result<JobStatusView> {
        let job = self.jobs.get(&id).await.ok_or(ScoutError::JobNotFound(id))?;
        if job.is_terminal() {
            return Err(ScoutError::JobTerminal(id));
        }

        if job.stage == JobStage::Pending {
            self.fail_job(id, FatalReason::Cancelled, "cancelled before start")
                .await?;
        } else {
            self.jobs.request_cancel(id).await;
            tracing::info!(job_id = %id, stage = %job.stage, "Cancellation requested");
        }
        self.get_status(id).await
    }

    /// Move a job to `failed`, keeping any partial results.
    pub async fn fail_job(
        &self,
        id: Uuid,
        reason: FatalReason,
        message: impl Into<String>,
    ) -> Result<JobError> {
        let error = JobError::fatal(reason, message);
        let recorded = error.clone();
        self.jobs.update(&id, move |job| job.fail(recorded)).await?;
        self.jobs.clear_cancel(&id).await;
        tracing::warn!(job_id = %id, reason = %error.reason, error = %error.message, "Job failed");
        Ok(error)
    }

    /// Reap expired leases, fail dead-lettered jobs, and purge old records.
    pub async fn housekeeping(&self) -> Result<HousekeepingReport> {
        let reaped_leases = self.queue.reap_expired().await?;

        let dead = self.queue.drain_dead_letters().await?;
        let dead_lettered = dead.len();
        for item in dead {
            let detail = format!(
                "gave up after {} deliveries: {}",
                item.attempts,
                item.last_error.as_deref().unwrap_or("unknown error")
            );
            match self
                .fail_job(item.job_id, FatalReason::MaxRetriesExceeded, detail)
                .await
            {
                Ok(_) | Err(ScoutError::JobTerminal(_)) | Err(ScoutError::JobNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let purged_jobs = self
            .jobs
            .purge_expired(self.config.retention.job_ttl, Utc::now())
            .await?;

        Ok(HousekeepingReport {
            reaped_leases,
            dead_lettered,
            purged_jobs,
        })
    }
}
