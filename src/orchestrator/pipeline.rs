use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use uuid::Uuid;

use super::progress;
use super::Orchestrator;
use crate::cache::CacheEntry;
use crate::candidate::{neutral_message, CandidateRecord, OutreachArtifact};
use crate::collaborators::{CollaboratorError, JobContext, SearchQuery, Stage};
use crate::error::{ErrorKind, FatalReason, Result, ScoutError};
use crate::identity::CandidateId;
use crate::scheduler::{
    CandidateFailure, CandidateResult, JobError, JobStage, JobSummary, Lease, StageTimings,
};

/// How a delivery of a job ended, from the queue's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Failed(JobError),
    /// Transient failure. The job goes back to the queue.
    Retry(String),
    /// The job was already terminal or no longer exists.
    Skipped,
}

impl JobOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, JobOutcome::Retry(_))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn candidate_failure(
    profile_url: &str,
    candidate: Option<&CandidateId>,
    err: &CollaboratorError,
) -> CandidateFailure {
    CandidateFailure {
        profile_url: profile_url.to_string(),
        candidate: candidate.map(|c| c.to_string()),
        stage: err.stage(),
        kind: err.kind(),
        reason: err.to_string(),
    }
}

impl Orchestrator {
    /// Run one delivery of a leased job to a terminal state, or report that
    /// it should be retried.
    pub async fn process(&self, lease: &Lease) -> JobOutcome {
        let id = lease.job_id();
        match self.run_pipeline(lease).await {
            Ok(outcome) => outcome,
            Err(ScoutError::JobTerminal(_)) | Err(ScoutError::JobNotFound(_)) => {
                tracing::debug!(job_id = %id, "Job already settled, skipping delivery");
                JobOutcome::Skipped
            }
            Err(ScoutError::JobFatal { reason, detail }) => {
                match self.fail_job(id, reason, detail).await {
                    Ok(error) => JobOutcome::Failed(error),
                    Err(ScoutError::JobTerminal(_)) => JobOutcome::Skipped,
                    Err(e) => JobOutcome::Retry(e.to_string()),
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Pipeline error, job will be retried");
                JobOutcome::Retry(e.to_string())
            }
        }
    }

    async fn checkpoint(&self, id: Uuid) -> Result<()> {
        if self.jobs.is_cancel_requested(&id).await {
            return Err(ScoutError::fatal(
                FatalReason::Cancelled,
                "cancelled by request",
            ));
        }
        Ok(())
    }

    async fn report_progress(&self, id: Uuid, value: u8) -> Result<()> {
        self.jobs
            .update(&id, move |job| {
                job.set_progress(value);
                Ok(())
            })
            .await
    }

    /// `k` failures out of `n` must not exceed `floor(n * failure_tolerance)`.
    fn check_tolerance(&self, stage: Stage, n: usize, k: usize) -> Result<()> {
        let allowed = (n as f64 * self.config.failure_tolerance).floor() as usize;
        if k > allowed {
            return Err(ScoutError::fatal(
                FatalReason::FailureToleranceExceeded,
                format!("{k} of {n} candidates failed at {stage} stage, {allowed} allowed"),
            ));
        }
        Ok(())
    }

    async fn run_pipeline(&self, lease: &Lease) -> Result<JobOutcome> {
        let id = lease.job_id();
        let attempts = lease.item.attempts;
        let job = self
            .jobs
            .update(&id, move |job| {
                if job.stage != JobStage::Pending {
                    job.restart()?;
                }
                job.attempts = attempts;
                job.advance(JobStage::Searching)?;
                job.set_progress(progress::SEARCHING);
                Ok(job.clone())
            })
            .await?;
        tracing::info!(job_id = %id, attempt = attempts, method = %job.input.method, "Job started");

        let context = JobContext {
            job_id: id,
            description: job.input.description.clone(),
            method: job.input.method.clone(),
            outreach_kind: job.input.options.outreach_kind,
        };
        let mut timings = StageTimings::default();

        // Search
        self.checkpoint(id).await?;
        let started = Instant::now();
        let query = SearchQuery {
            description: job.input.description.clone(),
            method: job.input.method.clone(),
            limit: job.input.limit,
        };
        let searcher = &self.collaborators.searcher;
        let q = &query;
        let urls = match self.retry.run(Stage::Search, move || searcher.search(q)).await {
            Ok(urls) => urls,
            Err(e) if e.is_transient() => {
                tracing::warn!(job_id = %id, error = %e, "Search unavailable");
                return Ok(JobOutcome::Retry(e.to_string()));
            }
            Err(e) => return Err(ScoutError::fatal(FatalReason::SearchFailed, e.to_string())),
        };
        timings.search_ms = elapsed_ms(started);

        let mut seen = HashSet::new();
        let mut discovered = Vec::new();
        let mut resolved = Vec::new();
        let mut unresolvable = Vec::new();
        for url in urls {
            if discovered.len() >= job.input.limit {
                break;
            }
            match CandidateId::from_profile_url(&url) {
                Ok(candidate) => {
                    if !seen.insert(candidate.clone()) {
                        tracing::debug!(job_id = %id, candidate = %candidate, "Dropping duplicate profile");
                        continue;
                    }
                    discovered.push(url.clone());
                    resolved.push((url, candidate));
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, url = %url, error = %e, "Unresolvable profile URL");
                    discovered.push(url.clone());
                    unresolvable.push(CandidateFailure {
                        profile_url: url,
                        candidate: None,
                        stage: Stage::Search,
                        kind: ErrorKind::PermanentCandidate,
                        reason: e.to_string(),
                    });
                }
            }
        }
        let total = discovered.len();
        tracing::info!(job_id = %id, candidates = total, "Search finished");

        if total == 0 {
            let summary = JobSummary {
                total_candidates: 0,
                scored: 0,
                passed: 0,
                failed_extractions: 0,
                failed_scoring: 0,
                pass_rate: 0.0,
                method: job.input.method.clone(),
                timings,
            };
            self.jobs.update(&id, move |job| job.complete(summary)).await?;
            self.jobs.clear_cancel(&id).await;
            tracing::info!(job_id = %id, "No candidates found, job completed");
            return Ok(JobOutcome::Completed);
        }

        // Extract
        self.checkpoint(id).await?;
        let recorded_urls = discovered.clone();
        self.jobs
            .update(&id, move |job| {
                job.discovered = recorded_urls;
                job.advance(JobStage::Extracting)?;
                job.set_progress(progress::EXTRACT_START);
                Ok(())
            })
            .await?;
        let started = Instant::now();
        let to_extract = resolved.len();
        let mut records: Vec<CandidateRecord> = Vec::with_capacity(to_extract);
        let mut extract_failures = unresolvable;
        let mut done = 0;
        let mut extractions = stream::iter(resolved)
            .map(|(url, candidate)| self.resolve_candidate(id, url, candidate))
            .buffered(self.config.fan_out);
        while let Some(outcome) = extractions.next().await {
            done += 1;
            let mut extracted = None;
            match outcome {
                Some(Ok(record)) => {
                    extracted = Some(record.clone());
                    records.push(record);
                }
                Some(Err(failure)) => extract_failures.push(failure),
                None => {}
            }
            let value = progress::scaled(progress::EXTRACT_START, progress::EXTRACT_END, done, to_extract);
            self.jobs
                .update(&id, move |job| {
                    job.records.extend(extracted);
                    job.set_progress(value);
                    Ok(())
                })
                .await?;
        }
        drop(extractions);
        timings.extract_ms = elapsed_ms(started);

        let failed_extractions = extract_failures.len();
        self.jobs
            .update(&id, move |job| {
                job.failures.extend(extract_failures);
                Ok(())
            })
            .await?;
        self.checkpoint(id).await?;
        self.check_tolerance(Stage::Extract, total, failed_extractions)?;

        // Score
        self.jobs
            .update(&id, |job| {
                job.advance(JobStage::Scoring)?;
                job.set_progress(progress::SCORING);
                Ok(())
            })
            .await?;
        let started = Instant::now();
        let ctx = &context;
        let scored: Vec<_> = stream::iter(records.clone())
            .map(|record| async move { self.score_candidate(ctx, &record).await })
            .buffered(self.config.fan_out)
            .collect()
            .await;
        timings.score_ms = elapsed_ms(started);

        let mut results = Vec::with_capacity(scored.len());
        let mut score_failures = Vec::new();
        for outcome in scored.into_iter().flatten() {
            match outcome {
                Ok(result) => results.push(result),
                Err(failure) => score_failures.push(failure),
            }
        }
        results.sort_by(|a, b| b.score.aggregate.total_cmp(&a.score.aggregate));
        let failed_scoring = score_failures.len();
        let partial = results.clone();
        self.jobs
            .update(&id, move |job| {
                job.failures.extend(score_failures);
                job.results = partial;
                Ok(())
            })
            .await?;
        self.checkpoint(id).await?;
        self.check_tolerance(Stage::Score, records.len(), failed_scoring)?;

        // Outreach
        let outreach_enabled = job
            .input
            .options
            .outreach
            .unwrap_or(self.config.outreach_enabled);
        if outreach_enabled && !results.is_empty() {
            self.jobs
                .update(&id, |job| {
                    job.advance(JobStage::GeneratingOutreach)?;
                    job.set_progress(progress::OUTREACH_START);
                    Ok(())
                })
                .await?;
            let started = Instant::now();
            let to_draft = results.len();
            let mut drafted = Vec::with_capacity(to_draft);
            let mut drafts = stream::iter(results)
                .map(|result| self.draft_outreach(ctx, result))
                .buffered(self.config.fan_out);
            while let Some(result) = drafts.next().await {
                drafted.push(result);
                let value = progress::scaled(
                    progress::OUTREACH_START,
                    progress::OUTREACH_END,
                    drafted.len(),
                    to_draft,
                );
                self.report_progress(id, value).await?;
            }
            drop(drafts);
            timings.outreach_ms = elapsed_ms(started);
            results = drafted;
            self.checkpoint(id).await?;
        }

        let passed = results
            .iter()
            .filter(|r| r.score.recommendation.passed())
            .count();
        let summary = JobSummary {
            total_candidates: total,
            scored: results.len(),
            passed,
            failed_extractions,
            failed_scoring,
            pass_rate: if results.is_empty() {
                0.0
            } else {
                passed as f64 / results.len() as f64
            },
            method: job.input.method.clone(),
            timings,
        };
        let scored_count = results.len();
        self.jobs
            .update(&id, move |job| {
                job.results = results;
                job.complete(summary)
            })
            .await?;
        self.jobs.clear_cancel(&id).await;
        tracing::info!(
            job_id = %id,
            candidates = total,
            scored = scored_count,
            passed,
            "Job completed"
        );
        Ok(JobOutcome::Completed)
    }

    /// Fresh cache entry, or a new extraction written back to the cache.
    /// `None` means the job was cancelled before this candidate started.
    async fn resolve_candidate(
        &self,
        job_id: Uuid,
        url: String,
        candidate: CandidateId,
    ) -> Option<std::result::Result<CandidateRecord, CandidateFailure>> {
        if self.jobs.is_cancel_requested(&job_id).await {
            return None;
        }

        let cached = match self.cache.get(&candidate).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(candidate = %candidate, error = %e, "Cache read failed, treating as miss");
                None
            }
        };
        if let Some(entry) = &cached {
            if entry.is_fresh(Utc::now(), self.config.cache.freshness_window) {
                tracing::debug!(job_id = %job_id, candidate = %candidate, "Cache hit");
                return Some(Ok(entry.record.clone()));
            }
        }

        let extractor = &self.collaborators.extractor;
        let profile_url = url.as_str();
        let extracted = self
            .retry
            .run(Stage::Extract, move || extractor.extract(profile_url))
            .await
            .and_then(|attributes| {
                attributes
                    .validate()
                    .map_err(|detail| CollaboratorError::Malformed {
                        stage: Stage::Extract,
                        detail,
                    })?;
                Ok(attributes)
            });

        match extracted {
            Ok(attributes) => {
                let record = CandidateRecord::new(candidate, url, attributes, Utc::now());
                if let Err(e) = self.cache.put(CacheEntry::new(record.clone())).await {
                    tracing::warn!(candidate = %record.id, error = %e, "Cache write failed");
                }
                Some(Ok(record))
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    candidate = %candidate,
                    stale_retained = cached.is_some(),
                    error = %e,
                    "Extraction failed, dropping candidate"
                );
                Some(Err(candidate_failure(&url, Some(&candidate), &e)))
            }
        }
    }

    async fn score_candidate(
        &self,
        context: &JobContext,
        record: &CandidateRecord,
    ) -> Option<std::result::Result<CandidateResult, CandidateFailure>> {
        if self.jobs.is_cancel_requested(&context.job_id).await {
            return None;
        }

        let scorer = &self.collaborators.scorer;
        let scored = self
            .retry
            .run(Stage::Score, move || scorer.score(record, context))
            .await
            .and_then(|raw| self.scoring.aggregate(&record.id, &raw));

        Some(match scored {
            Ok(score) => Ok(CandidateResult {
                record: record.clone(),
                score,
            }),
            Err(e) => {
                tracing::warn!(
                    job_id = %context.job_id,
                    candidate = %record.id,
                    error = %e,
                    "Scoring failed, dropping candidate"
                );
                Err(candidate_failure(&record.profile_url, Some(&record.id), &e))
            }
        })
    }

    /// Attach outreach to a result. Collaborator failures fall back to a
    /// neutral message and never drop the candidate.
    async fn draft_outreach(&self, context: &JobContext, result: CandidateResult) -> CandidateResult {
        if self.jobs.is_cancel_requested(&context.job_id).await {
            return result;
        }

        let writer = &self.collaborators.outreach;
        let record = &result.record;
        let drafted = self
            .retry
            .run(Stage::Outreach, move || writer.draft(record, context))
            .await;
        let (message, fallback) = match drafted {
            Ok(message) if !message.trim().is_empty() => (message, false),
            Ok(_) => {
                tracing::warn!(candidate = %record.id, "Empty outreach draft, using fallback message");
                (neutral_message(&record.attributes), true)
            }
            Err(e) => {
                tracing::warn!(candidate = %record.id, error = %e, "Outreach failed, using fallback message");
                (neutral_message(&record.attributes), true)
            }
        };

        let artifact = OutreachArtifact {
            message,
            kind: context.outreach_kind,
            generated_at: Utc::now(),
            context: context.label(),
            fallback,
        };
        CandidateResult {
            record: result.record.with_outreach(artifact),
            score: result.score,
        }
    }
}
