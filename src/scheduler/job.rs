use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::candidate::{CandidateRecord, MessageKind, OutreachArtifact};
use crate::collaborators::{SearchMethod, Stage};
use crate::error::{ErrorKind, FatalReason, Result, ScoutError};
use crate::orchestrator::progress;
use crate::scoring::ScoreResult;

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline position of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Pending,
    Searching,
    Extracting,
    Scoring,
    GeneratingOutreach,
    Completed,
    Failed,
}

impl JobStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }

    pub fn status(self) -> JobStatus {
        match self {
            JobStage::Pending => JobStatus::Pending,
            JobStage::Completed => JobStatus::Completed,
            JobStage::Failed => JobStatus::Failed,
            _ => JobStatus::Running,
        }
    }

    pub fn can_transition_to(self, next: JobStage) -> bool {
        use JobStage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Searching) => true,
            (Searching, Extracting) | (Searching, Completed) => true,
            (Extracting, Scoring) => true,
            (Scoring, GeneratingOutreach) | (Scoring, Completed) => true,
            (GeneratingOutreach, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStage::Pending => write!(f, "pending"),
            JobStage::Searching => write!(f, "searching"),
            JobStage::Extracting => write!(f, "extracting"),
            JobStage::Scoring => write!(f, "scoring"),
            JobStage::GeneratingOutreach => write!(f, "generating_outreach"),
            JobStage::Completed => write!(f, "completed"),
            JobStage::Failed => write!(f, "failed"),
        }
    }
}

/// Queue tier. Declared low to high so the derived ordering ranks tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Overrides the pipeline-wide outreach setting for this job.
    #[serde(default)]
    pub outreach: Option<bool>,
    #[serde(default)]
    pub outreach_kind: MessageKind,
    #[serde(default)]
    pub priority: Priority,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub description: String,
    #[serde(default)]
    pub method: SearchMethod,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub options: JobOptions,
}

impl JobInput {
    pub fn new(description: impl Into<String>, method: SearchMethod, limit: usize) -> Self {
        Self {
            description: description.into(),
            method,
            limit,
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(ScoutError::InvalidInput(
                "job description must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(ScoutError::InvalidInput(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        Ok(())
    }
}

/// Terminal error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub reason: FatalReason,
    pub message: String,
}

impl JobError {
    pub fn fatal(reason: FatalReason, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::JobFatal,
            reason,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.reason, self.message)
    }
}

/// A candidate dropped from a job run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub profile_url: String,
    /// Identity, when the URL could be resolved to one.
    pub candidate: Option<String>,
    pub stage: Stage,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub search_ms: u64,
    pub extract_ms: u64,
    pub score_ms: u64,
    pub outreach_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub total_candidates: usize,
    pub scored: usize,
    /// Candidates at `consider` or above.
    pub passed: usize,
    pub failed_extractions: usize,
    pub failed_scoring: usize,
    pub pass_rate: f64,
    pub method: SearchMethod,
    pub timings: StageTimings,
}

/// One candidate's final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub record: CandidateRecord,
    pub score: ScoreResult,
}

impl CandidateResult {
    pub fn outreach(&self) -> Option<&OutreachArtifact> {
        self.record.outreach.as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub input: JobInput,
    pub stage: JobStage,
    pub progress: u8,
    /// Profile URLs returned by the search stage, deduplicated and truncated.
    pub discovered: Vec<String>,
    /// Records extracted so far, kept when a later stage fails the job.
    #[serde(default)]
    pub records: Vec<CandidateRecord>,
    pub results: Vec<CandidateResult>,
    pub failures: Vec<CandidateFailure>,
    pub summary: Option<JobSummary>,
    /// Number of times the job has been delivered to a worker.
    pub attempts: u32,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(input: JobInput) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            input,
            stage: JobStage::Pending,
            progress: 0,
            discovered: Vec::new(),
            records: Vec::new(),
            results: Vec::new(),
            failures: Vec::new(),
            summary: None,
            attempts: 0,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.stage.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Persisted key for this job's state record.
    pub fn storage_key(&self) -> String {
        format!("job:{}", self.id)
    }

    pub fn advance(&mut self, next: JobStage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(ScoutError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        if next == JobStage::Completed {
            self.progress = progress::COMPLETED;
        }
        Ok(())
    }

    /// Raise progress. Lower values are ignored.
    pub fn set_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(progress::COMPLETED));
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, summary: JobSummary) -> Result<()> {
        self.advance(JobStage::Completed)?;
        self.summary = Some(summary);
        Ok(())
    }

    /// Move to `failed`, keeping whatever partial results were produced.
    pub fn fail(&mut self, error: JobError) -> Result<()> {
        self.advance(JobStage::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Reset a redelivered job to the start of the pipeline. Progress is
    /// kept so that it never goes backwards.
    pub fn restart(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Err(ScoutError::JobTerminal(self.id));
        }
        self.stage = JobStage::Pending;
        self.discovered.clear();
        self.records.clear();
        self.results.clear();
        self.failures.clear();
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            status: self.status(),
            stage: self.stage,
            progress: self.progress,
            attempts: self.attempts,
            description: self.input.description.clone(),
            method: self.input.method.clone(),
            discovered: self.discovered.len(),
            records: self.records.clone(),
            results: self.results.clone(),
            failures: self.failures.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }

    pub fn result_view(&self) -> JobResult {
        JobResult {
            id: self.id,
            results: self.results.clone(),
            summary: self.summary.clone(),
        }
    }
}

/// Snapshot returned by status queries, including partial results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: u8,
    pub attempts: u32,
    pub description: String,
    pub method: SearchMethod,
    pub discovered: usize,
    #[serde(default)]
    pub records: Vec<CandidateRecord>,
    pub results: Vec<CandidateResult>,
    pub failures: Vec<CandidateFailure>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Final output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: Uuid,
    pub results: Vec<CandidateResult>,
    pub summary: Option<JobSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> JobInput {
        JobInput::new("Backend Engineer, Python, NYC", SearchMethod::RapidApi, 5)
    }

    #[test]
    fn happy_path_transitions() {
        let mut job = Job::new(input());
        assert_eq!(job.status(), JobStatus::Pending);
        for stage in [
            JobStage::Searching,
            JobStage::Extracting,
            JobStage::Scoring,
            JobStage::GeneratingOutreach,
        ] {
            job.advance(stage).unwrap();
            assert_eq!(job.status(), JobStatus::Running);
        }
        job.advance(JobStage::Completed).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn shortcuts_to_completed() {
        let mut job = Job::new(input());
        job.advance(JobStage::Searching).unwrap();
        job.advance(JobStage::Completed).unwrap();

        let mut job = Job::new(input());
        job.advance(JobStage::Searching).unwrap();
        job.advance(JobStage::Extracting).unwrap();
        job.advance(JobStage::Scoring).unwrap();
        job.advance(JobStage::Completed).unwrap();
    }

    #[test]
    fn rejects_skipping_and_leaving_terminal_states() {
        let mut job = Job::new(input());
        assert!(matches!(
            job.advance(JobStage::Scoring),
            Err(ScoutError::InvalidTransition { .. })
        ));
        job.fail(JobError::fatal(FatalReason::Internal, "boom")).unwrap();
        assert!(job.advance(JobStage::Searching).is_err());
        assert!(job.advance(JobStage::Failed).is_err());
        assert!(job.restart().is_err());
    }

    #[test]
    fn failed_absorbs_from_any_running_stage() {
        for stage in [JobStage::Searching, JobStage::Extracting, JobStage::Scoring] {
            assert!(stage.can_transition_to(JobStage::Failed));
        }
        assert!(JobStage::Pending.can_transition_to(JobStage::Failed));
        assert!(!JobStage::Completed.can_transition_to(JobStage::Failed));
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = Job::new(input());
        job.set_progress(40);
        job.set_progress(15);
        assert_eq!(job.progress, 40);
        job.set_progress(250);
        assert_eq!(job.progress, progress::COMPLETED);
    }

    #[test]
    fn restart_keeps_progress() {
        let mut job = Job::new(input());
        job.advance(JobStage::Searching).unwrap();
        job.advance(JobStage::Extracting).unwrap();
        job.set_progress(55);
        job.discovered.push("https://linkedin.com/in/a".to_string());
        let id = crate::identity::CandidateId::from_profile_url("https://linkedin.com/in/a").unwrap();
        job.records.push(CandidateRecord::new(
            id,
            "https://linkedin.com/in/a",
            Default::default(),
            Utc::now(),
        ));
        job.restart().unwrap();
        assert_eq!(job.stage, JobStage::Pending);
        assert_eq!(job.progress, 55);
        assert!(job.discovered.is_empty());
        assert!(job.records.is_empty());
        job.advance(JobStage::Searching).unwrap();
    }

    #[test]
    fn input_validation() {
        assert!(input().validate().is_ok());
        let mut bad = input();
        bad.description = "   ".to_string();
        assert!(matches!(bad.validate(), Err(ScoutError::InvalidInput(_))));
        let mut bad = input();
        bad.limit = 0;
        assert!(bad.validate().is_err());
        bad.limit = MAX_LIMIT + 1;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn input_defaults_when_deserializing() {
        let input: JobInput = serde_json::from_str(r#"{"description": "Rust dev"}"#).unwrap();
        assert_eq!(input.limit, DEFAULT_LIMIT);
        assert_eq!(input.method, SearchMethod::RapidApi);
        assert_eq!(input.options.priority, Priority::Normal);
        assert_eq!(input.options.outreach, None);
    }

    #[test]
    fn storage_key_uses_job_prefix() {
        let job = Job::new(input());
        assert_eq!(job.storage_key(), format!("job:{}", job.id));
    }
}
