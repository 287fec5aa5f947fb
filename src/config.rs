use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoutError};
use crate::scoring::Recommendation;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Task queue delivery settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of items waiting or leased at once.
    pub max_pending: usize,
    /// Deliveries allowed per job before it is dead-lettered.
    pub max_attempts: u32,
    /// How long a dequeued item stays invisible without a heartbeat.
    pub visibility_timeout: Duration,
    /// Upper bound on how long an idle consumer sleeps between checks.
    pub poll_interval: Duration,
    /// When set, queue contents are journaled here and recovered on start.
    pub journal_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending: 10_000,
            max_attempts: 3,
            visibility_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            journal_path: None,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent workers (one job each).
    pub concurrency: usize,
    /// Upper bound for a single collaborator call.
    pub stage_timeout: Duration,
    /// Time in-flight jobs get to finish once shutdown starts.
    pub grace_period: Duration,
    /// How often a busy worker extends its lease.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            stage_timeout: Duration::from_secs(10 * 60),
            grace_period: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

/// Candidate cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum age of a record before it must be re-extracted.
    pub freshness_window: Duration,
    /// Directory for the file-backed store. `None` keeps the cache in memory.
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(7 * SECS_PER_DAY),
            directory: None,
        }
    }
}

/// Retry policy applied around every collaborator call.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Fraction of the computed delay used as a random spread.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            jitter_ratio: 0.25,
        }
    }
}

/// Job-state retention and housekeeping.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Terminal jobs older than this are purged.
    pub job_ttl: Duration,
    pub housekeeping_interval: Duration,
    /// Directory for job-state records. `None` keeps job state in memory.
    pub directory: Option<PathBuf>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl: Duration::from_secs(SECS_PER_DAY),
            housekeeping_interval: Duration::from_secs(60),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionWeight {
    pub name: String,
    pub weight: f64,
}

impl CriterionWeight {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Lower bound (inclusive) of the aggregate score for a recommendation tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendationBand {
    pub min: f64,
    pub label: Recommendation,
}

/// Scoring weights and banding table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub criteria: Vec<CriterionWeight>,
    /// Sub-score used when a criterion is missing from the scorer output.
    pub neutral_score: f64,
    /// Ordered from the highest tier down. Anything below the last band is
    /// a reject.
    pub bands: Vec<RecommendationBand>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            criteria: vec![
                CriterionWeight::new("education", 0.20),
                CriterionWeight::new("career_trajectory", 0.20),
                CriterionWeight::new("company_relevance", 0.15),
                CriterionWeight::new("experience_match", 0.25),
                CriterionWeight::new("location_match", 0.10),
                CriterionWeight::new("tenure", 0.10),
            ],
            neutral_score: 5.0,
            bands: vec![
                RecommendationBand {
                    min: 9.0,
                    label: Recommendation::StrongMatch,
                },
                RecommendationBand {
                    min: 8.0,
                    label: Recommendation::GoodMatch,
                },
                RecommendationBand {
                    min: 7.0,
                    label: Recommendation::Consider,
                },
                RecommendationBand {
                    min: 6.0,
                    label: Recommendation::WeakMatch,
                },
            ],
        }
    }
}

impl ScoringConfig {
    /// Check weights, neutral score, and band ordering.
    pub fn validate(&self) -> Result<()> {
        use crate::scoring::{SCORE_MAX, SCORE_MIN};

        if self.criteria.is_empty() {
            return Err(ScoutError::Config("no scoring criteria".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for c in &self.criteria {
            if !seen.insert(c.name.as_str()) {
                return Err(ScoutError::Config(format!(
                    "duplicate criterion '{}'",
                    c.name
                )));
            }
            if !(0.0..=1.0).contains(&c.weight) {
                return Err(ScoutError::Config(format!(
                    "weight for '{}' outside [0, 1]: {}",
                    c.name, c.weight
                )));
            }
        }
        let total: f64 = self.criteria.iter().map(|c| c.weight).sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(ScoutError::Config(format!(
                "criterion weights sum to {total}, expected 1.0"
            )));
        }
        if !(SCORE_MIN..=SCORE_MAX).contains(&self.neutral_score) {
            return Err(ScoutError::Config(format!(
                "neutral score {} outside [{SCORE_MIN}, {SCORE_MAX}]",
                self.neutral_score
            )));
        }
        for pair in self.bands.windows(2) {
            if pair[0].min <= pair[1].min || pair[0].label <= pair[1].label {
                return Err(ScoutError::Config(
                    "recommendation bands must descend in both threshold and tier".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Top-level configuration for the whole pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub scoring: ScoringConfig,
    pub retention: RetentionConfig,
    /// Whether outreach is drafted unless a job overrides it.
    pub outreach_enabled: bool,
    /// Fraction of candidates per stage allowed to fail before the job fails.
    pub failure_tolerance: f64,
    /// Maximum concurrent candidate sub-steps within one job.
    pub fan_out: usize,
    /// HTTP API listen address. `None` disables the API.
    pub api_addr: Option<SocketAddr>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let worker = WorkerConfig::default();
        Self {
            fan_out: worker.concurrency,
            queue: QueueConfig::default(),
            worker,
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            scoring: ScoringConfig::default(),
            retention: RetentionConfig::default(),
            outreach_enabled: true,
            failure_tolerance: 0.5,
            api_addr: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_workers(mut self, concurrency: usize) -> Self {
        self.worker.concurrency = concurrency;
        self
    }

    pub fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_failure_tolerance(mut self, tolerance: f64) -> Self {
        self.failure_tolerance = tolerance;
        self
    }

    pub fn with_outreach(mut self, enabled: bool) -> Self {
        self.outreach_enabled = enabled;
        self
    }

    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.cache.freshness_window = window;
        self
    }

    pub fn with_api_addr(mut self, addr: SocketAddr) -> Self {
        self.api_addr = Some(addr);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(ScoutError::Config("worker concurrency must be > 0".to_string()));
        }
        if self.fan_out == 0 {
            return Err(ScoutError::Config("fan-out must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.failure_tolerance) {
            return Err(ScoutError::Config(format!(
                "failure tolerance outside [0, 1]: {}",
                self.failure_tolerance
            )));
        }
        if self.queue.max_attempts == 0 || self.retry.max_attempts == 0 {
            return Err(ScoutError::Config("attempt limits must be > 0".to_string()));
        }
        if self.worker.heartbeat_interval >= self.queue.visibility_timeout {
            return Err(ScoutError::Config(
                "heartbeat interval must be shorter than the visibility timeout".to_string(),
            ));
        }
        self.scoring.validate()
    }
}
