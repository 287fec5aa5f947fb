//! Boundaries to the external collaborators that do the actual sourcing work.
//!
//! Each stage of the pipeline calls exactly one trait here:
//!
//! - [`Searcher`]: job description → ordered candidate profile URLs
//! - [`Extractor`]: profile URL → [`ProfileAttributes`]
//! - [`Scorer`]: candidate record → raw [`CriterionScores`]
//! - [`OutreachWriter`]: candidate record → message text
//!
//! Implementations report failures as [`CollaboratorError`], which carries
//! whether the failure is worth retrying. The orchestrator wraps every call
//! in a [`RetryPolicy`](retry::RetryPolicy) and never sees untyped payloads.

pub mod fixture;
pub mod retry;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::candidate::{CandidateRecord, MessageKind, ProfileAttributes};
use crate::error::ErrorKind;
use crate::scoring::CriterionScores;

pub use retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Extract,
    Score,
    Outreach,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Search => write!(f, "search"),
            Stage::Extract => write!(f, "extract"),
            Stage::Score => write!(f, "score"),
            Stage::Outreach => write!(f, "outreach"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("search provider unavailable: {0}")]
    SearchUnavailable(String),

    #[error("extraction failed: {reason}")]
    ExtractionFailed { reason: String, retryable: bool },

    #[error("scoring failed: {reason}")]
    ScoringFailed { reason: String, retryable: bool },

    #[error("outreach failed: {reason}")]
    OutreachFailed { reason: String, retryable: bool },

    #[error("{stage} call timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("malformed {stage} payload: {detail}")]
    Malformed { stage: Stage, detail: String },
}

impl CollaboratorError {
    /// A failure the collaborator expects to clear up on its own.
    pub fn transient(stage: Stage, reason: impl Into<String>) -> Self {
        Self::for_stage(stage, reason.into(), true)
    }

    /// A failure that will recur no matter how often the call is repeated.
    pub fn permanent(stage: Stage, reason: impl Into<String>) -> Self {
        Self::for_stage(stage, reason.into(), false)
    }

    fn for_stage(stage: Stage, reason: String, retryable: bool) -> Self {
        match stage {
            Stage::Search if retryable => CollaboratorError::SearchUnavailable(reason),
            Stage::Search => CollaboratorError::Malformed {
                stage,
                detail: reason,
            },
            Stage::Extract => CollaboratorError::ExtractionFailed { reason, retryable },
            Stage::Score => CollaboratorError::ScoringFailed { reason, retryable },
            Stage::Outreach => CollaboratorError::OutreachFailed { reason, retryable },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            CollaboratorError::SearchUnavailable(_) => Stage::Search,
            CollaboratorError::ExtractionFailed { .. } => Stage::Extract,
            CollaboratorError::ScoringFailed { .. } => Stage::Score,
            CollaboratorError::OutreachFailed { .. } => Stage::Outreach,
            CollaboratorError::Timeout { stage, .. } => *stage,
            CollaboratorError::Malformed { stage, .. } => *stage,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            CollaboratorError::SearchUnavailable(_) | CollaboratorError::Timeout { .. } => true,
            CollaboratorError::ExtractionFailed { retryable, .. }
            | CollaboratorError::ScoringFailed { retryable, .. }
            | CollaboratorError::OutreachFailed { retryable, .. } => *retryable,
            CollaboratorError::Malformed { .. } => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            ErrorKind::TransientCollaborator
        } else {
            ErrorKind::PermanentCandidate
        }
    }
}

/// How candidates are discovered. Unrecognised names are kept verbatim so
/// custom providers can be routed by the configured searcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SearchMethod {
    #[default]
    RapidApi,
    GoogleCrawler,
    Playwright,
    PlaywrightTwoPhase,
    Other(String),
}

impl SearchMethod {
    pub fn as_str(&self) -> &str {
        match self {
            SearchMethod::RapidApi => "rapid_api",
            SearchMethod::GoogleCrawler => "google_crawler",
            SearchMethod::Playwright => "playwright",
            SearchMethod::PlaywrightTwoPhase => "playwright_two_phase",
            SearchMethod::Other(name) => name,
        }
    }
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err("search method must not be empty".to_string());
        }
        Ok(match normalized.as_str() {
            "rapid_api" => SearchMethod::RapidApi,
            "google_crawler" => SearchMethod::GoogleCrawler,
            "playwright" | "playwright_crawler" => SearchMethod::Playwright,
            "playwright_two_phase" => SearchMethod::PlaywrightTwoPhase,
            _ => SearchMethod::Other(normalized),
        })
    }
}

impl Serialize for SearchMethod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SearchMethod {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Search request handed to the [`Searcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub description: String,
    pub method: SearchMethod,
    pub limit: usize,
}

/// What a job is sourcing for, passed to scoring and outreach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub job_id: Uuid,
    pub description: String,
    pub method: SearchMethod,
    pub outreach_kind: MessageKind,
}

impl JobContext {
    /// Short label recorded on outreach artifacts.
    pub fn label(&self) -> String {
        format!("job {} via {}", self.job_id, self.method)
    }
}

#[async_trait]
pub trait Searcher: Send + Sync {
    /// Ordered candidate profile URLs. An empty list is a valid answer.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, CollaboratorError>;
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, profile_url: &str) -> Result<ProfileAttributes, CollaboratorError>;
}

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(
        &self,
        record: &CandidateRecord,
        context: &JobContext,
    ) -> Result<CriterionScores, CollaboratorError>;
}

#[async_trait]
pub trait OutreachWriter: Send + Sync {
    async fn draft(
        &self,
        record: &CandidateRecord,
        context: &JobContext,
    ) -> Result<String, CollaboratorError>;
}

/// The four collaborators a pipeline run needs.
#[derive(Clone)]
pub struct Collaborators {
    pub searcher: Arc<dyn Searcher>,
    pub extractor: Arc<dyn Extractor>,
    pub scorer: Arc<dyn Scorer>,
    pub outreach: Arc<dyn OutreachWriter>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_method_parses_known_and_custom_names() {
        assert_eq!("rapid_api".parse::<SearchMethod>().unwrap(), SearchMethod::RapidApi);
        assert_eq!(
            "Playwright_Crawler".parse::<SearchMethod>().unwrap(),
            SearchMethod::Playwright
        );
        assert_eq!(
            "provider_A".parse::<SearchMethod>().unwrap(),
            SearchMethod::Other("provider_a".to_string())
        );
        assert!("  ".parse::<SearchMethod>().is_err());
    }

    #[test]
    fn search_method_serializes_as_string() {
        let json = serde_json::to_string(&SearchMethod::GoogleCrawler).unwrap();
        assert_eq!(json, "\"google_crawler\"");
        let back: SearchMethod = serde_json::from_str("\"provider_b\"").unwrap();
        assert_eq!(back, SearchMethod::Other("provider_b".to_string()));
    }

    #[test]
    fn error_classification() {
        let transient = CollaboratorError::transient(Stage::Extract, "rate limited");
        assert!(transient.is_transient());
        assert_eq!(transient.kind(), ErrorKind::TransientCollaborator);
        assert_eq!(transient.stage(), Stage::Extract);

        let permanent = CollaboratorError::permanent(Stage::Score, "bad json");
        assert!(!permanent.is_transient());
        assert_eq!(permanent.kind(), ErrorKind::PermanentCandidate);

        assert!(CollaboratorError::transient(Stage::Search, "outage").is_transient());
        assert!(CollaboratorError::Timeout {
            stage: Stage::Outreach,
            after: Duration::from_secs(1)
        }
        .is_transient());
    }
}
