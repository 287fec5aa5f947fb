//! Collaborators backed by a JSON fixture file, so the binary can run the
//! whole pipeline without any third-party provider.
//!
//! ```json
//! {
//!   "searches": { "default": ["https://linkedin.com/in/jane-doe"] },
//!   "profiles": { "https://linkedin.com/in/jane-doe": { "name": "Jane Doe" } },
//!   "scores":   { "jane-doe": { "education": 9.0, "experience_match": 8.5 } }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    CollaboratorError, Collaborators, Extractor, JobContext, OutreachWriter, Scorer, SearchQuery,
    Searcher, Stage,
};
use crate::candidate::{neutral_message, CandidateRecord, ProfileAttributes};
use crate::error::{Result, ScoutError};
use crate::persist;
use crate::scoring::CriterionScores;

const DEFAULT_SEARCH_KEY: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureData {
    /// Profile URLs keyed by search method, with `default` as fallback.
    #[serde(default)]
    pub searches: HashMap<String, Vec<String>>,
    /// Extracted attributes keyed by profile URL.
    #[serde(default)]
    pub profiles: HashMap<String, ProfileAttributes>,
    /// Raw criterion scores keyed by candidate identity.
    #[serde(default)]
    pub scores: HashMap<String, CriterionScores>,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureCollaborators {
    data: Arc<FixtureData>,
}

impl FixtureCollaborators {
    pub fn new(data: FixtureData) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let data: FixtureData = persist::read_json(path).await?.ok_or_else(|| {
            ScoutError::Config(format!("fixture file not found: {}", path.display()))
        })?;
        tracing::info!(
            path = %path.display(),
            searches = data.searches.len(),
            profiles = data.profiles.len(),
            scores = data.scores.len(),
            "Loaded fixture collaborators"
        );
        Ok(Self::new(data))
    }

    pub fn into_collaborators(self) -> Collaborators {
        let shared = Arc::new(self);
        Collaborators {
            searcher: shared.clone(),
            extractor: shared.clone(),
            scorer: shared.clone(),
            outreach: shared,
        }
    }
}

#[async_trait]
impl Searcher for FixtureCollaborators {
    async fn search(&self, query: &SearchQuery) -> std::result::Result<Vec<String>, CollaboratorError> {
        let urls = self
            .data
            .searches
            .get(query.method.as_str())
            .or_else(|| self.data.searches.get(DEFAULT_SEARCH_KEY))
            .cloned()
            .unwrap_or_default();
        Ok(urls)
    }
}

#[async_trait]
impl Extractor for FixtureCollaborators {
    async fn extract(
        &self,
        profile_url: &str,
    ) -> std::result::Result<ProfileAttributes, CollaboratorError> {
        self.data
            .profiles
            .get(profile_url)
            .cloned()
            .ok_or_else(|| {
                CollaboratorError::permanent(
                    Stage::Extract,
                    format!("no profile fixture for {profile_url}"),
                )
            })
    }
}

#[async_trait]
impl Scorer for FixtureCollaborators {
    async fn score(
        &self,
        record: &CandidateRecord,
        _context: &JobContext,
    ) -> std::result::Result<CriterionScores, CollaboratorError> {
        Ok(self
            .data
            .scores
            .get(record.id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl OutreachWriter for FixtureCollaborators {
    async fn draft(
        &self,
        record: &CandidateRecord,
        _context: &JobContext,
    ) -> std::result::Result<String, CollaboratorError> {
        Ok(neutral_message(&record.attributes))
    }
}
