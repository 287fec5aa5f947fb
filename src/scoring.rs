//! Weighted aggregation of criterion sub-scores and recommendation banding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::collaborators::{CollaboratorError, Stage};
use crate::config::{RecommendationBand, ScoringConfig};
use crate::error::Result;
use crate::identity::CandidateId;

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;

/// Sub-scores keyed by criterion name, as returned by the scoring collaborator.
pub type CriterionScores = BTreeMap<String, f64>;

/// Recommendation tiers, declared from lowest to highest so that the derived
/// ordering matches tier order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Reject,
    WeakMatch,
    Consider,
    GoodMatch,
    StrongMatch,
}

impl Recommendation {
    /// Candidates at `consider` or above pass the screen.
    pub fn passed(&self) -> bool {
        *self >= Recommendation::Consider
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::Reject => write!(f, "reject"),
            Recommendation::WeakMatch => write!(f, "weak_match"),
            Recommendation::Consider => write!(f, "consider"),
            Recommendation::GoodMatch => write!(f, "good_match"),
            Recommendation::StrongMatch => write!(f, "strong_match"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub candidate: CandidateId,
    pub aggregate: f64,
    pub criteria: CriterionScores,
    pub recommendation: Recommendation,
}

/// Turns raw criterion scores into a [`ScoreResult`].
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    criteria: Vec<(String, f64)>,
    neutral: f64,
    bands: Vec<RecommendationBand>,
}

impl ScoringPolicy {
    pub fn new(config: &ScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            criteria: config
                .criteria
                .iter()
                .map(|c| (c.name.clone(), c.weight))
                .collect(),
            neutral: config.neutral_score,
            bands: config.bands.clone(),
        })
    }

    /// Weighted aggregate over the configured criteria. Missing criteria take
    /// the neutral score; unknown ones are ignored. Non-finite or
    /// out-of-range values are rejected as a malformed payload.
    pub fn aggregate(
        &self,
        candidate: &CandidateId,
        raw: &CriterionScores,
    ) -> std::result::Result<ScoreResult, CollaboratorError> {
        for (name, value) in raw {
            if !value.is_finite() || !(SCORE_MIN..=SCORE_MAX).contains(value) {
                return Err(CollaboratorError::Malformed {
                    stage: Stage::Score,
                    detail: format!("criterion '{name}' has out-of-range score {value}"),
                });
            }
        }

        let unknown: Vec<&str> = raw
            .keys()
            .filter(|k| !self.criteria.iter().any(|(name, _)| name == *k))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            tracing::debug!(candidate = %candidate, ?unknown, "Ignoring unknown scoring criteria");
        }

        let mut criteria = CriterionScores::new();
        let mut total = 0.0;
        for (name, weight) in &self.criteria {
            let value = raw.get(name).copied().unwrap_or(self.neutral);
            total += weight * value;
            criteria.insert(name.clone(), value);
        }

        let aggregate = round2(total).clamp(SCORE_MIN, SCORE_MAX);
        Ok(ScoreResult {
            candidate: candidate.clone(),
            aggregate,
            criteria,
            recommendation: self.band(aggregate),
        })
    }

    /// First band whose threshold the aggregate reaches; reject otherwise.
    pub fn band(&self, aggregate: f64) -> Recommendation {
        self.bands
            .iter()
            .find(|band| aggregate >= band.min)
            .map(|band| band.label)
            .unwrap_or(Recommendation::Reject)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
