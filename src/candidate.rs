use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::CandidateId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub date_range: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub school: String,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub field_of_study: Option<String>,
    #[serde(default)]
    pub date_range: Option<String>,
}

/// Raw attributes returned by the extraction collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileAttributes {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub education: Vec<Education>,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl ProfileAttributes {
    /// Reject payloads that cannot describe a person.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("profile has no name".to_string());
        }
        if self.experience.iter().any(|e| e.company.trim().is_empty()) {
            return Err("experience entry without company".to_string());
        }
        if self.education.iter().any(|e| e.school.trim().is_empty()) {
            return Err("education entry without school".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    ConnectionRequest,
    Inmail,
    FollowUp,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::ConnectionRequest => write!(f, "connection_request"),
            MessageKind::Inmail => write!(f, "inmail"),
            MessageKind::FollowUp => write!(f, "follow_up"),
        }
    }
}

/// Neutral connection message built only from extracted attributes. Used
/// when the outreach collaborator fails and by the fixture writer.
pub fn neutral_message(attributes: &ProfileAttributes) -> String {
    let name = attributes
        .name
        .split_whitespace()
        .next()
        .unwrap_or("there");
    let headline = attributes.title.as_deref().unwrap_or("professional");
    let location = attributes.location.as_deref().unwrap_or("your area");
    format!(
        "Hi {name}! I came across your profile and was impressed by your background \
         as a {headline} in {location}. I have an exciting opportunity that matches \
         your expertise. Would you be open to a brief conversation?"
    )
}

/// Drafted outreach for one candidate within one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachArtifact {
    pub message: String,
    pub kind: MessageKind,
    pub generated_at: DateTime<Utc>,
    /// What the message was written against (job id and search method).
    pub context: String,
    /// True when the collaborator failed and a neutral message was used.
    #[serde(default)]
    pub fallback: bool,
}

/// A profile as resolved by the extract stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: CandidateId,
    pub profile_url: String,
    pub attributes: ProfileAttributes,
    pub extracted_at: DateTime<Utc>,
    #[serde(default)]
    pub outreach: Option<OutreachArtifact>,
}

impl CandidateRecord {
    pub fn new(
        id: CandidateId,
        profile_url: impl Into<String>,
        attributes: ProfileAttributes,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            profile_url: profile_url.into(),
            attributes,
            extracted_at,
            outreach: None,
        }
    }

    /// Copy of this record carrying an outreach artifact.
    pub fn with_outreach(&self, outreach: OutreachArtifact) -> Self {
        Self {
            outreach: Some(outreach),
            ..self.clone()
        }
    }
}
