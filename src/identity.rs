//! Candidate identity derived from canonical profile URLs.
//!
//! LinkedIn profiles (`/in/<slug>` and legacy `/pub/<slug>/...`) are keyed by
//! their lowercased slug alone, since the same slug on any LinkedIn host is
//! the same profile. Every other host is keyed as `<host>/<full path>`, with
//! empty segments dropped, so neither equal slugs on different sites nor
//! profiles sharing a trailing segment collapse into one identity.

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("not a valid profile URL: {0}")]
    InvalidUrl(String),

    #[error("profile URL has no identifying path segment: {0}")]
    MissingSlug(String),
}

/// Stable, unique key for a candidate profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    /// Derive the identity of a profile URL. Query strings, fragments, and
    /// trailing slashes never affect the result.
    pub fn from_profile_url(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::InvalidUrl(raw.to_string()));
        }

        let url = match Url::parse(trimmed) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", trimmed))
                .map_err(|_| IdentityError::InvalidUrl(raw.to_string()))?,
            Err(_) => return Err(IdentityError::InvalidUrl(raw.to_string())),
        };

        let host = url
            .host_str()
            .map(|h| h.trim_start_matches("www.").to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| IdentityError::InvalidUrl(raw.to_string()))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        if is_linkedin(&host) {
            let slug = segments
                .iter()
                .position(|seg| *seg == "in" || *seg == "pub")
                .and_then(|idx| segments.get(idx + 1))
                .ok_or_else(|| IdentityError::MissingSlug(raw.to_string()))?;
            return Ok(Self(slug.to_ascii_lowercase()));
        }

        if segments.is_empty() {
            return Err(IdentityError::MissingSlug(raw.to_string()));
        }
        Ok(Self(format!(
            "{}/{}",
            host,
            segments.join("/").to_ascii_lowercase()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the cache record for this identity is persisted.
    pub fn cache_key(&self) -> String {
        format!("candidate:{}", self.0)
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_linkedin(host: &str) -> bool {
    host == "linkedin.com" || host.ends_with(".linkedin.com")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> String {
        CandidateId::from_profile_url(raw).unwrap().as_str().to_string()
    }

    #[test]
    fn linkedin_slug_ignores_query_fragment_and_trailing_slash() {
        assert_eq!(id("https://www.linkedin.com/in/jane-doe"), "jane-doe");
        assert_eq!(id("https://www.linkedin.com/in/jane-doe/"), "jane-doe");
        assert_eq!(
            id("https://www.linkedin.com/in/jane-doe/?trk=public_profile#about"),
            "jane-doe"
        );
    }

    #[test]
    fn linkedin_slug_is_case_and_subdomain_insensitive() {
        assert_eq!(id("https://uk.linkedin.com/in/Jane-Doe"), "jane-doe");
        assert_eq!(id("linkedin.com/in/JANE-DOE"), "jane-doe");
    }

    #[test]
    fn legacy_pub_urls_use_the_slug_segment() {
        assert_eq!(
            id("https://www.linkedin.com/pub/john-smith/12/345/678"),
            "john-smith"
        );
    }

    #[test]
    fn other_hosts_are_host_qualified() {
        assert_eq!(id("https://github.com/alice"), "github.com/alice");
        assert_ne!(id("https://github.com/alice"), id("https://gitlab.com/alice"));
    }

    #[test]
    fn distinct_profiles_never_collapse() {
        assert_ne!(
            id("https://www.linkedin.com/in/jane-doe"),
            id("https://www.linkedin.com/in/jane_doe")
        );
        assert_ne!(
            id("https://www.linkedin.com/in/jane-doe-1"),
            id("https://www.linkedin.com/in/jane-doe-2")
        );
        assert_ne!(
            id("https://stackoverflow.com/users/111/john-doe"),
            id("https://stackoverflow.com/users/222/john-doe")
        );
        assert_ne!(
            id("https://example.com/people/42/profile"),
            id("https://example.com/people/99/profile")
        );
    }

    #[test]
    fn other_hosts_keep_the_normalized_path() {
        assert_eq!(
            id("https://StackOverflow.com//users/111/John-Doe/?tab=profile"),
            "stackoverflow.com/users/111/john-doe"
        );
    }

    #[test]
    fn rejects_urls_without_identity() {
        assert!(matches!(
            CandidateId::from_profile_url("   "),
            Err(IdentityError::InvalidUrl(_))
        ));
        assert!(matches!(
            CandidateId::from_profile_url("https://www.linkedin.com/"),
            Err(IdentityError::MissingSlug(_))
        ));
        assert!(matches!(
            CandidateId::from_profile_url("https://www.linkedin.com/company/acme"),
            Err(IdentityError::MissingSlug(_))
        ));
    }

    #[test]
    fn cache_key_is_prefixed() {
        let id = CandidateId::from_profile_url("https://linkedin.com/in/sam").unwrap();
        assert_eq!(id.cache_key(), "candidate:sam");
    }
}
