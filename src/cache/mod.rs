//! Candidate record cache keyed by identity.
//!
//! A store only ever replaces a whole [`CacheEntry`]; readers see either the
//! previous entry or the new one. Freshness is decided by the caller against
//! the configured window.

mod file;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::CandidateRecord;
use crate::error::Result;
use crate::identity::CandidateId;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: CandidateRecord,
    pub freshness: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(record: CandidateRecord) -> Self {
        let freshness = record.extracted_at;
        Self { record, freshness }
    }

    /// Fresh while `now - freshness < window`.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (now - self.freshness).to_std() {
            Ok(age) => age < window,
            // Timestamp ahead of `now`
            Err(_) => true,
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, id: &CandidateId) -> Result<Option<CacheEntry>>;

    /// Replace the entry for the record's identity.
    async fn put(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, id: &CandidateId) -> Result<bool>;

    async fn len(&self) -> Result<usize>;
}

pub type SharedCache = Arc<dyn CacheStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::ProfileAttributes;

    fn entry_at(freshness: DateTime<Utc>) -> CacheEntry {
        let id = CandidateId::from_profile_url("https://linkedin.com/in/fresh").unwrap();
        let record = CandidateRecord::new(
            id,
            "https://linkedin.com/in/fresh",
            ProfileAttributes::default(),
            freshness,
        );
        CacheEntry::new(record)
    }

    #[test]
    fn freshness_window_is_exclusive() {
        let now = Utc::now();
        let window = Duration::from_secs(7 * 86_400);
        assert!(entry_at(now).is_fresh(now, window));
        assert!(entry_at(now - chrono::Duration::days(6)).is_fresh(now, window));
        assert!(!entry_at(now - chrono::Duration::days(7)).is_fresh(now, window));
        assert!(!entry_at(now - chrono::Duration::days(30)).is_fresh(now, window));
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let now = Utc::now();
        let entry = entry_at(now + chrono::Duration::seconds(5));
        assert!(entry.is_fresh(now, Duration::from_secs(1)));
    }
}
