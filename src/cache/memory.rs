use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStore};
use crate::error::Result;
use crate::identity::CandidateId;

/// In-process cache. Entries are swapped whole behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<CandidateId, Arc<CacheEntry>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, id: &CandidateId) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(id).map(|e| e.as_ref().clone()))
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let id = entry.record.id.clone();
        self.entries.write().await.insert(id, Arc::new(entry));
        Ok(())
    }

    async fn remove(&self, id: &CandidateId) -> Result<bool> {
        Ok(self.entries.write().await.remove(id).is_some())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
