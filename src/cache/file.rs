use std::path::PathBuf;

use async_trait::async_trait;

use super::{CacheEntry, CacheStore};
use crate::error::{Result, ScoutError};
use crate::identity::CandidateId;
use crate::persist;

const EXTENSION: &str = "json";

/// One JSON file per identity, named after the URL-encoded cache key.
/// Writes go through a temp file and a rename, so concurrent writers for
/// the same identity leave exactly one complete record behind.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "Opened file cache store");
        Ok(Self { dir })
    }

    fn path_for(&self, id: &CandidateId) -> PathBuf {
        let encoded: String = url::form_urlencoded::byte_serialize(id.cache_key().as_bytes()).collect();
        self.dir.join(format!("{encoded}.{EXTENSION}"))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, id: &CandidateId) -> Result<Option<CacheEntry>> {
        let entry: Option<CacheEntry> = persist::read_json(&self.path_for(id)).await?;
        match entry {
            Some(entry) if entry.record.id != *id => Err(ScoutError::Cache(format!(
                "record for {} stored under {}",
                entry.record.id, id
            ))),
            other => Ok(other),
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let path = self.path_for(&entry.record.id);
        persist::write_json_atomic(&path, &entry).await?;
        tracing::debug!(candidate = %entry.record.id, "Cached candidate record");
        Ok(())
    }

    async fn remove(&self, id: &CandidateId) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut count = 0;
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let hidden = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if !hidden && path.extension().is_some_and(|ext| ext == EXTENSION) {
                count += 1;
            }
        }
        Ok(count)
    }
}
