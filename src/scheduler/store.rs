use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::{Result, ScoutError};
use crate::persist;
use crate::scheduler::job::Job;

/// Job state, optionally written through to one JSON file per job.
///
/// Writers to the same job are serialized by a per-job lock. The map lock
/// is only held to read or swap a snapshot, never across file I/O.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    writers: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    cancel_requests: RwLock<HashSet<Uuid>>,
    dir: Option<PathBuf>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store persisting to `dir`, loading any job records already there.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut jobs = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match persist::read_json::<Job>(&path).await {
                Ok(Some(job)) => {
                    jobs.insert(job.id, job);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
                }
            }
        }
        tracing::info!(dir = %dir.display(), jobs = jobs.len(), "Opened job store");

        Ok(Self {
            jobs: RwLock::new(jobs),
            writers: Mutex::new(HashMap::new()),
            cancel_requests: RwLock::new(HashSet::new()),
            dir: Some(dir),
        })
    }

    fn path_for(dir: &Path, id: &Uuid) -> PathBuf {
        dir.join(format!("job%3A{id}.json"))
    }

    async fn write_through(&self, job: &Job) -> Result<()> {
        if let Some(dir) = &self.dir {
            persist::write_json_atomic(&Self::path_for(dir, &job.id), job).await?;
        }
        Ok(())
    }

    async fn lock_writer(&self, id: &Uuid) -> OwnedMutexGuard<()> {
        let lock = self.writers.lock().await.entry(*id).or_default().clone();
        lock.lock_owned().await
    }

    pub async fn insert(&self, job: Job) -> Result<()> {
        let _writer = self.lock_writer(&job.id).await;
        self.write_through(&job).await?;
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }

    pub async fn get(&self, id: &Uuid) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &Uuid) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    /// Apply `f` to a non-terminal job and persist the result. Terminal jobs
    /// are immutable.
    pub async fn update<R>(&self, id: &Uuid, f: impl FnOnce(&mut Job) -> Result<R>) -> Result<R> {
        let _writer = self.lock_writer(id).await;
        let mut next = self
            .jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(ScoutError::JobNotFound(*id))?;
        if next.is_terminal() {
            return Err(ScoutError::JobTerminal(*id));
        }
        let out = f(&mut next)?;
        next.updated_at = Utc::now();
        self.write_through(&next).await?;
        match self.jobs.write().await.get_mut(id) {
            Some(job) => *job = next,
            None => return Err(ScoutError::JobNotFound(*id)),
        }
        Ok(out)
    }

    pub async fn remove(&self, id: &Uuid) -> Result<Option<Job>> {
        let removed = {
            let _writer = self.lock_writer(id).await;
            let removed = self.jobs.write().await.remove(id);
            if removed.is_some() {
                self.delete_record(id).await?;
            }
            removed
        };
        self.writers.lock().await.remove(id);
        Ok(removed)
    }

    async fn delete_record(&self, id: &Uuid) -> Result<()> {
        if let Some(dir) = &self.dir {
            match tokio::fs::remove_file(Self::path_for(dir, id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Remove terminal jobs finished more than `ttl` before `now`.
    pub async fn purge_expired(&self, ttl: Duration, now: DateTime<Utc>) -> Result<usize> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        let expired: Vec<Uuid> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|job| job.is_terminal())
                .filter(|job| {
                    let finished = job.completed_at.unwrap_or(job.updated_at);
                    now - finished >= ttl
                })
                .map(|job| job.id)
                .collect()
        };
        for id in &expired {
            self.remove(id).await?;
            self.cancel_requests.write().await.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(purged = expired.len(), "Purged expired job records");
        }
        Ok(expired.len())
    }

    pub async fn request_cancel(&self, id: Uuid) {
        self.cancel_requests.write().await.insert(id);
    }

    pub async fn is_cancel_requested(&self, id: &Uuid) -> bool {
        self.cancel_requests.read().await.contains(id)
    }

    pub async fn clear_cancel(&self, id: &Uuid) {
        self.cancel_requests.write().await.remove(id);
    }
}
