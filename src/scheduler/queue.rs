//! Priority task queue with leased, at-least-once delivery.
//!
//! Dequeuing hands out a [`Lease`]; the item stays invisible to other
//! consumers until the lease is acked, nacked, or expires. Expired leases
//! are put back in line (or dead-lettered once the delivery limit is hit).
//! With a journal path configured every mutation is written through to disk
//! and leased items become ready again on recovery.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{Result, ScoutError};
use crate::persist;
use crate::scheduler::job::Priority;

const TIERS: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub job_id: Uuid,
    pub priority: Priority,
    /// Deliveries so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: Uuid,
    pub item: TaskItem,
    pub worker: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn job_id(&self) -> Uuid {
        self.item.job_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NackOutcome {
    Requeued { attempts: u32 },
    /// Delivery limit reached; the item has left the queue.
    Exhausted(TaskItem),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub ready: usize,
    pub leased: usize,
    pub dead_letters: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
    ready: Vec<TaskItem>,
    leased: Vec<TaskItem>,
    dead_letters: Vec<TaskItem>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: HashMap<Priority, VecDeque<TaskItem>>,
    leased: HashMap<Uuid, Lease>,
    /// Job ids currently ready or leased.
    known: HashSet<Uuid>,
    dead_letters: Vec<TaskItem>,
    closed: bool,
}

impl QueueState {
    fn push_ready(&mut self, item: TaskItem) {
        self.ready.entry(item.priority).or_default().push_back(item);
    }

    fn pop_ready(&mut self) -> Option<TaskItem> {
        TIERS
            .iter()
            .find_map(|tier| self.ready.get_mut(tier).and_then(VecDeque::pop_front))
    }

    fn ready_len(&self) -> usize {
        self.ready.values().map(VecDeque::len).sum()
    }

    /// Return the item to the back of its tier, or dead-letter it when the
    /// delivery limit is reached.
    fn release(&mut self, mut item: TaskItem, reason: String, max_attempts: u32) -> NackOutcome {
        item.last_error = Some(reason);
        if item.attempts >= max_attempts {
            self.known.remove(&item.job_id);
            NackOutcome::Exhausted(item)
        } else {
            let attempts = item.attempts;
            self.push_ready(item);
            NackOutcome::Requeued { attempts }
        }
    }

    fn reap_expired(&mut self, now: DateTime<Utc>, max_attempts: u32) -> usize {
        let expired: Vec<Uuid> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for lease_id in &expired {
            if let Some(lease) = self.leased.remove(lease_id) {
                tracing::warn!(
                    job_id = %lease.item.job_id,
                    worker = %lease.worker,
                    attempts = lease.item.attempts,
                    "Lease expired, returning job to queue"
                );
                if let NackOutcome::Exhausted(item) =
                    self.release(lease.item, "lease expired".to_string(), max_attempts)
                {
                    self.dead_letters.push(item);
                }
            }
        }
        expired.len()
    }

    fn journal(&self) -> Journal {
        let mut ready = Vec::new();
        for tier in TIERS {
            if let Some(items) = self.ready.get(&tier) {
                ready.extend(items.iter().cloned());
            }
        }
        Journal {
            ready,
            leased: self.leased.values().map(|l| l.item.clone()).collect(),
            dead_letters: self.dead_letters.clone(),
        }
    }
}

#[derive(Debug)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    config: QueueConfig,
}

impl TaskQueue {
    /// In-memory queue. The journal path, if any, is ignored.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            config,
        }
    }

    /// Queue backed by the configured journal, recovering its contents.
    pub async fn open(config: QueueConfig) -> Result<Self> {
        let queue = Self::new(config);
        let Some(path) = queue.config.journal_path.clone() else {
            return Ok(queue);
        };
        if let Some(journal) = persist::read_json::<Journal>(&path).await? {
            let mut state = queue.state.lock().await;
            let recovered = journal.ready.len() + journal.leased.len();
            for item in journal.ready.into_iter().chain(journal.leased) {
                if state.known.insert(item.job_id) {
                    state.push_ready(item);
                }
            }
            state.dead_letters = journal.dead_letters;
            tracing::info!(path = %path.display(), recovered, "Recovered task queue journal");
        }
        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn persist(&self, state: &QueueState) -> Result<()> {
        if let Some(path) = &self.config.journal_path {
            persist::write_json_atomic(path, &state.journal()).await?;
        }
        Ok(())
    }

    /// Add a job. Returns `false` if it is already waiting or leased.
    pub async fn enqueue(&self, job_id: Uuid, priority: Priority) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ScoutError::QueueClosed);
        }
        if state.known.contains(&job_id) {
            tracing::debug!(job_id = %job_id, "Job already queued, ignoring duplicate enqueue");
            return Ok(false);
        }
        if state.known.len() >= self.config.max_pending {
            return Err(ScoutError::QueueFull);
        }
        state.known.insert(job_id);
        state.push_ready(TaskItem {
            job_id,
            priority,
            attempts: 0,
            enqueued_at: Utc::now(),
            last_error: None,
        });
        self.persist(&state).await?;
        drop(state);
        self.notify.notify_one();
        tracing::debug!(job_id = %job_id, priority = %priority, "Job enqueued");
        Ok(true)
    }

    /// Take the next item without waiting.
    pub async fn try_dequeue(&self, worker: &str) -> Result<Option<Lease>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(None);
        }
        let now = Utc::now();
        state.reap_expired(now, self.config.max_attempts);
        let Some(mut item) = state.pop_ready() else {
            return Ok(None);
        };
        item.attempts += 1;
        let lease = Lease {
            lease_id: Uuid::new_v4(),
            item,
            worker: worker.to_string(),
            expires_at: now + to_chrono(self.config.visibility_timeout),
        };
        state.leased.insert(lease.lease_id, lease.clone());
        self.persist(&state).await?;
        Ok(Some(lease))
    }

    /// Wait for the next item. Returns `None` once the queue is closed.
    pub async fn dequeue(&self, worker: &str) -> Result<Option<Lease>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_dequeue(worker).await? {
                return Ok(Some(lease));
            }
            if self.is_closed().await {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    pub async fn ack(&self, lease_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let lease = state
            .leased
            .remove(&lease_id)
            .ok_or(ScoutError::LeaseNotFound(lease_id))?;
        state.known.remove(&lease.item.job_id);
        self.persist(&state).await?;
        tracing::debug!(job_id = %lease.item.job_id, "Job acked");
        Ok(())
    }

    /// Give the item back for redelivery. Exhausted items are removed and
    /// returned to the caller, which owns failing the job.
    pub async fn nack(&self, lease_id: Uuid, reason: impl Into<String>) -> Result<NackOutcome> {
        let mut state = self.state.lock().await;
        let lease = state
            .leased
            .remove(&lease_id)
            .ok_or(ScoutError::LeaseNotFound(lease_id))?;
        let outcome = state.release(lease.item, reason.into(), self.config.max_attempts);
        self.persist(&state).await?;
        drop(state);
        if matches!(outcome, NackOutcome::Requeued { .. }) {
            self.notify.notify_one();
        }
        Ok(outcome)
    }

    /// Push the lease deadline out by another visibility timeout.
    pub async fn extend(&self, lease_id: Uuid) -> Result<DateTime<Utc>> {
        let mut state = self.state.lock().await;
        let lease = state
            .leased
            .get_mut(&lease_id)
            .ok_or(ScoutError::LeaseNotFound(lease_id))?;
        lease.expires_at = Utc::now() + to_chrono(self.config.visibility_timeout);
        Ok(lease.expires_at)
    }

    /// Return expired leases to the queue. Returns how many were reaped.
    pub async fn reap_expired(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let reaped = state.reap_expired(Utc::now(), self.config.max_attempts);
        if reaped > 0 {
            self.persist(&state).await?;
            drop(state);
            self.notify.notify_waiters();
        }
        Ok(reaped)
    }

    /// Items whose leases expired on their final delivery.
    pub async fn drain_dead_letters(&self) -> Result<Vec<TaskItem>> {
        let mut state = self.state.lock().await;
        let drained = std::mem::take(&mut state.dead_letters);
        if !drained.is_empty() {
            self.persist(&state).await?;
        }
        Ok(drained)
    }

    /// Stop handing out work. Waiting consumers return `None`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn depth(&self) -> QueueDepth {
        let state = self.state.lock().await;
        QueueDepth {
            ready: state.ready_len(),
            leased: state.leased.len(),
            dead_letters: state.dead_letters.len(),
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}
