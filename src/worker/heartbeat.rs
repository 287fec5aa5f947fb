use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::scheduler::TaskQueue;

/// Periodically extends a lease while its job is being processed.
pub struct LeaseHeartbeat {
    interval: Duration,
    queue: Arc<TaskQueue>,
    lease_id: Uuid,
}

impl LeaseHeartbeat {
    pub fn new(interval: Duration, queue: Arc<TaskQueue>, lease_id: Uuid) -> Self {
        Self {
            interval,
            queue,
            lease_id,
        }
    }

    /// Run until `stop` is cancelled or the lease is gone.
    pub async fn run(self, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        // First tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.queue.extend(self.lease_id).await {
                        tracing::warn!(lease_id = %self.lease_id, error = %e, "Lease heartbeat failed");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn the heartbeat, returning the token that stops it.
    pub fn spawn(self) -> CancellationToken {
        let stop = CancellationToken::new();
        let token = stop.clone();
        tokio::spawn(self.run(token));
        stop
    }
}
