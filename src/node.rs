use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::cache::{FileCacheStore, MemoryCacheStore, SharedCache};
use crate::collaborators::Collaborators;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::scheduler::{JobStore, TaskQueue};
use crate::worker::WorkerPool;

/// A single sourcing service instance: stores, queue, workers, and API.
pub struct Node {
    config: PipelineConfig,
    orchestrator: Arc<Orchestrator>,
}

impl Node {
    pub async fn new(config: PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let cache: SharedCache = match &config.cache.directory {
            Some(dir) => Arc::new(FileCacheStore::open(dir.clone()).await?),
            None => Arc::new(MemoryCacheStore::new()),
        };
        let queue = Arc::new(TaskQueue::open(config.queue.clone()).await?);
        let jobs = Arc::new(match &config.retention.directory {
            Some(dir) => JobStore::open(dir.clone()).await?,
            None => JobStore::new(),
        });
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            collaborators,
            cache,
            queue,
            jobs,
        )?);

        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Put unfinished jobs from the job store back in the queue. Jobs the
    /// queue already holds are left alone.
    pub async fn recover_jobs(&self) -> Result<usize> {
        let mut recovered = 0;
        for job in self.orchestrator.jobs().list().await {
            if job.is_terminal() {
                continue;
            }
            if self
                .orchestrator
                .queue()
                .enqueue(job.id, job.input.options.priority)
                .await?
            {
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "Re-enqueued unfinished jobs");
        }
        Ok(recovered)
    }

    /// Run workers, housekeeping, and the API until `shutdown` is cancelled,
    /// then drain.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.recover_jobs().await?;

        let pool = WorkerPool::spawn(self.orchestrator.clone(), shutdown.clone());

        let housekeeper = {
            let orchestrator = self.orchestrator.clone();
            let shutdown = shutdown.clone();
            let every = self.config.retention.housekeeping_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = interval.tick() => {
                            match orchestrator.housekeeping().await {
                                Ok(report) => tracing::debug!(?report, "Housekeeping pass"),
                                Err(e) => tracing::warn!(error = %e, "Housekeeping failed"),
                            }
                        }
                    }
                }
            })
        };

        let api = self.config.api_addr.map(|addr| {
            let state = ApiState {
                orchestrator: self.orchestrator.clone(),
                workers: pool.size(),
            };
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = run_api(addr, state, shutdown).await {
                    tracing::error!(addr = %addr, error = %e, "API server failed");
                }
            })
        });

        shutdown.cancelled().await;
        tracing::info!("Shutting down, draining workers");

        self.orchestrator.queue().close().await;
        pool.join().await;
        if let Err(e) = housekeeper.await {
            tracing::warn!(error = %e, "Housekeeper task panicked");
        }
        if let Some(api) = api {
            if let Err(e) = api.await {
                tracing::warn!(error = %e, "API task panicked");
            }
        }
        tracing::info!("Shutdown complete");
        Ok(())
    }
}
