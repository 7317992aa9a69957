use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uptime_core::queue::{Disposition, Job, JobQueue, QueuedJob};
use uptime_core::{Error, Result};

#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> Result<()>;
}

/// Pulls jobs off the queue and runs up to `concurrency` of them at once,
/// each in its own task so a hung probe never stalls the others.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn JobProcessor>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn JobProcessor>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Runs until `shutdown` flips to true, then waits for in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        info!(concurrency = self.concurrency, "worker pool started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "job task panicked");
                }
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => {
                    permit.map_err(|e| Error::internal(e.to_string()))?
                }
                _ = shutdown.changed() => break,
            };

            let claimed = match self.queue.claim().await {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!(error = %e, "failed to claim job");
                    None
                }
            };
            let Some(job) = claimed else {
                drop(permit);
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
                continue;
            };

            let queue = self.queue.clone();
            let processor = self.processor.clone();
            tasks.spawn(async move {
                let _permit = permit;
                execute(queue.as_ref(), processor.as_ref(), job).await;
            });
        }

        info!(in_flight = tasks.len(), "worker pool draining");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "job task panicked");
            }
        }
        info!("worker pool stopped");
        Ok(())
    }
}

async fn execute(queue: &dyn JobQueue, processor: &dyn JobProcessor, job: QueuedJob) {
    let kind = job.job.kind();
    match processor.process(&job.job).await {
        Ok(()) => {
            debug!(job_id = %job.id, kind, "job completed");
            if let Err(e) = queue.complete(&job).await {
                warn!(job_id = %job.id, kind, error = %e, "failed to mark job completed");
            }
        }
        Err(e) => {
            let job_id = job.id;
            let attempts = job.attempts;
            match queue.fail(job, &e.to_string()).await {
                Ok(Disposition::Retrying { delay }) => warn!(
                    %job_id,
                    kind,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "job failed, retrying"
                ),
                Ok(Disposition::Failed) => {
                    error!(%job_id, kind, attempts, error = %e, "job failed")
                }
                Err(queue_err) => {
                    error!(%job_id, kind, error = %e, queue_error = %queue_err, "failed to record job failure")
                }
            }
        }
    }
}
