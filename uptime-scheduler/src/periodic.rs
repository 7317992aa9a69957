use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};
use uptime_core::{Error, Result};

type TaskFn = dyn Fn() -> BoxFuture<'static, ()> + Send + Sync;

/// A named task repeated at a fixed cadence.
#[derive(Clone)]
pub struct PeriodicTask {
    pub name: &'static str,
    pub every: Duration,
    task: Arc<TaskFn>,
}

impl PeriodicTask {
    pub fn new<F>(name: &'static str, every: Duration, task: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            name,
            every,
            task: Arc::new(task),
        }
    }

    pub async fn run(&self) {
        debug!(task = self.name, "periodic task running");
        (self.task)().await;
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("every", &self.every)
            .finish_non_exhaustive()
    }
}

/// Drives [`PeriodicTask`]s on a tokio-cron-scheduler instance.
pub struct PeriodicRunner {
    scheduler: JobScheduler,
}

impl PeriodicRunner {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::scheduler(e.to_string()))?;
        Ok(Self { scheduler })
    }

    pub async fn add(&mut self, task: PeriodicTask) -> Result<()> {
        let every = task.every;
        let name = task.name;
        let job = Job::new_repeated_async(every, move |_uuid, _lock| {
            let task = task.clone();
            Box::pin(async move { task.run().await })
        })
        .map_err(|e| Error::scheduler(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| Error::scheduler(e.to_string()))?;
        info!(task = name, every_secs = every.as_secs(), "periodic task registered");
        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| Error::scheduler(e.to_string()))?;
        info!("periodic runner started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| Error::scheduler(e.to_string()))?;
        info!("periodic runner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn run_invokes_the_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let task = PeriodicTask::new("count", Duration::from_secs(60), move || {
            let seen = seen.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        });

        task.run().await;
        task.clone().run().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
