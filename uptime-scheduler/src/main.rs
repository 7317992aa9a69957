use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uptime_core::{
    Result,
    config::Config,
    db::{create_pool, run_migrations},
    events::RedisPublisher,
    logging,
    queue::{Job, JobQueue, QueuePolicy, RedisQueue},
    redis_conn::{connect, create_redis_client},
    shutdown::wait_for_shutdown,
    store::PgStore,
};

mod periodic;
mod scheduler;

use periodic::{PeriodicRunner, PeriodicTask};
use scheduler::MonitorScheduler;

fn enqueue_task(name: &'static str, every: Duration, queue: Arc<RedisQueue>, job: Job) -> PeriodicTask {
    PeriodicTask::new(name, every, move || {
        let queue = queue.clone();
        let job = job.clone();
        Box::pin(async move {
            if let Err(e) = queue.enqueue(job, Duration::ZERO).await {
                error!(task = name, error = %e, "failed to enqueue periodic job");
            }
        })
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let config = Config::from_env()?;
    info!(
        tick_secs = config.scheduler.tick_secs,
        stats_refresh_secs = config.scheduler.stats_refresh_secs,
        cleanup_secs = config.scheduler.cleanup_secs,
        "starting uptime scheduler"
    );

    let db_pool = create_pool(&config.database).await?;
    info!("database connection established");

    run_migrations(&db_pool).await?;
    info!("database migrations completed");

    let store = Arc::new(PgStore::new(db_pool));
    let queue = Arc::new(RedisQueue::open(&config.redis, QueuePolicy::from(&config.worker)).await?);
    let events = Arc::new(RedisPublisher::new(
        connect(&create_redis_client(&config.redis)?).await?,
    ));
    let scheduler = Arc::new(MonitorScheduler::new(store, queue.clone(), events));

    // First pass right away; the repeated job fires only after one period.
    if let Err(e) = scheduler.tick(Utc::now()).await {
        error!(error = %e, "initial scheduler tick failed");
    }

    let tick = {
        let scheduler = scheduler.clone();
        PeriodicTask::new("monitor-tick", config.scheduler.tick(), move || {
            let scheduler = scheduler.clone();
            Box::pin(async move {
                if let Err(e) = scheduler.tick(Utc::now()).await {
                    error!(error = %e, "scheduler tick failed");
                }
            })
        })
    };

    let mut runner = PeriodicRunner::new().await?;
    runner.add(tick).await?;
    runner
        .add(enqueue_task(
            "refresh-stats",
            config.scheduler.stats_refresh(),
            queue.clone(),
            Job::RefreshStats,
        ))
        .await?;
    runner
        .add(enqueue_task(
            "cleanup-old-data",
            config.scheduler.cleanup(),
            queue.clone(),
            Job::CleanupOldData,
        ))
        .await?;
    runner.start().await?;

    info!("uptime scheduler is running");
    wait_for_shutdown().await?;

    runner.shutdown().await?;
    queue.close();
    info!("uptime scheduler stopped");
    Ok(())
}
