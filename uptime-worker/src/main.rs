use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use uptime_core::{
    Error, Result,
    config::Config,
    db::create_pool,
    events::RedisPublisher,
    logging,
    notify::Dispatcher,
    pipeline::CheckPipeline,
    queue::{QueuePolicy, RedisQueue},
    redis_conn::{connect, create_redis_client},
    shutdown::wait_for_shutdown,
    stats::StatsAggregator,
    store::PgStore,
};

mod checkers;
mod jobs;
mod pool;
mod retention;

use checkers::Prober;
use jobs::JobHandler;
use pool::WorkerPool;
use retention::RetentionCleanup;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let config = Config::from_env()?;
    info!(
        region = %config.worker.region,
        concurrency = config.worker.concurrency,
        "starting uptime worker"
    );

    let db_pool = create_pool(&config.database).await?;
    info!("database connection established");

    let store = Arc::new(PgStore::new(db_pool));
    let queue = Arc::new(RedisQueue::open(&config.redis, QueuePolicy::from(&config.worker)).await?);
    let events = Arc::new(RedisPublisher::new(
        connect(&create_redis_client(&config.redis)?).await?,
    ));

    let dispatcher = Dispatcher::new(config.smtp.as_ref(), config.sms.clone())
        .map_err(|e| Error::notification(e.to_string()))?;
    if config.smtp.is_none() {
        info!("smtp not configured, email notifications will fail");
    }

    let pipeline = Arc::new(CheckPipeline::new(
        store.clone(),
        queue.clone(),
        events,
        config.stats.window_hours,
    ));
    let handler = Arc::new(JobHandler::new(
        pipeline,
        Prober::new(config.worker.region.clone(), store.clone()),
        dispatcher,
        StatsAggregator::new(store.clone(), config.stats.window_hours),
        RetentionCleanup::new(store, config.retention.days),
        Duration::from_millis(config.worker.retry_delay_ms),
    ));

    let pool = WorkerPool::new(
        queue.clone(),
        handler,
        config.worker.concurrency,
        Duration::from_millis(config.worker.poll_interval_ms),
    );
    let (stop, stopped) = watch::channel(false);
    let workers = tokio::spawn(async move { pool.run(stopped).await });

    info!("uptime worker is running");
    wait_for_shutdown().await?;

    let _ = stop.send(true);
    match workers.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "worker pool exited with an error"),
        Err(e) => error!(error = %e, "worker pool task failed"),
    }
    queue.close();
    info!("uptime worker stopped");
    Ok(())
}
