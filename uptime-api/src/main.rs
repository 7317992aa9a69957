use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use uptime_core::{
    Error, Result,
    auth::AuthService,
    config::Config,
    db::{create_pool, run_migrations},
    events::RedisPublisher,
    logging,
    notify::Dispatcher,
    pipeline::CheckPipeline,
    queue::{QueuePolicy, RedisQueue},
    redis_conn::{connect, create_redis_client},
    shutdown::wait_for_shutdown,
    store::PgStore,
};

mod handlers;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let config = Config::from_env()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        "starting uptime api"
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
    info!("redis connection established");

    let dispatcher = Dispatcher::new(config.smtp.as_ref(), config.sms.clone())
        .map_err(|e| Error::notification(e.to_string()))?;

    let state = Arc::new(server::AppState {
        pipeline: Arc::new(CheckPipeline::new(
            store,
            queue.clone(),
            events.clone(),
            config.stats.window_hours,
        )),
        dispatcher: Arc::new(dispatcher),
        events,
        auth: AuthService::new(&config.auth.jwt_secret, config.auth.jwt_expiration),
    });

    let app = server::create_app(state).await;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = wait_for_shutdown().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    queue.close();
    info!("uptime api stopped");
    Ok(())
}
