use uptime_core::{Config, Result, logging};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let config = Config::from_env()?;
    tracing::info!(
        tick_secs = config.scheduler.tick_secs,
        workers = config.worker.concurrency,
        retention_days = config.retention.days,
        smtp = config.smtp.is_some(),
        sms = config.sms.is_some(),
        "uptime core configuration loaded"
    );

    Ok(())
}
