use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uptime_core::models::{Check, CheckResult, Monitor};
use uptime_core::notify::{Dispatcher, NotificationJob};
use uptime_core::pipeline::CheckPipeline;
use uptime_core::queue::Job;
use uptime_core::stats::StatsAggregator;
use uptime_core::{Error, Result};
use uuid::Uuid;

use crate::checkers::Prober;
use crate::pool::JobProcessor;
use crate::retention::RetentionCleanup;

/// Executes every job kind the queue carries.
pub struct JobHandler {
    pipeline: Arc<CheckPipeline>,
    prober: Prober,
    dispatcher: Dispatcher,
    stats: StatsAggregator,
    retention: RetentionCleanup,
    retry_delay: Duration,
}

impl JobHandler {
    pub fn new(
        pipeline: Arc<CheckPipeline>,
        prober: Prober,
        dispatcher: Dispatcher,
        stats: StatsAggregator,
        retention: RetentionCleanup,
        retry_delay: Duration,
    ) -> Self {
        Self {
            pipeline,
            prober,
            dispatcher,
            stats,
            retention,
            retry_delay,
        }
    }

    async fn check_monitor(&self, monitor_id: Uuid, forced: bool) -> Result<()> {
        let Some(monitor) = self.pipeline.store().get_monitor(monitor_id).await? else {
            info!(%monitor_id, "monitor no longer exists, skipping check");
            return Ok(());
        };

        let result = self.probe_with_retries(&monitor).await;
        let now = Utc::now();
        let check = match self.pipeline.persist(&monitor, &result, now).await {
            Ok(check) => check,
            Err(e) => {
                self.record_failure(&monitor, &result, &e).await;
                return Err(e);
            }
        };
        let recorded = self.pipeline.apply(&monitor, &result, check, now).await?;
        debug!(
            %monitor_id,
            forced,
            status = %recorded.check.status,
            response_time_ms = recorded.check.response_time,
            "check recorded"
        );
        Ok(())
    }

    /// Up to `retries` single probes; only the last one counts.
    async fn probe_with_retries(&self, monitor: &Monitor) -> CheckResult {
        let attempts = monitor.config.attempts();
        let mut attempt = 1;
        loop {
            let result = self.prober.probe(monitor).await;
            if result.is_up() || attempt >= attempts {
                return result;
            }
            debug!(
                monitor_id = %monitor.id,
                attempt,
                attempts,
                error = result.error.as_deref().unwrap_or_default(),
                "probe failed, retrying"
            );
            attempt += 1;
            sleep(self.retry_delay).await;
        }
    }

    /// Leaves a down check behind when the probe's own result could not be stored.
    async fn record_failure(&self, monitor: &Monitor, result: &CheckResult, error: &Error) {
        let synthetic = CheckResult::down(
            format!("check processing failed: {error}"),
            result.response_time_ms,
        )
        .in_region(result.region.clone());
        let check = Check::from_result(monitor.id, &synthetic, Utc::now());
        if let Err(e) = self.pipeline.store().insert_check(&check).await {
            warn!(monitor_id = %monitor.id, error = %e, "failed to persist synthetic down check");
        }
    }

    async fn send_notification(&self, job: &NotificationJob) -> Result<()> {
        self.dispatcher
            .deliver(&job.recipient, &job.message)
            .await
            .map_err(|e| {
                Error::notification(format!(
                    "{} via {}: {e}",
                    job.recipient.name,
                    job.recipient.channel.kind()
                ))
            })
    }
}

#[async_trait]
impl JobProcessor for JobHandler {
    async fn process(&self, job: &Job) -> Result<()> {
        match job {
            Job::CheckMonitor { monitor_id, forced } => self.check_monitor(*monitor_id, *forced).await,
            Job::SendNotification(notification) => self.send_notification(notification).await,
            Job::RefreshStats => {
                let refreshed = self.stats.refresh_all(Utc::now()).await?;
                info!(monitors = refreshed, "stats refreshed");
                Ok(())
            }
            Job::CleanupOldData => self.retention.run(Utc::now()).await.map(|_| ()),
        }
    }
}
