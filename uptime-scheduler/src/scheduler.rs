use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uptime_core::{
    Result,
    events::{Event, EventPublisher, publish_quietly},
    models::{Monitor, MonitorStatus},
    queue::{Job, JobQueue, schedule_check},
    store::Store,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub examined: usize,
    pub enqueued: usize,
    pub entered_maintenance: usize,
    pub left_maintenance: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Enqueued,
    EnteredMaintenance,
    LeftMaintenance,
    Skipped,
}

/// Decides on each tick which monitors are due and hands them to the queue.
pub struct MonitorScheduler {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    events: Arc<dyn EventPublisher>,
}

impl MonitorScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            queue,
            events,
        }
    }

    /// One pass over the active monitors. A late tick checks each due monitor
    /// once; it never fires catch-up checks.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let monitors = self.store.active_monitors().await?;
        let mut summary = TickSummary {
            examined: monitors.len(),
            ..TickSummary::default()
        };

        for monitor in monitors {
            match self.decide(&monitor, now).await {
                Ok(Decision::Enqueued) => summary.enqueued += 1,
                Ok(Decision::EnteredMaintenance) => summary.entered_maintenance += 1,
                Ok(Decision::LeftMaintenance) => summary.left_maintenance += 1,
                Ok(Decision::Skipped) => {}
                Err(e) => {
                    summary.errors += 1;
                    warn!(monitor_id = %monitor.id, error = %e, "failed to schedule monitor");
                }
            }
        }

        info!(
            examined = summary.examined,
            enqueued = summary.enqueued,
            entered_maintenance = summary.entered_maintenance,
            left_maintenance = summary.left_maintenance,
            errors = summary.errors,
            "scheduler tick"
        );
        Ok(summary)
    }

    async fn decide(&self, monitor: &Monitor, now: DateTime<Utc>) -> Result<Decision> {
        let in_window = !self
            .store
            .maintenance_windows_at(monitor.id, now)
            .await?
            .is_empty();

        if monitor.status == MonitorStatus::Maintenance {
            if in_window {
                return Ok(Decision::Skipped);
            }
            // An outage that began before the window is still open; keep it down
            // so the next up check resolves it.
            let restored = if self.store.open_incident(monitor.id).await?.is_some() {
                MonitorStatus::Down
            } else {
                MonitorStatus::Up
            };
            self.change_status(monitor, restored).await?;
            schedule_check(self.queue.as_ref(), monitor.id, Duration::ZERO).await?;
            info!(monitor_id = %monitor.id, status = %restored, "maintenance window ended");
            return Ok(Decision::LeftMaintenance);
        }

        if in_window {
            self.change_status(monitor, MonitorStatus::Maintenance).await?;
            info!(monitor_id = %monitor.id, "monitor entered maintenance");
            return Ok(Decision::EnteredMaintenance);
        }

        if !monitor.is_due(now) {
            debug!(monitor_id = %monitor.id, "not due");
            return Ok(Decision::Skipped);
        }

        self.queue
            .enqueue(
                Job::CheckMonitor {
                    monitor_id: monitor.id,
                    forced: false,
                },
                Duration::ZERO,
            )
            .await?;
        Ok(Decision::Enqueued)
    }

    async fn change_status(&self, monitor: &Monitor, status: MonitorStatus) -> Result<()> {
        self.store.set_monitor_status(monitor.id, status).await?;
        publish_quietly(
            self.events.as_ref(),
            monitor.workspace_id,
            Event::MonitorStatusChanged {
                monitor_id: monitor.id,
                from: monitor.status,
                to: status,
            },
        )
        .await;
        Ok(())
    }
}
