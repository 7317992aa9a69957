//! Everything that happens after a probe produced a result: persist the
//! check, roll up stats, move the monitor status, drive incidents, queue
//! notifications and tell the dashboards.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{Event, EventPublisher, publish_quietly};
use crate::incidents::{IncidentManager, IncidentOutcome, Transition};
use crate::models::{Check, CheckResult, CheckStatus, Monitor, MonitorStatus};
use crate::notify::{NotificationEvent, NotificationMessage, fan_out};
use crate::queue::JobQueue;
use crate::stats::StatsAggregator;
use crate::store::Store;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub check: Check,
    pub transition: Transition,
    pub incident: Option<IncidentOutcome>,
}

pub struct CheckPipeline {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    events: Arc<dyn EventPublisher>,
    stats: StatsAggregator,
    incidents: IncidentManager,
}

impl CheckPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn JobQueue>,
        events: Arc<dyn EventPublisher>,
        stats_window_hours: i64,
    ) -> Self {
        Self {
            stats: StatsAggregator::new(store.clone(), stats_window_hours),
            incidents: IncidentManager::new(store.clone(), events.clone()),
            store,
            queue,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn incidents(&self) -> &IncidentManager {
        &self.incidents
    }

    pub async fn record(
        &self,
        monitor: &Monitor,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) -> Result<Recorded> {
        let check = self.persist(monitor, result, now).await?;
        self.apply(monitor, result, check, now).await
    }

    /// Stores the check row. Once this returns `Ok` the result is part of
    /// the monitor's history whatever happens in [`apply`](Self::apply).
    pub async fn persist(
        &self,
        monitor: &Monitor,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) -> Result<Check> {
        let check = Check::from_result(monitor.id, result, now);
        self.store.insert_check(&check).await?;
        publish_quietly(
            self.events.as_ref(),
            monitor.workspace_id,
            Event::CheckRecorded {
                check: check.clone(),
            },
        )
        .await;
        Ok(check)
    }

    /// Stats, status and incidents for an already persisted check. Decisions
    /// are made against the monitor as stored now, not the copy the probe
    /// started from.
    pub async fn apply(
        &self,
        monitor: &Monitor,
        result: &CheckResult,
        check: Check,
        now: DateTime<Utc>,
    ) -> Result<Recorded> {
        self.stats.refresh(monitor.id, now).await?;

        let Some(current) = self.store.get_monitor(monitor.id).await? else {
            info!(monitor_id = %monitor.id, "monitor deleted while its check ran");
            return Ok(Recorded {
                check,
                transition: Transition::Unchanged,
                incident: None,
            });
        };
        let monitor = &current;

        // Paused and maintenance monitors keep their status and never touch incidents.
        if !monitor.tracks_transitions() {
            self.store
                .record_monitor_check(monitor.id, monitor.status, now)
                .await?;
            return Ok(Recorded {
                check,
                transition: Transition::Unchanged,
                incident: None,
            });
        }

        let status = match result.status {
            CheckStatus::Up => MonitorStatus::Up,
            CheckStatus::Down => MonitorStatus::Down,
        };
        self.store.record_monitor_check(monitor.id, status, now).await?;

        let transition = Transition::between(monitor.status, result.status);
        if transition != Transition::Unchanged {
            info!(
                monitor_id = %monitor.id,
                from = %monitor.status,
                to = %status,
                "monitor status changed"
            );
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
        }

        let incident = self
            .incidents
            .on_transition(monitor, transition, result, now)
            .await?;
        if let Some(outcome) = &incident {
            self.notify(monitor, outcome, result, now).await;
        }

        Ok(Recorded {
            check,
            transition,
            incident,
        })
    }

    /// Queues notifications after the incident write has committed. A failure
    /// here is logged and leaves the incident as it is.
    async fn notify(
        &self,
        monitor: &Monitor,
        outcome: &IncidentOutcome,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) {
        let message = match outcome {
            IncidentOutcome::Opened(incident) => NotificationMessage::for_incident(
                NotificationEvent::IncidentStarted,
                monitor,
                incident,
                result.error.clone(),
                now,
            ),
            IncidentOutcome::Resolved(incident) => NotificationMessage::for_incident(
                NotificationEvent::IncidentResolved,
                monitor,
                incident,
                None,
                now,
            ),
        };

        if let Err(e) = fan_out(self.store.as_ref(), self.queue.as_ref(), monitor, message).await {
            warn!(monitor_id = %monitor.id, error = %e, "notification fan-out failed");
        }
    }
}
