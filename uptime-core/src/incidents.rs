//! Incident lifecycle: opened by a down transition, closed by an up
//! transition, and adjusted by hand through acknowledge/update/resolve.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{Event, EventPublisher, publish_quietly};
use crate::models::{
    CheckResult, CheckStatus, Incident, IncidentStatus, IncidentUpdate, Monitor, MonitorStatus,
    Severity,
};
use crate::store::Store;
use crate::{Error, Result};

pub const CRITICAL_RESPONSE_MS: u64 = 10_000;
pub const SLOW_RESPONSE_MS: u64 = 5_000;

const CRITICAL_MARKERS: [&str; 5] = ["ssl", "certificate", "tls", "domain", "dns"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentDown,
    WentUp,
    Unchanged,
}

impl Transition {
    pub fn between(previous: MonitorStatus, current: CheckStatus) -> Self {
        match (previous, current) {
            (MonitorStatus::Up, CheckStatus::Down) => Self::WentDown,
            (MonitorStatus::Down, CheckStatus::Up) => Self::WentUp,
            _ => Self::Unchanged,
        }
    }
}

/// Severity a check result would carry. Down results are critical for
/// certificate/DNS failures or very slow probes and major otherwise; slow but
/// up results are minor and never open an incident on their own.
pub fn classify_severity(result: &CheckResult) -> Option<Severity> {
    match result.status {
        CheckStatus::Down => {
            let error = result.error.as_deref().unwrap_or_default().to_lowercase();
            let critical = CRITICAL_MARKERS.iter().any(|m| error.contains(m))
                || result.response_time_ms > CRITICAL_RESPONSE_MS;
            Some(if critical {
                Severity::Critical
            } else {
                Severity::Major
            })
        }
        CheckStatus::Up if result.response_time_ms > SLOW_RESPONSE_MS => Some(Severity::Minor),
        CheckStatus::Up => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncidentOutcome {
    Opened(Incident),
    Resolved(Incident),
}

pub struct IncidentManager {
    store: Arc<dyn Store>,
    events: Arc<dyn EventPublisher>,
}

impl IncidentManager {
    pub fn new(store: Arc<dyn Store>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, events }
    }

    pub async fn on_transition(
        &self,
        monitor: &Monitor,
        transition: Transition,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) -> Result<Option<IncidentOutcome>> {
        match transition {
            Transition::WentDown => self.open(monitor, result, now).await,
            Transition::WentUp => self.close(monitor, now).await,
            Transition::Unchanged => Ok(None),
        }
    }

    async fn open(
        &self,
        monitor: &Monitor,
        result: &CheckResult,
        now: DateTime<Utc>,
    ) -> Result<Option<IncidentOutcome>> {
        if self.store.open_incident(monitor.id).await?.is_some() {
            debug!(monitor_id = %monitor.id, "incident already open");
            return Ok(None);
        }

        let incident = Incident {
            id: Uuid::new_v4(),
            monitor_id: monitor.id,
            workspace_id: monitor.workspace_id,
            title: format!("{} is down", monitor.name),
            severity: classify_severity(result).unwrap_or(Severity::Major),
            status: IncidentStatus::Investigating,
            started_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            updated_at: now,
        };
        let message = match &result.error {
            Some(error) => format!("Monitor went down: {error}"),
            None => "Monitor went down".to_string(),
        };
        let update = IncidentUpdate::new(&incident, message, None, now);

        // The store refuses a second open incident, so a concurrent opener loses here.
        if !self.store.create_incident(&incident, &update).await? {
            debug!(monitor_id = %monitor.id, "lost race to open incident");
            return Ok(None);
        }

        info!(
            monitor_id = %monitor.id,
            incident_id = %incident.id,
            severity = %incident.severity,
            "incident opened"
        );
        publish_quietly(
            self.events.as_ref(),
            incident.workspace_id,
            Event::IncidentOpened {
                incident: incident.clone(),
            },
        )
        .await;
        Ok(Some(IncidentOutcome::Opened(incident)))
    }

    async fn close(&self, monitor: &Monitor, now: DateTime<Utc>) -> Result<Option<IncidentOutcome>> {
        let Some(mut incident) = self.store.open_incident(monitor.id).await? else {
            return Ok(None);
        };

        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(now);
        incident.updated_at = now;
        let minutes = incident.duration_minutes(now);
        let update = IncidentUpdate::new(
            &incident,
            format!("Monitor recovered. Downtime: {minutes} minutes"),
            None,
            now,
        );
        self.store.save_incident(&incident, &update).await?;

        info!(
            monitor_id = %monitor.id,
            incident_id = %incident.id,
            downtime_minutes = minutes,
            "incident resolved"
        );
        publish_quietly(
            self.events.as_ref(),
            incident.workspace_id,
            Event::IncidentResolved {
                incident: incident.clone(),
            },
        )
        .await;
        Ok(Some(IncidentOutcome::Resolved(incident)))
    }

    /// Loads an incident visible to `workspace_id`.
    pub async fn get(&self, workspace_id: Uuid, incident_id: Uuid) -> Result<Incident> {
        self.store
            .get_incident(incident_id)
            .await?
            .filter(|incident| incident.workspace_id == workspace_id)
            .ok_or_else(|| Error::not_found(format!("incident {incident_id}")))
    }

    pub async fn timeline(
        &self,
        workspace_id: Uuid,
        incident_id: Uuid,
    ) -> Result<(Incident, Vec<IncidentUpdate>)> {
        let incident = self.get(workspace_id, incident_id).await?;
        let updates = self.store.incident_updates(incident.id).await?;
        Ok((incident, updates))
    }

    async fn get_open(&self, workspace_id: Uuid, incident_id: Uuid) -> Result<Incident> {
        let incident = self.get(workspace_id, incident_id).await?;
        if !incident.is_open() {
            return Err(Error::validation("incident is already resolved"));
        }
        Ok(incident)
    }

    pub async fn acknowledge(
        &self,
        workspace_id: Uuid,
        incident_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let mut incident = self.get_open(workspace_id, incident_id).await?;
        if incident.acknowledged_at.is_some() {
            return Err(Error::validation("incident is already acknowledged"));
        }

        if incident.status == IncidentStatus::Investigating {
            incident.status = IncidentStatus::Identified;
        }
        incident.acknowledged_at = Some(now);
        incident.acknowledged_by = Some(user_id);
        incident.updated_at = now;
        let update = IncidentUpdate::new(&incident, "Incident acknowledged", Some(user_id), now);

        self.store.save_incident(&incident, &update).await?;
        info!(incident_id = %incident.id, user_id = %user_id, "incident acknowledged");
        self.publish_updated(&incident).await;
        Ok(incident)
    }

    /// Manual timeline entry. Closing goes through [`Self::resolve`].
    pub async fn update(
        &self,
        workspace_id: Uuid,
        incident_id: Uuid,
        status: IncidentStatus,
        message: &str,
        author: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::validation("update message is required"));
        }
        if status == IncidentStatus::Resolved {
            return Err(Error::validation("use resolve to close an incident"));
        }

        let mut incident = self.get_open(workspace_id, incident_id).await?;
        incident.status = status;
        incident.updated_at = now;
        let update = IncidentUpdate::new(&incident, message, Some(author), now);

        self.store.save_incident(&incident, &update).await?;
        info!(incident_id = %incident.id, status = %status, "incident updated");
        self.publish_updated(&incident).await;
        Ok(incident)
    }

    pub async fn resolve(
        &self,
        workspace_id: Uuid,
        incident_id: Uuid,
        message: Option<&str>,
        author: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let mut incident = self.get_open(workspace_id, incident_id).await?;
        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(now);
        incident.updated_at = now;

        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("Incident resolved manually");
        let update = IncidentUpdate::new(&incident, message, Some(author), now);

        self.store.save_incident(&incident, &update).await?;
        info!(incident_id = %incident.id, "incident resolved manually");
        publish_quietly(
            self.events.as_ref(),
            incident.workspace_id,
            Event::IncidentResolved {
                incident: incident.clone(),
            },
        )
        .await;
        Ok(incident)
    }

    async fn publish_updated(&self, incident: &Incident) {
        publish_quietly(
            self.events.as_ref(),
            incident.workspace_id,
            Event::IncidentUpdated {
                incident: incident.clone(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryPublisher;
    use crate::models::MonitorType;
    use crate::store::MemoryStore;
    use chrono::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        events: Arc<MemoryPublisher>,
        manager: IncidentManager,
        monitor: Monitor,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(MemoryPublisher::new());
        let monitor = Monitor::new(Uuid::new_v4(), "api", MonitorType::Https, "https://example.com");
        store.insert_monitor(monitor.clone()).unwrap();
        let manager = IncidentManager::new(store.clone(), events.clone());
        Harness {
            store,
            events,
            manager,
            monitor,
        }
    }

    #[test]
    fn transitions_only_between_up_and_down() {
        assert_eq!(
            Transition::between(MonitorStatus::Up, CheckStatus::Down),
            Transition::WentDown
        );
        assert_eq!(
            Transition::between(MonitorStatus::Down, CheckStatus::Up),
            Transition::WentUp
        );
        assert_eq!(
            Transition::between(MonitorStatus::Down, CheckStatus::Down),
            Transition::Unchanged
        );
        assert_eq!(
            Transition::between(MonitorStatus::Paused, CheckStatus::Down),
            Transition::Unchanged
        );
        assert_eq!(
            Transition::between(MonitorStatus::Maintenance, CheckStatus::Up),
            Transition::Unchanged
        );
    }

    #[test]
    fn severity_rules() {
        assert_eq!(
            classify_severity(&CheckResult::down("SSL certificate has expired", 80)),
            Some(Severity::Critical)
        );
        assert_eq!(
            classify_severity(&CheckResult::down("DNS lookup failed", 5)),
            Some(Severity::Critical)
        );
        assert_eq!(
            classify_severity(&CheckResult::down("timed out", 10_001)),
            Some(Severity::Critical)
        );
        assert_eq!(
            classify_severity(&CheckResult::down("expected status 200, got 503", 120)),
            Some(Severity::Major)
        );
        assert_eq!(classify_severity(&CheckResult::up(6_000)), Some(Severity::Minor));
        assert_eq!(classify_severity(&CheckResult::up(300)), None);
    }

    #[tokio::test]
    async fn down_then_up_opens_and_resolves_once() {
        let h = harness();
        let start = Utc::now();
        let down = CheckResult::down("connection refused", 12);

        let opened = h
            .manager
            .on_transition(&h.monitor, Transition::WentDown, &down, start)
            .await
            .unwrap();
        let Some(IncidentOutcome::Opened(incident)) = opened else {
            panic!("expected an opened incident, got {opened:?}");
        };
        assert_eq!(incident.title, "api is down");
        assert_eq!(incident.severity, Severity::Major);
        assert_eq!(incident.status, IncidentStatus::Investigating);

        let again = h
            .manager
            .on_transition(&h.monitor, Transition::WentDown, &down, start + Duration::minutes(1))
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(h.store.incidents(h.monitor.id).unwrap().len(), 1);

        let resolved = h
            .manager
            .on_transition(
                &h.monitor,
                Transition::WentUp,
                &CheckResult::up(40),
                start + Duration::minutes(7),
            )
            .await
            .unwrap();
        let Some(IncidentOutcome::Resolved(resolved)) = resolved else {
            panic!("expected a resolved incident");
        };
        assert_eq!(resolved.id, incident.id);

        let updates = h.store.incident_updates(incident.id).await.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].status, IncidentStatus::Resolved);
        assert!(updates[1].message.contains("7 minutes"));
        assert_eq!(h.events.names(), vec!["incident.opened", "incident.resolved"]);
    }

    #[tokio::test]
    async fn recovery_without_open_incident_is_a_no_op() {
        let h = harness();
        let outcome = h
            .manager
            .on_transition(&h.monitor, Transition::WentUp, &CheckResult::up(10), Utc::now())
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert!(h.store.incidents(h.monitor.id).unwrap().is_empty());
        assert!(h.events.events().is_empty());
    }

    #[tokio::test]
    async fn manual_operations_append_to_timeline() {
        let h = harness();
        let now = Utc::now();
        let user = Uuid::new_v4();
        let workspace = h.monitor.workspace_id;
        let Some(IncidentOutcome::Opened(incident)) = h
            .manager
            .on_transition(&h.monitor, Transition::WentDown, &CheckResult::down("503", 20), now)
            .await
            .unwrap()
        else {
            panic!("expected an opened incident");
        };

        let acked = h
            .manager
            .acknowledge(workspace, incident.id, user, now)
            .await
            .unwrap();
        assert_eq!(acked.status, IncidentStatus::Identified);
        assert_eq!(acked.acknowledged_by, Some(user));
        assert!(h.manager.acknowledge(workspace, incident.id, user, now).await.is_err());

        assert!(
            h.manager
                .update(workspace, incident.id, IncidentStatus::Monitoring, "  ", user, now)
                .await
                .is_err()
        );
        let monitoring = h
            .manager
            .update(workspace, incident.id, IncidentStatus::Monitoring, "Fix deployed", user, now)
            .await
            .unwrap();
        assert_eq!(monitoring.status, IncidentStatus::Monitoring);

        let resolved = h
            .manager
            .resolve(workspace, incident.id, None, user, now)
            .await
            .unwrap();
        assert!(resolved.resolved_at.is_some());

        let (_, timeline) = h.manager.timeline(workspace, incident.id).await.unwrap();
        let messages: Vec<_> = timeline.iter().map(|u| u.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Monitor went down: 503",
                "Incident acknowledged",
                "Fix deployed",
                "Incident resolved manually"
            ]
        );

        let err = h
            .manager
            .resolve(workspace, incident.id, None, user, now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn other_workspaces_cannot_see_incidents() {
        let h = harness();
        let Some(IncidentOutcome::Opened(incident)) = h
            .manager
            .on_transition(&h.monitor, Transition::WentDown, &CheckResult::down("x", 1), Utc::now())
            .await
            .unwrap()
        else {
            panic!("expected an opened incident");
        };

        let err = h
            .manager
            .get(Uuid::new_v4(), incident.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
