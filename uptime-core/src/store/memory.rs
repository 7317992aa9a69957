use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::Store;
use crate::models::{
    AlertContact, AlertRule, Check, Incident, IncidentUpdate, Integration, MaintenanceWindow,
    Monitor, MonitorStatus, PUSH_REGION, WorkspaceMember,
};
use crate::stats::MonitorStats;
use crate::{Error, Result};

#[derive(Default)]
struct State {
    monitors: HashMap<Uuid, Monitor>,
    checks: Vec<Check>,
    incidents: HashMap<Uuid, Incident>,
    updates: Vec<IncidentUpdate>,
    windows: Vec<MaintenanceWindow>,
    rules: Vec<AlertRule>,
    contacts: HashMap<Uuid, AlertContact>,
    members: Vec<WorkspaceMember>,
    integrations: Vec<Integration>,
    failing: HashSet<&'static str>,
}

/// In-process store with the same guarantees as the Postgres one.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::internal("memory store lock poisoned"))
    }

    /// Makes the next call of the named write (`insert_check`,
    /// `update_monitor_stats`) fail as if the database were unreachable.
    pub fn fail_next(&self, operation: &'static str) -> Result<()> {
        self.state()?.failing.insert(operation);
        Ok(())
    }

    fn available(state: &mut State, operation: &str) -> Result<()> {
        if state.failing.remove(operation) {
            return Err(Error::internal(format!("{operation} unavailable")));
        }
        Ok(())
    }

    pub fn insert_monitor(&self, monitor: Monitor) -> Result<()> {
        monitor.validate()?;
        self.state()?.monitors.insert(monitor.id, monitor);
        Ok(())
    }

    pub fn insert_maintenance_window(&self, window: MaintenanceWindow) -> Result<()> {
        if window.ends_at <= window.starts_at {
            return Err(Error::validation("maintenance window must end after it starts"));
        }
        self.state()?.windows.push(window);
        Ok(())
    }

    pub fn insert_contact(&self, contact: AlertContact) -> Result<()> {
        contact.channel.validate()?;
        self.state()?.contacts.insert(contact.id, contact);
        Ok(())
    }

    pub fn insert_alert_rule(&self, rule: AlertRule) -> Result<()> {
        let mut state = self.state()?;
        if !state.contacts.contains_key(&rule.contact_id) {
            return Err(Error::not_found(format!("alert contact {}", rule.contact_id)));
        }
        state.rules.push(rule);
        Ok(())
    }

    pub fn insert_member(&self, member: WorkspaceMember) -> Result<()> {
        self.state()?.members.push(member);
        Ok(())
    }

    pub fn insert_integration(&self, integration: Integration) -> Result<()> {
        integration.channel.validate()?;
        self.state()?.integrations.push(integration);
        Ok(())
    }

    pub fn checks(&self, monitor_id: Uuid) -> Result<Vec<Check>> {
        Ok(self
            .state()?
            .checks
            .iter()
            .filter(|c| c.monitor_id == monitor_id)
            .cloned()
            .collect())
    }

    pub fn incidents(&self, monitor_id: Uuid) -> Result<Vec<Incident>> {
        let mut incidents: Vec<Incident> = self
            .state()?
            .incidents
            .values()
            .filter(|i| i.monitor_id == monitor_id)
            .cloned()
            .collect();
        incidents.sort_by_key(|i| i.started_at);
        Ok(incidents)
    }

    fn with_monitor(&self, id: Uuid, f: impl FnOnce(&mut Monitor)) -> Result<()> {
        let mut state = self.state()?;
        let monitor = state
            .monitors
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("monitor {id}")))?;
        f(monitor);
        monitor.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        Ok(self.state()?.monitors.get(&id).cloned())
    }

    async fn active_monitors(&self) -> Result<Vec<Monitor>> {
        let mut monitors: Vec<Monitor> = self
            .state()?
            .monitors
            .values()
            .filter(|m| m.is_active)
            .cloned()
            .collect();
        monitors.sort_by_key(|m| m.created_at);
        Ok(monitors)
    }

    async fn monitor_by_push_token(&self, token: &str) -> Result<Option<Monitor>> {
        Ok(self
            .state()?
            .monitors
            .values()
            .find(|m| m.push_token.as_deref() == Some(token))
            .cloned())
    }

    async fn set_monitor_status(&self, id: Uuid, status: MonitorStatus) -> Result<()> {
        self.with_monitor(id, |m| m.status = status)
    }

    async fn record_monitor_check(
        &self,
        id: Uuid,
        status: MonitorStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_monitor(id, |m| {
            m.status = status;
            m.last_check_at = Some(checked_at);
        })
    }

    async fn set_monitor_active(
        &self,
        id: Uuid,
        is_active: bool,
        status: MonitorStatus,
    ) -> Result<()> {
        self.with_monitor(id, |m| {
            m.is_active = is_active;
            m.status = status;
        })
    }

    async fn update_monitor_stats(&self, id: Uuid, stats: &MonitorStats) -> Result<()> {
        Self::available(&mut *self.state()?, "update_monitor_stats")?;
        self.with_monitor(id, |m| {
            m.uptime_percentage = stats.uptime_percentage;
            m.avg_response_time = stats.avg_response_time;
        })
    }

    async fn insert_check(&self, check: &Check) -> Result<()> {
        let mut state = self.state()?;
        Self::available(&mut state, "insert_check")?;
        state.checks.push(check.clone());
        Ok(())
    }

    async fn checks_since(&self, monitor_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Check>> {
        let mut checks: Vec<Check> = self
            .state()?
            .checks
            .iter()
            .filter(|c| c.monitor_id == monitor_id && c.checked_at >= since)
            .cloned()
            .collect();
        checks.sort_by_key(|c| c.checked_at);
        Ok(checks)
    }

    async fn last_push_at(&self, monitor_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .state()?
            .checks
            .iter()
            .filter(|c| c.monitor_id == monitor_id && c.is_up() && c.region == PUSH_REGION)
            .map(|c| c.checked_at)
            .max())
    }

    async fn delete_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state()?;
        let before = state.checks.len();
        state.checks.retain(|c| c.checked_at >= cutoff);
        Ok((before - state.checks.len()) as u64)
    }

    async fn open_incident(&self, monitor_id: Uuid) -> Result<Option<Incident>> {
        Ok(self
            .state()?
            .incidents
            .values()
            .find(|i| i.monitor_id == monitor_id && i.is_open())
            .cloned())
    }

    async fn create_incident(&self, incident: &Incident, update: &IncidentUpdate) -> Result<bool> {
        let mut state = self.state()?;
        let already_open = state
            .incidents
            .values()
            .any(|i| i.monitor_id == incident.monitor_id && i.is_open());
        if already_open {
            return Ok(false);
        }
        state.incidents.insert(incident.id, incident.clone());
        state.updates.push(update.clone());
        Ok(true)
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self.state()?.incidents.get(&id).cloned())
    }

    async fn save_incident(&self, incident: &Incident, update: &IncidentUpdate) -> Result<()> {
        let mut state = self.state()?;
        if !state.incidents.contains_key(&incident.id) {
            return Err(Error::not_found(format!("incident {}", incident.id)));
        }
        state.incidents.insert(incident.id, incident.clone());
        state.updates.push(update.clone());
        Ok(())
    }

    async fn incident_updates(&self, incident_id: Uuid) -> Result<Vec<IncidentUpdate>> {
        Ok(self
            .state()?
            .updates
            .iter()
            .filter(|u| u.incident_id == incident_id)
            .cloned()
            .collect())
    }

    async fn delete_resolved_incidents_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state()?;
        let expired: Vec<Uuid> = state
            .incidents
            .values()
            .filter(|i| i.resolved_at.is_some_and(|at| at < cutoff))
            .map(|i| i.id)
            .collect();
        for id in &expired {
            state.incidents.remove(id);
        }
        state.updates.retain(|u| !expired.contains(&u.incident_id));
        Ok(expired.len() as u64)
    }

    async fn maintenance_windows_at(
        &self,
        monitor_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceWindow>> {
        Ok(self
            .state()?
            .windows
            .iter()
            .filter(|w| w.monitor_id == monitor_id && w.covers(at))
            .cloned()
            .collect())
    }

    async fn alert_rules(&self, monitor_id: Uuid) -> Result<Vec<(AlertRule, AlertContact)>> {
        let state = self.state()?;
        Ok(state
            .rules
            .iter()
            .filter(|r| r.monitor_id == monitor_id)
            .filter_map(|r| {
                state
                    .contacts
                    .get(&r.contact_id)
                    .map(|c| (r.clone(), c.clone()))
            })
            .collect())
    }

    async fn alert_contacts(&self, workspace_id: Uuid) -> Result<Vec<AlertContact>> {
        Ok(self
            .state()?
            .contacts
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn workspace_members(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceMember>> {
        Ok(self
            .state()?
            .members
            .iter()
            .filter(|m| m.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn integrations(&self, workspace_id: Uuid) -> Result<Vec<Integration>> {
        Ok(self
            .state()?
            .integrations
            .iter()
            .filter(|i| i.workspace_id == workspace_id && i.enabled)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckResult, IncidentStatus, MonitorType, Severity};
    use chrono::Duration;

    fn incident_for(monitor_id: Uuid, status: IncidentStatus) -> (Incident, IncidentUpdate) {
        let now = Utc::now();
        let incident = Incident {
            id: Uuid::new_v4(),
            monitor_id,
            workspace_id: Uuid::new_v4(),
            title: "api is down".to_string(),
            severity: Severity::Major,
            status,
            started_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: (status == IncidentStatus::Resolved).then_some(now),
            updated_at: now,
        };
        let update = IncidentUpdate::new(&incident, "opened", None, now);
        (incident, update)
    }

    #[tokio::test]
    async fn refuses_second_open_incident() {
        let store = MemoryStore::new();
        let monitor_id = Uuid::new_v4();

        let (first, first_update) = incident_for(monitor_id, IncidentStatus::Investigating);
        assert!(store.create_incident(&first, &first_update).await.unwrap());

        let (second, second_update) = incident_for(monitor_id, IncidentStatus::Investigating);
        assert!(!store.create_incident(&second, &second_update).await.unwrap());

        assert_eq!(store.incidents(monitor_id).unwrap().len(), 1);
        assert!(store.incident_updates(second.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_push_ignores_probe_checks() {
        let store = MemoryStore::new();
        let monitor = Monitor::new(Uuid::new_v4(), "cron", MonitorType::Heartbeat, "");
        let now = Utc::now();

        let pushed = Check::from_result(
            monitor.id,
            &CheckResult::up(0).in_region(PUSH_REGION),
            now - Duration::minutes(10),
        );
        let probed = Check::from_result(monitor.id, &CheckResult::up(0).in_region("eu"), now);
        store.insert_check(&pushed).await.unwrap();
        store.insert_check(&probed).await.unwrap();

        assert_eq!(
            store.last_push_at(monitor.id).await.unwrap(),
            Some(pushed.checked_at)
        );
    }

    #[tokio::test]
    async fn deletes_only_old_resolved_incidents() {
        let store = MemoryStore::new();
        let monitor_id = Uuid::new_v4();

        let (mut old, old_update) = incident_for(monitor_id, IncidentStatus::Resolved);
        old.resolved_at = Some(Utc::now() - Duration::days(100));
        store.create_incident(&old, &old_update).await.unwrap();

        let (open, open_update) = incident_for(monitor_id, IncidentStatus::Investigating);
        store.create_incident(&open, &open_update).await.unwrap();

        let deleted = store
            .delete_resolved_incidents_before(Utc::now() - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_incident(old.id).await.unwrap().is_none());
        assert!(store.incident_updates(old.id).await.unwrap().is_empty());
        assert!(store.get_incident(open.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rejects_invalid_channels_at_write_time() {
        let store = MemoryStore::new();
        let integration = Integration {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: "broken".to_string(),
            channel: crate::models::ChannelConfig::Slack {
                webhook_url: "nope".to_string(),
            },
            enabled: true,
        };
        assert!(store.insert_integration(integration).is_err());
    }
}
