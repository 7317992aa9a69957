//! Persistence seam for the check pipeline.
//!
//! [`PgStore`] is the production implementation; [`MemoryStore`] backs tests
//! and local experiments with the same semantics, including the
//! one-open-incident-per-monitor guarantee.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Result;
use crate::models::{
    AlertContact, AlertRule, Check, Incident, IncidentUpdate, Integration, MaintenanceWindow,
    Monitor, MonitorStatus, WorkspaceMember,
};
use crate::stats::MonitorStats;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>>;

    /// Every monitor with `is_active = true`, maintenance included.
    async fn active_monitors(&self) -> Result<Vec<Monitor>>;

    async fn monitor_by_push_token(&self, token: &str) -> Result<Option<Monitor>>;

    async fn set_monitor_status(&self, id: Uuid, status: MonitorStatus) -> Result<()>;

    /// Stamps `last_check_at` together with the status the check produced.
    async fn record_monitor_check(
        &self,
        id: Uuid,
        status: MonitorStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn set_monitor_active(&self, id: Uuid, is_active: bool, status: MonitorStatus)
    -> Result<()>;

    async fn update_monitor_stats(&self, id: Uuid, stats: &MonitorStats) -> Result<()>;

    async fn insert_check(&self, check: &Check) -> Result<()>;

    /// Checks with `checked_at >= since`, oldest first.
    async fn checks_since(&self, monitor_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Check>>;

    /// Timestamp of the latest `up` check received through a push endpoint.
    async fn last_push_at(&self, monitor_id: Uuid) -> Result<Option<DateTime<Utc>>>;

    async fn delete_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn open_incident(&self, monitor_id: Uuid) -> Result<Option<Incident>>;

    /// Inserts the incident and its first timeline entry unless the monitor
    /// already has an open incident. Returns whether the insert happened.
    async fn create_incident(&self, incident: &Incident, update: &IncidentUpdate) -> Result<bool>;

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>>;

    /// Persists the new incident state and appends the timeline entry in one step.
    async fn save_incident(&self, incident: &Incident, update: &IncidentUpdate) -> Result<()>;

    /// Timeline entries, oldest first.
    async fn incident_updates(&self, incident_id: Uuid) -> Result<Vec<IncidentUpdate>>;

    async fn delete_resolved_incidents_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn maintenance_windows_at(
        &self,
        monitor_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceWindow>>;

    async fn alert_rules(&self, monitor_id: Uuid) -> Result<Vec<(AlertRule, AlertContact)>>;

    async fn alert_contacts(&self, workspace_id: Uuid) -> Result<Vec<AlertContact>>;

    async fn workspace_members(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceMember>>;

    /// Enabled integrations only.
    async fn integrations(&self, workspace_id: Uuid) -> Result<Vec<Integration>>;
}
