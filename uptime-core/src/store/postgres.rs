use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use super::Store;
use crate::db::DatabasePool;
use crate::models::{
    AlertContact, AlertRule, ChannelConfig, Check, Incident, IncidentUpdate, Integration,
    MaintenanceWindow, Monitor, MonitorConfig, MonitorStatus, PUSH_REGION, WorkspaceMember,
};
use crate::stats::MonitorStats;
use crate::{Error, Result};

const MONITOR_COLUMNS: &str = "id, workspace_id, name, monitor_type, target, port, interval_secs, \
     timeout_secs, config, is_active, status, uptime_percentage, avg_response_time, \
     last_check_at, push_token, created_at, updated_at";

const INCIDENT_COLUMNS: &str = "id, monitor_id, workspace_id, title, severity, status, started_at, \
     acknowledged_at, acknowledged_by, resolved_at, updated_at";

pub struct PgStore {
    db: DatabasePool,
}

impl PgStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }
}

fn monitor_from_row(row: &PgRow) -> Result<Monitor> {
    let port: Option<i32> = row.try_get("port")?;
    let config: Json<MonitorConfig> = row.try_get("config")?;
    Ok(Monitor {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        name: row.try_get("name")?,
        monitor_type: row.try_get::<String, _>("monitor_type")?.parse()?,
        target: row.try_get("target")?,
        port: port
            .map(u16::try_from)
            .transpose()
            .map_err(|_| Error::internal("stored port out of range"))?,
        interval: row.try_get("interval_secs")?,
        timeout: row.try_get("timeout_secs")?,
        config: config.0,
        is_active: row.try_get("is_active")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        uptime_percentage: row.try_get("uptime_percentage")?,
        avg_response_time: row.try_get("avg_response_time")?,
        last_check_at: row.try_get("last_check_at")?,
        push_token: row.try_get("push_token")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn check_from_row(row: &PgRow) -> Result<Check> {
    Ok(Check {
        id: row.try_get("id")?,
        monitor_id: row.try_get("monitor_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        status_code: row.try_get("status_code")?,
        response_time: row.try_get("response_time")?,
        error: row.try_get("error")?,
        region: row.try_get("region")?,
        ssl_expiry_days: row.try_get("ssl_expiry_days")?,
        checked_at: row.try_get("checked_at")?,
    })
}

fn incident_from_row(row: &PgRow) -> Result<Incident> {
    Ok(Incident {
        id: row.try_get("id")?,
        monitor_id: row.try_get("monitor_id")?,
        workspace_id: row.try_get("workspace_id")?,
        title: row.try_get("title")?,
        severity: row.try_get::<String, _>("severity")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        started_at: row.try_get("started_at")?,
        acknowledged_at: row.try_get("acknowledged_at")?,
        acknowledged_by: row.try_get("acknowledged_by")?,
        resolved_at: row.try_get("resolved_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn update_from_row(row: &PgRow) -> Result<IncidentUpdate> {
    Ok(IncidentUpdate {
        id: row.try_get("id")?,
        incident_id: row.try_get("incident_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        message: row.try_get("message")?,
        author: row.try_get("author")?,
        created_at: row.try_get("created_at")?,
    })
}

fn contact_from_row(row: &PgRow) -> Result<AlertContact> {
    let channel: Json<ChannelConfig> = row.try_get("channel")?;
    Ok(AlertContact {
        id: row.try_get("contact_id")?,
        workspace_id: row.try_get("workspace_id")?,
        name: row.try_get("name")?,
        channel: channel.0,
    })
}

async fn insert_update<'c, E>(executor: E, update: &IncidentUpdate) -> Result<()>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO incident_updates (id, incident_id, status, message, author, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(update.id)
    .bind(update.incident_id)
    .bind(update.status.as_str())
    .bind(&update.message)
    .bind(update.author)
    .bind(update.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        let row = sqlx::query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(monitor_from_row).transpose()
    }

    async fn active_monitors(&self) -> Result<Vec<Monitor>> {
        let rows = sqlx::query(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE is_active = true ORDER BY created_at"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(monitor_from_row).collect()
    }

    async fn monitor_by_push_token(&self, token: &str) -> Result<Option<Monitor>> {
        let row = sqlx::query(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE push_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(monitor_from_row).transpose()
    }

    async fn set_monitor_status(&self, id: Uuid, status: MonitorStatus) -> Result<()> {
        sqlx::query("UPDATE monitors SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn record_monitor_check(
        &self,
        id: Uuid,
        status: MonitorStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE monitors SET status = $2, last_check_at = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(checked_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_monitor_active(
        &self,
        id: Uuid,
        is_active: bool,
        status: MonitorStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE monitors SET is_active = $2, status = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(is_active)
        .bind(status.as_str())
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("monitor {id}")));
        }
        Ok(())
    }

    async fn update_monitor_stats(&self, id: Uuid, stats: &MonitorStats) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE monitors
            SET uptime_percentage = $2, avg_response_time = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(stats.uptime_percentage)
        .bind(stats.avg_response_time)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn insert_check(&self, check: &Check) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checks (id, monitor_id, status, status_code, response_time, error, region, ssl_expiry_days, checked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(check.id)
        .bind(check.monitor_id)
        .bind(check.status.as_str())
        .bind(check.status_code)
        .bind(check.response_time)
        .bind(&check.error)
        .bind(&check.region)
        .bind(check.ssl_expiry_days)
        .bind(check.checked_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn checks_since(&self, monitor_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Check>> {
        let rows = sqlx::query(
            "SELECT * FROM checks WHERE monitor_id = $1 AND checked_at >= $2 ORDER BY checked_at",
        )
        .bind(monitor_id)
        .bind(since)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(check_from_row).collect()
    }

    async fn last_push_at(&self, monitor_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MAX(checked_at) AS last FROM checks WHERE monitor_id = $1 AND status = 'up' AND region = $2",
        )
        .bind(monitor_id)
        .bind(PUSH_REGION)
        .fetch_one(&self.db)
        .await?;
        Ok(row.try_get("last")?)
    }

    async fn delete_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM checks WHERE checked_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn open_incident(&self, monitor_id: Uuid) -> Result<Option<Incident>> {
        let row = sqlx::query(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE monitor_id = $1 AND status <> 'resolved'"
        ))
        .bind(monitor_id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(incident_from_row).transpose()
    }

    async fn create_incident(&self, incident: &Incident, update: &IncidentUpdate) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO incidents (id, monitor_id, workspace_id, title, severity, status, started_at,
                                   acknowledged_at, acknowledged_by, resolved_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (monitor_id) WHERE status <> 'resolved' DO NOTHING
            "#,
        )
        .bind(incident.id)
        .bind(incident.monitor_id)
        .bind(incident.workspace_id)
        .bind(&incident.title)
        .bind(incident.severity.as_str())
        .bind(incident.status.as_str())
        .bind(incident.started_at)
        .bind(incident.acknowledged_at)
        .bind(incident.acknowledged_by)
        .bind(incident.resolved_at)
        .bind(incident.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_update(&mut *tx, update).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
        let row = sqlx::query(&format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(incident_from_row).transpose()
    }

    async fn save_incident(&self, incident: &Incident, update: &IncidentUpdate) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET severity = $2, status = $3, acknowledged_at = $4, acknowledged_by = $5,
                resolved_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(incident.id)
        .bind(incident.severity.as_str())
        .bind(incident.status.as_str())
        .bind(incident.acknowledged_at)
        .bind(incident.acknowledged_by)
        .bind(incident.resolved_at)
        .bind(incident.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::not_found(format!("incident {}", incident.id)));
        }

        insert_update(&mut *tx, update).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn incident_updates(&self, incident_id: Uuid) -> Result<Vec<IncidentUpdate>> {
        let rows = sqlx::query(
            "SELECT * FROM incident_updates WHERE incident_id = $1 ORDER BY created_at, id",
        )
        .bind(incident_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(update_from_row).collect()
    }

    async fn delete_resolved_incidents_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM incidents WHERE status = 'resolved' AND resolved_at < $1")
                .bind(cutoff)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected())
    }

    async fn maintenance_windows_at(
        &self,
        monitor_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceWindow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, monitor_id, title, starts_at, ends_at FROM maintenance_windows
            WHERE monitor_id = $1 AND starts_at <= $2 AND ends_at > $2
            "#,
        )
        .bind(monitor_id)
        .bind(at)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MaintenanceWindow {
                    id: row.try_get("id")?,
                    monitor_id: row.try_get("monitor_id")?,
                    title: row.try_get("title")?,
                    starts_at: row.try_get("starts_at")?,
                    ends_at: row.try_get("ends_at")?,
                })
            })
            .collect()
    }

    async fn alert_rules(&self, monitor_id: Uuid) -> Result<Vec<(AlertRule, AlertContact)>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.monitor_id, r.contact_id, r.alert_on_down, r.alert_on_up,
                   r.alert_on_slow, r.slow_threshold_ms, c.workspace_id, c.name, c.channel
            FROM alert_rules r
            JOIN alert_contacts c ON c.id = r.contact_id
            WHERE r.monitor_id = $1
            "#,
        )
        .bind(monitor_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let rule = AlertRule {
                    id: row.try_get("id")?,
                    monitor_id: row.try_get("monitor_id")?,
                    contact_id: row.try_get("contact_id")?,
                    alert_on_down: row.try_get("alert_on_down")?,
                    alert_on_up: row.try_get("alert_on_up")?,
                    alert_on_slow: row.try_get("alert_on_slow")?,
                    slow_threshold_ms: row.try_get("slow_threshold_ms")?,
                };
                Ok((rule, contact_from_row(row)?))
            })
            .collect()
    }

    async fn alert_contacts(&self, workspace_id: Uuid) -> Result<Vec<AlertContact>> {
        let rows = sqlx::query(
            "SELECT id AS contact_id, workspace_id, name, channel FROM alert_contacts WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn workspace_members(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceMember>> {
        let rows = sqlx::query(
            "SELECT user_id, workspace_id, email, name FROM workspace_members WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(WorkspaceMember {
                    user_id: row.try_get("user_id")?,
                    workspace_id: row.try_get("workspace_id")?,
                    email: row.try_get("email")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn integrations(&self, workspace_id: Uuid) -> Result<Vec<Integration>> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, name, channel, enabled FROM integrations WHERE workspace_id = $1 AND enabled = true",
        )
        .bind(workspace_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let channel: Json<ChannelConfig> = row.try_get("channel")?;
                Ok(Integration {
                    id: row.try_get("id")?,
                    workspace_id: row.try_get("workspace_id")?,
                    name: row.try_get("name")?,
                    channel: channel.0,
                    enabled: row.try_get("enabled")?,
                })
            })
            .collect()
    }
}
