//! Per-workspace live events for connected dashboards.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::models::{Check, Incident, MonitorStatus};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Event {
    #[serde(rename = "check.recorded")]
    CheckRecorded { check: Check },
    #[serde(rename = "monitor.status_changed")]
    MonitorStatusChanged {
        monitor_id: Uuid,
        from: MonitorStatus,
        to: MonitorStatus,
    },
    #[serde(rename = "incident.opened")]
    IncidentOpened { incident: Incident },
    #[serde(rename = "incident.updated")]
    IncidentUpdated { incident: Incident },
    #[serde(rename = "incident.resolved")]
    IncidentResolved { incident: Incident },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckRecorded { .. } => "check.recorded",
            Self::MonitorStatusChanged { .. } => "monitor.status_changed",
            Self::IncidentOpened { .. } => "incident.opened",
            Self::IncidentUpdated { .. } => "incident.updated",
            Self::IncidentResolved { .. } => "incident.resolved",
        }
    }
}

pub fn workspace_channel(workspace_id: Uuid) -> String {
    format!("uptime:workspace:{workspace_id}")
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, workspace_id: Uuid, event: &Event) -> Result<()>;
}

/// Publishes and logs on failure. Live updates are best effort.
pub async fn publish_quietly(publisher: &dyn EventPublisher, workspace_id: Uuid, event: Event) {
    if let Err(e) = publisher.publish(workspace_id, &event).await {
        warn!(
            workspace_id = %workspace_id,
            event = event.name(),
            error = %e,
            "failed to publish event"
        );
    }
}

pub struct RedisPublisher {
    conn: MultiplexedConnection,
}

impl RedisPublisher {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, workspace_id: Uuid, event: &Event) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(workspace_channel(workspace_id), payload).await?;
        Ok(())
    }
}

/// Records every published event; used by tests and local runs.
#[derive(Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<(Uuid, Event)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Uuid, Event)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|(_, e)| e.name()).collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, workspace_id: Uuid, event: &Event) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::internal("event log lock poisoned"))?
            .push((workspace_id, event.clone()));
        Ok(())
    }
}
