//! Incident notifications: who receives them, how they are queued, and the
//! per-channel senders that deliver them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Result;
use crate::models::{
    AlertContact, AlertRule, ChannelConfig, Incident, Integration, Monitor, MonitorStatus,
    MonitorType, Severity, WorkspaceMember,
};
use crate::queue::{JobQueue, schedule_notification};
use crate::store::Store;

mod channel;
mod dispatcher;
mod discord;
mod email;
mod pagerduty;
mod slack;
mod sms;
mod telegram;
mod templates;
mod webhook;

pub use channel::{Notifier, NotifyError};
pub use dispatcher::{DeliveryReport, DeliverySummary, Dispatcher, Endpoints};
pub use templates::Templates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    IncidentStarted,
    IncidentResolved,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncidentStarted => "incident_started",
            Self::IncidentResolved => "incident_resolved",
        }
    }
}

/// Channel-neutral content of one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub event: NotificationEvent,
    pub monitor_id: Uuid,
    pub monitor_name: String,
    pub monitor_type: MonitorType,
    pub target: String,
    pub status: MonitorStatus,
    pub severity: Severity,
    pub incident_id: Uuid,
    pub incident_title: String,
    pub occurred_at: DateTime<Utc>,
    pub error: Option<String>,
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub test: bool,
}

impl NotificationMessage {
    pub fn for_incident(
        event: NotificationEvent,
        monitor: &Monitor,
        incident: &Incident,
        error: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let (status, duration_minutes) = match event {
            NotificationEvent::IncidentStarted => (MonitorStatus::Down, None),
            NotificationEvent::IncidentResolved => (
                MonitorStatus::Up,
                Some(incident.duration_minutes(occurred_at)),
            ),
        };
        Self {
            event,
            monitor_id: monitor.id,
            monitor_name: monitor.name.clone(),
            monitor_type: monitor.monitor_type,
            target: monitor.target.clone(),
            status,
            severity: incident.severity,
            incident_id: incident.id,
            incident_title: incident.title.clone(),
            occurred_at,
            error,
            duration_minutes,
            test: false,
        }
    }

    /// Synthetic message used by the test-notification path.
    pub fn sample(now: DateTime<Utc>) -> Self {
        Self {
            event: NotificationEvent::IncidentStarted,
            monitor_id: Uuid::nil(),
            monitor_name: "Example Monitor".to_string(),
            monitor_type: MonitorType::Https,
            target: "https://example.com".to_string(),
            status: MonitorStatus::Down,
            severity: Severity::Major,
            incident_id: Uuid::nil(),
            incident_title: "Example Monitor is down".to_string(),
            occurred_at: now,
            error: Some("This is a test notification".to_string()),
            duration_minutes: None,
            test: true,
        }
    }

    pub fn subject(&self) -> String {
        let prefix = if self.test { "[Test] " } else { "" };
        match self.event {
            NotificationEvent::IncidentStarted => format!(
                "{prefix}[{}] {} is down",
                self.severity.as_str().to_uppercase(),
                self.monitor_name
            ),
            NotificationEvent::IncidentResolved => {
                format!("{prefix}[RESOLVED] {} is back up", self.monitor_name)
            }
        }
    }

    /// Plain-text body shared by the text-only channels.
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{}\nTarget: {}\nStatus: {}\nSeverity: {}\nTime: {}",
            self.subject(),
            self.target,
            self.status,
            self.severity,
            self.occurred_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        if let Some(error) = &self.error {
            text.push_str(&format!("\nError: {error}"));
        }
        if let Some(minutes) = self.duration_minutes {
            text.push_str(&format!("\nDowntime: {minutes} minutes"));
        }
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientSource {
    Rule,
    Member,
    Integration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub name: String,
    pub channel: ChannelConfig,
    pub source: RecipientSource,
}

/// Payload of a `send-notification` job: one recipient, one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub recipient: Recipient,
    pub message: NotificationMessage,
}

/// Merges rule-bound contacts, workspace members (as email) and enabled
/// integrations. Duplicate destinations collapse to the first occurrence.
pub fn resolve_recipients(
    event: NotificationEvent,
    rules: &[(AlertRule, AlertContact)],
    members: &[WorkspaceMember],
    integrations: &[Integration],
) -> Vec<Recipient> {
    let from_rules = rules
        .iter()
        .filter(|(rule, _)| match event {
            NotificationEvent::IncidentStarted => rule.alert_on_down,
            NotificationEvent::IncidentResolved => rule.alert_on_up,
        })
        .map(|(_, contact)| Recipient {
            name: contact.name.clone(),
            channel: contact.channel.clone(),
            source: RecipientSource::Rule,
        });

    let from_members = members.iter().map(|member| Recipient {
        name: member.name.clone(),
        channel: ChannelConfig::Email {
            address: member.email.clone(),
        },
        source: RecipientSource::Member,
    });

    let from_integrations = integrations
        .iter()
        .filter(|integration| integration.enabled)
        .map(|integration| Recipient {
            name: integration.name.clone(),
            channel: integration.channel.clone(),
            source: RecipientSource::Integration,
        });

    let mut seen = HashSet::new();
    from_rules
        .chain(from_members)
        .chain(from_integrations)
        .filter(|recipient| seen.insert(recipient.channel.identity()))
        .collect()
}

pub async fn gather_recipients(
    store: &dyn Store,
    monitor: &Monitor,
    event: NotificationEvent,
) -> Result<Vec<Recipient>> {
    let rules = store.alert_rules(monitor.id).await?;
    let members = store.workspace_members(monitor.workspace_id).await?;
    let integrations = store.integrations(monitor.workspace_id).await?;
    Ok(resolve_recipients(event, &rules, &members, &integrations))
}

/// Queues one delivery job per recipient. Enqueue failures are logged per
/// recipient; the count of queued jobs is returned.
pub async fn fan_out(
    store: &dyn Store,
    queue: &dyn JobQueue,
    monitor: &Monitor,
    message: NotificationMessage,
) -> Result<usize> {
    let recipients = gather_recipients(store, monitor, message.event).await?;
    let total = recipients.len();
    let mut queued = 0;

    for recipient in recipients {
        let kind = recipient.channel.kind();
        let job = NotificationJob {
            recipient,
            message: message.clone(),
        };
        match schedule_notification(queue, job, Duration::ZERO).await {
            Ok(_) => queued += 1,
            Err(e) => warn!(
                monitor_id = %monitor.id,
                channel = kind,
                error = %e,
                "failed to queue notification"
            ),
        }
    }

    info!(
        monitor_id = %monitor.id,
        event = message.event.as_str(),
        queued,
        total,
        "notifications queued"
    );
    Ok(queued)
}
