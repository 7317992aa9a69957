use async_trait::async_trait;
use reqwest::Client;

use super::channel::{Notifier, NotifyError, expect_success};
use super::{NotificationEvent, NotificationMessage};
use crate::models::Severity;

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
}

impl SlackNotifier {
    pub fn new(client: Client, webhook_url: String) -> Self {
        Self {
            webhook_url,
            client,
        }
    }
}

fn payload(message: &NotificationMessage) -> serde_json::Value {
    let color = match (message.event, message.severity) {
        (NotificationEvent::IncidentResolved, _) => "#2eb67d",
        (_, Severity::Critical) => "#d32f2f",
        (_, Severity::Major) => "#e01e5a",
        (_, Severity::Minor) => "#f2c744",
    };
    let emoji = match message.event {
        NotificationEvent::IncidentStarted => ":red_circle:",
        NotificationEvent::IncidentResolved => ":white_check_mark:",
    };

    let mut fields = vec![
        serde_json::json!({ "title": "Target", "value": &message.target, "short": false }),
        serde_json::json!({ "title": "Status", "value": message.status.as_str(), "short": true }),
        serde_json::json!({ "title": "Severity", "value": message.severity.as_str(), "short": true }),
    ];
    if let Some(error) = &message.error {
        fields.push(serde_json::json!({ "title": "Error", "value": error, "short": false }));
    }
    if let Some(minutes) = message.duration_minutes {
        fields.push(serde_json::json!({ "title": "Downtime", "value": format!("{minutes} min"), "short": true }));
    }

    serde_json::json!({
        "text": format!("{emoji} {}", message.subject()),
        "attachments": [{
            "color": color,
            "fields": fields,
            "ts": message.occurred_at.timestamp(),
        }]
    })
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        expect_success(
            self.name(),
            self.client.post(&self.webhook_url).json(&payload(message)),
        )
        .await
    }
}
