use async_trait::async_trait;
use reqwest::Client;

use super::channel::{Notifier, NotifyError, expect_success};
use super::{NotificationEvent, NotificationMessage};

pub struct DiscordNotifier {
    webhook_url: String,
    client: Client,
}

impl DiscordNotifier {
    pub fn new(client: Client, webhook_url: String) -> Self {
        Self {
            webhook_url,
            client,
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let color = match message.event {
            NotificationEvent::IncidentStarted => 0xE0_1E_5A,
            NotificationEvent::IncidentResolved => 0x2E_B6_7D,
        };

        let mut fields = vec![
            serde_json::json!({ "name": "Target", "value": &message.target }),
            serde_json::json!({ "name": "Severity", "value": message.severity.as_str(), "inline": true }),
            serde_json::json!({ "name": "Status", "value": message.status.as_str(), "inline": true }),
        ];
        if let Some(error) = &message.error {
            fields.push(serde_json::json!({ "name": "Error", "value": error }));
        }

        let payload = serde_json::json!({
            "embeds": [{
                "title": message.subject(),
                "color": color,
                "fields": fields,
                "timestamp": message.occurred_at.to_rfc3339(),
            }]
        });

        expect_success(self.name(), self.client.post(&self.webhook_url).json(&payload)).await
    }
}
