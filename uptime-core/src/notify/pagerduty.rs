use async_trait::async_trait;
use reqwest::Client;

use super::channel::{Notifier, NotifyError, expect_success};
use super::{NotificationEvent, NotificationMessage};
use crate::models::Severity;

/// PagerDuty Events API v2. Trigger and resolve share the incident id as the
/// dedup key so a recovery closes the alert it opened.
pub struct PagerDutyNotifier {
    events_url: String,
    routing_key: String,
    client: Client,
}

impl PagerDutyNotifier {
    pub fn new(client: Client, events_url: &str, routing_key: String) -> Self {
        Self {
            events_url: events_url.to_string(),
            routing_key,
            client,
        }
    }
}

fn pagerduty_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        Severity::Major => "error",
        Severity::Minor => "warning",
    }
}

fn event_body(routing_key: &str, message: &NotificationMessage) -> serde_json::Value {
    let dedup_key = message.incident_id.to_string();
    match message.event {
        NotificationEvent::IncidentStarted => serde_json::json!({
            "routing_key": routing_key,
            "event_action": "trigger",
            "dedup_key": dedup_key,
            "payload": {
                "summary": message.subject(),
                "source": &message.target,
                "severity": pagerduty_severity(message.severity),
                "timestamp": message.occurred_at.to_rfc3339(),
                "custom_details": {
                    "monitor": &message.monitor_name,
                    "monitor_type": message.monitor_type.as_str(),
                    "error": &message.error,
                },
            },
        }),
        NotificationEvent::IncidentResolved => serde_json::json!({
            "routing_key": routing_key,
            "event_action": "resolve",
            "dedup_key": dedup_key,
        }),
    }
}

#[async_trait]
impl Notifier for PagerDutyNotifier {
    fn name(&self) -> &'static str {
        "pagerduty"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let body = event_body(&self.routing_key, message);
        expect_success(self.name(), self.client.post(&self.events_url).json(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn resolve_reuses_trigger_dedup_key() {
        let mut message = NotificationMessage::sample(Utc::now());
        let trigger = event_body("key", &message);
        message.event = NotificationEvent::IncidentResolved;
        let resolve = event_body("key", &message);

        assert_eq!(trigger["event_action"], "trigger");
        assert_eq!(trigger["payload"]["severity"], "error");
        assert_eq!(resolve["event_action"], "resolve");
        assert_eq!(trigger["dedup_key"], resolve["dedup_key"]);
    }
}
