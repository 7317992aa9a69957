use async_trait::async_trait;
use reqwest::Client;

use super::NotificationMessage;
use super::channel::{Notifier, NotifyError, expect_success};
use crate::config::SmsConfig;

const MAX_SMS_CHARS: usize = 320;

/// Twilio-compatible SMS gateway: form POST with basic auth.
pub struct SmsNotifier {
    config: SmsConfig,
    to: String,
    client: Client,
}

impl SmsNotifier {
    pub fn new(client: Client, config: SmsConfig, to: String) -> Self {
        Self { config, to, client }
    }
}

fn sms_body(message: &NotificationMessage) -> String {
    let mut body = format!("{} ({})", message.subject(), message.target);
    if let Some(error) = &message.error {
        body.push_str(": ");
        body.push_str(error);
    }
    body.chars().take(MAX_SMS_CHARS).collect()
}

#[async_trait]
impl Notifier for SmsNotifier {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        );
        let body = sms_body(message);
        let form = [
            ("To", self.to.as_str()),
            ("From", self.config.from.as_str()),
            ("Body", body.as_str()),
        ];

        let request = self
            .client
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form);
        expect_success(self.name(), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn body_is_capped() {
        let mut message = NotificationMessage::sample(Utc::now());
        message.error = Some("x".repeat(1000));
        assert_eq!(sms_body(&message).chars().count(), MAX_SMS_CHARS);
    }
}
