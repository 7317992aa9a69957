use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::channel::{Notifier, NotifyError};
use super::discord::DiscordNotifier;
use super::email::{EmailNotifier, SmtpTransport, build_transport};
use super::pagerduty::PagerDutyNotifier;
use super::slack::SlackNotifier;
use super::sms::SmsNotifier;
use super::telegram::TelegramNotifier;
use super::templates::Templates;
use super::webhook::WebhookNotifier;
use super::{NotificationMessage, Recipient, RecipientSource};
use crate::config::{SmsConfig, SmtpConfig};
use crate::models::ChannelConfig;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed third-party API locations, overridable for tests and proxies.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub telegram_api: String,
    pub pagerduty_events: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            telegram_api: "https://api.telegram.org".to_string(),
            pagerduty_events: "https://events.pagerduty.com/v2/enqueue".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub name: String,
    pub channel: &'static str,
    pub delivered: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySummary {
    pub delivered: usize,
    pub failed: usize,
    pub reports: Vec<DeliveryReport>,
}

impl DeliverySummary {
    pub fn is_partial_failure(&self) -> bool {
        self.delivered > 0 && self.failed > 0
    }
}

/// Builds a sender per channel and delivers through it.
pub struct Dispatcher {
    client: Client,
    smtp: Option<(SmtpTransport, String)>,
    sms: Option<SmsConfig>,
    templates: Arc<Templates>,
    endpoints: Endpoints,
}

impl Dispatcher {
    pub fn new(smtp: Option<&SmtpConfig>, sms: Option<SmsConfig>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .user_agent(concat!("uptime-notifier/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let smtp = smtp
            .map(|config| build_transport(config).map(|t| (t, config.from.clone())))
            .transpose()?;

        Ok(Self {
            client,
            smtp,
            sms,
            templates: Arc::new(Templates::new()?),
            endpoints: Endpoints::default(),
        })
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn sender_for(&self, channel: &ChannelConfig) -> Result<Box<dyn Notifier>, NotifyError> {
        let client = self.client.clone();
        let sender: Box<dyn Notifier> = match channel {
            ChannelConfig::Email { address } => {
                let (transport, from) = self.smtp.clone().ok_or(NotifyError::NotConfigured("smtp"))?;
                Box::new(EmailNotifier::new(
                    transport,
                    from,
                    address.clone(),
                    self.templates.clone(),
                ))
            }
            ChannelConfig::Sms { phone } => {
                let config = self.sms.clone().ok_or(NotifyError::NotConfigured("sms gateway"))?;
                Box::new(SmsNotifier::new(client, config, phone.clone()))
            }
            ChannelConfig::Slack { webhook_url } => {
                Box::new(SlackNotifier::new(client, webhook_url.clone()))
            }
            ChannelConfig::Discord { webhook_url } => {
                Box::new(DiscordNotifier::new(client, webhook_url.clone()))
            }
            ChannelConfig::Telegram { bot_token, chat_id } => Box::new(TelegramNotifier::new(
                client,
                &self.endpoints.telegram_api,
                bot_token.clone(),
                chat_id.clone(),
            )),
            ChannelConfig::PagerDuty { routing_key } => Box::new(PagerDutyNotifier::new(
                client,
                &self.endpoints.pagerduty_events,
                routing_key.clone(),
            )),
            ChannelConfig::Webhook {
                url,
                method,
                headers,
                secret,
                body_template,
            } => Box::new(WebhookNotifier::new(
                client,
                url.clone(),
                method,
                headers,
                secret.clone(),
                body_template.clone(),
            )?),
        };
        Ok(sender)
    }

    pub async fn deliver(
        &self,
        recipient: &Recipient,
        message: &NotificationMessage,
    ) -> Result<(), NotifyError> {
        let sender = self.sender_for(&recipient.channel)?;
        sender.send(message).await?;
        info!(
            channel = sender.name(),
            recipient = %recipient.name,
            event = message.event.as_str(),
            monitor_id = %message.monitor_id,
            "notification delivered"
        );
        Ok(())
    }

    /// Delivers to every recipient concurrently. One failing channel never
    /// stops the others; the summary lists each outcome.
    pub async fn deliver_all(
        &self,
        recipients: &[Recipient],
        message: &NotificationMessage,
    ) -> DeliverySummary {
        let outcomes = join_all(
            recipients
                .iter()
                .map(|recipient| self.deliver_reported(recipient, message)),
        )
        .await;

        let delivered = outcomes.iter().filter(|r| r.delivered).count();
        DeliverySummary {
            delivered,
            failed: outcomes.len() - delivered,
            reports: outcomes,
        }
    }

    /// Sends the sample message through one channel and reports the outcome
    /// to the caller instead of queueing.
    pub async fn send_test(&self, name: &str, channel: &ChannelConfig) -> DeliveryReport {
        if let Err(e) = channel.validate() {
            return DeliveryReport {
                name: name.to_string(),
                channel: channel.kind(),
                delivered: false,
                error: Some(e.to_string()),
            };
        }
        let recipient = Recipient {
            name: name.to_string(),
            channel: channel.clone(),
            source: RecipientSource::Rule,
        };
        self.deliver_reported(&recipient, &NotificationMessage::sample(Utc::now()))
            .await
    }

    async fn deliver_reported(
        &self,
        recipient: &Recipient,
        message: &NotificationMessage,
    ) -> DeliveryReport {
        let result = self.deliver(recipient, message).await;
        if let Err(e) = &result {
            warn!(
                channel = recipient.channel.kind(),
                recipient = %recipient.name,
                error = %e,
                "notification failed"
            );
        }
        DeliveryReport {
            name: recipient.name.clone(),
            channel: recipient.channel.kind(),
            delivered: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn recipient(name: &str, channel: ChannelConfig) -> Recipient {
        Recipient {
            name: name.to_string(),
            channel,
            source: RecipientSource::Integration,
        }
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_the_rest() {
        let mut server = mockito::Server::new_async().await;
        let slack = server
            .mock("POST", "/slack")
            .with_status(200)
            .create_async()
            .await;
        let discord = server
            .mock("POST", "/discord")
            .with_status(204)
            .create_async()
            .await;
        let _broken = server
            .mock("POST", "/webhook")
            .with_status(503)
            .create_async()
            .await;

        let recipients = vec![
            recipient(
                "slack",
                ChannelConfig::Slack {
                    webhook_url: format!("{}/slack", server.url()),
                },
            ),
            recipient(
                "broken hook",
                ChannelConfig::Webhook {
                    url: format!("{}/webhook", server.url()),
                    method: "POST".to_string(),
                    headers: BTreeMap::new(),
                    secret: None,
                    body_template: None,
                },
            ),
            recipient(
                "discord",
                ChannelConfig::Discord {
                    webhook_url: format!("{}/discord", server.url()),
                },
            ),
        ];

        let dispatcher = Dispatcher::new(None, None).unwrap();
        let summary = dispatcher
            .deliver_all(&recipients, &NotificationMessage::sample(Utc::now()))
            .await;

        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.failed, 1);
        assert!(summary.is_partial_failure());
        assert_eq!(summary.reports[1].name, "broken hook");
        assert!(!summary.reports[1].delivered);
        slack.assert_async().await;
        discord.assert_async().await;
    }

    #[tokio::test]
    async fn unconfigured_email_is_reported_not_panicked() {
        let dispatcher = Dispatcher::new(None, None).unwrap();
        let report = dispatcher
            .send_test(
                "me",
                &ChannelConfig::Email {
                    address: "me@example.com".to_string(),
                },
            )
            .await;
        assert!(!report.delivered);
        assert_eq!(report.error.as_deref(), Some("smtp is not configured"));
    }

    #[tokio::test]
    async fn invalid_channel_fails_validation_before_sending() {
        let dispatcher = Dispatcher::new(None, None).unwrap();
        let report = dispatcher
            .send_test(
                "bad",
                &ChannelConfig::Slack {
                    webhook_url: "ftp://nope".to_string(),
                },
            )
            .await;
        assert!(!report.delivered);
        assert!(report.error.unwrap().contains("http or https"));
    }

    #[tokio::test]
    async fn pagerduty_and_telegram_use_configured_endpoints() {
        let mut server = mockito::Server::new_async().await;
        let pagerduty = server
            .mock("POST", "/v2/enqueue")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "routing_key": "rk",
                "event_action": "trigger",
            })))
            .with_status(202)
            .create_async()
            .await;
        let telegram = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "chat_id": "42",
                "parse_mode": "MarkdownV2",
            })))
            .with_status(200)
            .create_async()
            .await;

        let dispatcher = Dispatcher::new(None, None).unwrap().with_endpoints(Endpoints {
            telegram_api: server.url(),
            pagerduty_events: format!("{}/v2/enqueue", server.url()),
        });

        let pd = dispatcher
            .send_test("pd", &ChannelConfig::PagerDuty { routing_key: "rk".into() })
            .await;
        let tg = dispatcher
            .send_test(
                "tg",
                &ChannelConfig::Telegram {
                    bot_token: "TOKEN".into(),
                    chat_id: "42".into(),
                },
            )
            .await;

        assert!(pd.delivered, "{:?}", pd.error);
        assert!(tg.delivered, "{:?}", tg.error);
        pagerduty.assert_async().await;
        telegram.assert_async().await;
    }

    #[tokio::test]
    async fn sms_posts_form_with_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/2010-04-01/Accounts/AC123/Messages.json")
            .match_header("authorization", mockito::Matcher::Regex("^Basic ".to_string()))
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("To".into(), "+15551234567".into()),
                mockito::Matcher::UrlEncoded("From".into(), "+15550000000".into()),
            ]))
            .with_status(201)
            .create_async()
            .await;

        let sms = SmsConfig {
            base_url: server.url(),
            account_sid: "AC123".to_string(),
            auth_token: "token".to_string(),
            from: "+15550000000".to_string(),
        };
        let dispatcher = Dispatcher::new(None, Some(sms)).unwrap();
        let report = dispatcher
            .send_test("phone", &ChannelConfig::Sms { phone: "+15551234567".into() })
            .await;

        assert!(report.delivered, "{:?}", report.error);
        mock.assert_async().await;
    }
}
