use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{Error, Result};

/// Destination of a notification. Serialized with a `type` tag and validated
/// before it is stored, so senders never see a malformed config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Email {
        address: String,
    },
    Sms {
        phone: String,
    },
    Slack {
        webhook_url: String,
    },
    Discord {
        webhook_url: String,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
    },
    PagerDuty {
        routing_key: String,
    },
    Webhook {
        url: String,
        #[serde(default = "default_webhook_method")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// Shared secret for the HMAC signature header.
        secret: Option<String>,
        /// Tera template for the request body; JSON payload when absent.
        body_template: Option<String>,
    },
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Email { .. } => "email",
            Self::Sms { .. } => "sms",
            Self::Slack { .. } => "slack",
            Self::Discord { .. } => "discord",
            Self::Telegram { .. } => "telegram",
            Self::PagerDuty { .. } => "pagerduty",
            Self::Webhook { .. } => "webhook",
        }
    }

    /// Key used to collapse duplicate destinations during fan-out.
    pub fn identity(&self) -> String {
        let address = match self {
            Self::Email { address } => address.trim().to_lowercase(),
            Self::Sms { phone } => phone.clone(),
            Self::Slack { webhook_url } | Self::Discord { webhook_url } => webhook_url.clone(),
            Self::Telegram { bot_token, chat_id } => format!("{bot_token}/{chat_id}"),
            Self::PagerDuty { routing_key } => routing_key.clone(),
            Self::Webhook { url, .. } => url.clone(),
        };
        format!("{}:{}", self.kind(), address)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Email { address } => {
                let valid = address
                    .split_once('@')
                    .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
                if !valid {
                    return Err(Error::validation(format!("invalid email address: {address}")));
                }
            }
            Self::Sms { phone } => {
                let digits = phone.strip_prefix('+').unwrap_or_default();
                if digits.len() < 7 || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err(Error::validation(
                        "phone number must be in international format, e.g. +15551234567",
                    ));
                }
            }
            Self::Slack { webhook_url } | Self::Discord { webhook_url } => {
                validate_url(webhook_url)?;
            }
            Self::Telegram { bot_token, chat_id } => {
                if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
                    return Err(Error::validation("telegram needs a bot token and chat id"));
                }
            }
            Self::PagerDuty { routing_key } => {
                if routing_key.trim().is_empty() {
                    return Err(Error::validation("pagerduty needs a routing key"));
                }
            }
            Self::Webhook { url, method, .. } => {
                validate_url(url)?;
                if !matches!(method.to_uppercase().as_str(), "GET" | "POST" | "PUT") {
                    return Err(Error::validation(format!("unsupported webhook method: {method}")));
                }
            }
        }
        Ok(())
    }
}

fn validate_url(value: &str) -> Result<()> {
    let url = url::Url::parse(value).map_err(|e| Error::validation(format!("invalid url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::validation("url scheme must be http or https"));
    }
    Ok(())
}

/// Binds a monitor to a contact and decides which events reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub contact_id: Uuid,
    pub alert_on_down: bool,
    pub alert_on_up: bool,
    pub alert_on_slow: bool,
    pub slow_threshold_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertContact {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub channel: ChannelConfig,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMember {
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub email: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_config_is_tagged() {
        let config: ChannelConfig = serde_json::from_value(serde_json::json!({
            "type": "webhook",
            "url": "https://hooks.example.com/uptime",
            "secret": "s3cret",
        }))
        .unwrap();

        match &config {
            ChannelConfig::Webhook { method, headers, secret, .. } => {
                assert_eq!(method, "POST");
                assert!(headers.is_empty());
                assert_eq!(secret.as_deref(), Some("s3cret"));
            }
            other => panic!("unexpected config: {other:?}"),
        }
        assert!(config.validate().is_ok());

        let pagerduty: ChannelConfig =
            serde_json::from_value(serde_json::json!({ "type": "pagerduty", "routing_key": "abc" }))
                .unwrap();
        assert_eq!(pagerduty.kind(), "pagerduty");
    }

    #[test]
    fn validation_rejects_malformed_channels() {
        let bad = [
            ChannelConfig::Email { address: "nobody".into() },
            ChannelConfig::Sms { phone: "555-1234".into() },
            ChannelConfig::Slack { webhook_url: "not a url".into() },
            ChannelConfig::Telegram { bot_token: "".into(), chat_id: "1".into() },
            ChannelConfig::PagerDuty { routing_key: " ".into() },
            ChannelConfig::Webhook {
                url: "https://x.io".into(),
                method: "DELETE".into(),
                headers: BTreeMap::new(),
                secret: None,
                body_template: None,
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }

        assert!(ChannelConfig::Email { address: "ops@example.com".into() }.validate().is_ok());
        assert!(ChannelConfig::Sms { phone: "+15551234567".into() }.validate().is_ok());
    }

    #[test]
    fn email_identity_ignores_case() {
        let a = ChannelConfig::Email { address: "Ops@Example.com".into() };
        let b = ChannelConfig::Email { address: "ops@example.com".into() };
        assert_eq!(a.identity(), b.identity());
    }
}
