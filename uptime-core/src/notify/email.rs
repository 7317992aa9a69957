use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;

use super::NotificationMessage;
use super::channel::{Notifier, NotifyError};
use super::templates::Templates;
use crate::config::SmtpConfig;

pub type SmtpTransport = AsyncSmtpTransport<Tokio1Executor>;

/// STARTTLS relay when credentials are configured, plain SMTP otherwise
/// (local relays and mail catchers).
pub fn build_transport(config: &SmtpConfig) -> Result<SmtpTransport, NotifyError> {
    if config.username.is_empty() {
        return Ok(SmtpTransport::builder_dangerous(&config.host)
            .port(config.port)
            .build());
    }
    let credentials = Credentials::new(config.username.clone(), config.password.clone());
    let transport = SmtpTransport::starttls_relay(&config.host)
        .map_err(|e| NotifyError::Email(e.to_string()))?
        .port(config.port)
        .credentials(credentials)
        .build();
    Ok(transport)
}

pub struct EmailNotifier {
    transport: SmtpTransport,
    from: String,
    to: String,
    templates: Arc<Templates>,
}

impl EmailNotifier {
    pub fn new(transport: SmtpTransport, from: String, to: String, templates: Arc<Templates>) -> Self {
        Self {
            transport,
            from,
            to,
            templates,
        }
    }

    fn build(&self, message: &NotificationMessage) -> Result<Message, NotifyError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Email(e.to_string()))?;
        let to: Mailbox = self
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Email(e.to_string()))?;
        let (text, html) = self.templates.render_email(message)?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject())
            .multipart(MultiPart::alternative_plain_html(text, html))
            .map_err(|e| NotifyError::Email(e.to_string()))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let email = self.build(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Email(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn notifier(to: &str) -> EmailNotifier {
        let config = SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            username: String::new(),
            password: String::new(),
            from: "uptime@example.com".to_string(),
        };
        EmailNotifier::new(
            build_transport(&config).unwrap(),
            config.from,
            to.to_string(),
            Arc::new(Templates::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn builds_multipart_message() {
        let email = notifier("ops@example.com")
            .build(&NotificationMessage::sample(Utc::now()))
            .unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("To: ops@example.com"));
    }

    #[tokio::test]
    async fn rejects_bad_recipient() {
        let err = notifier("not-an-address")
            .build(&NotificationMessage::sample(Utc::now()))
            .unwrap_err();
        assert!(matches!(err, NotifyError::Email(_)));
    }
}
