use async_trait::async_trait;
use thiserror::Error;

use super::NotificationMessage;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{channel} returned {status}: {body}")]
    Rejected {
        channel: &'static str,
        status: u16,
        body: String,
    },

    #[error("templating error: {0}")]
    Template(#[from] tera::Error),

    #[error("email error: {0}")]
    Email(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),
}

impl NotifyError {
    /// Builds a [`NotifyError::Rejected`] from a non-2xx response.
    pub async fn rejected(channel: &'static str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Self::Rejected {
            channel,
            status,
            body,
        }
    }
}

/// One delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

/// Posts `request` and maps non-success statuses to [`NotifyError::Rejected`].
pub(crate) async fn expect_success(
    channel: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<(), NotifyError> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(NotifyError::rejected(channel, response).await);
    }
    Ok(())
}
