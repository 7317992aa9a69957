use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use sha2::Sha256;
use std::collections::BTreeMap;

use super::NotificationMessage;
use super::channel::{Notifier, NotifyError, expect_success};
use super::templates::Templates;

pub const SIGNATURE_HEADER: &str = "X-Uptime-Signature";

type HmacSha256 = Hmac<Sha256>;

/// `sha256=<hex>` HMAC of the exact request body.
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> Result<String, NotifyError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| NotifyError::InvalidConfig(format!("webhook secret: {e}")))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

pub struct WebhookNotifier {
    url: String,
    method: Method,
    headers: HeaderMap,
    secret: Option<String>,
    body_template: Option<String>,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(
        client: Client,
        url: String,
        method: &str,
        headers: &BTreeMap<String, String>,
        secret: Option<String>,
        body_template: Option<String>,
    ) -> Result<Self, NotifyError> {
        let method = match method.to_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            other => {
                return Err(NotifyError::InvalidConfig(format!(
                    "unsupported webhook method: {other}"
                )));
            }
        };

        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| NotifyError::InvalidConfig(format!("header name {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| NotifyError::InvalidConfig(format!("header value for {key}: {e}")))?;
            header_map.insert(name, value);
        }

        Ok(Self {
            url,
            method,
            headers: header_map,
            secret,
            body_template,
            client,
        })
    }

    fn body(&self, message: &NotificationMessage) -> Result<Vec<u8>, NotifyError> {
        if self.method == Method::GET {
            return Ok(Vec::new());
        }
        match &self.body_template {
            Some(template) => Ok(Templates::render_custom(template, message)?.into_bytes()),
            None => serde_json::to_vec(message)
                .map_err(|e| NotifyError::InvalidConfig(format!("payload: {e}"))),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let body = self.body(message)?;

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret.as_bytes(), &body)?);
        }
        if !body.is_empty() {
            if !self.headers.contains_key(CONTENT_TYPE) {
                request = request.header(CONTENT_TYPE, "application/json");
            }
            request = request.body(body);
        }

        expect_success(self.name(), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn signature_matches_known_vector() {
        // RFC 4231 test case 2.
        let signature = sign_payload(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[tokio::test]
    async fn signs_the_body_it_sends() {
        let mut server = mockito::Server::new_async().await;
        let message = NotificationMessage::sample(Utc::now());
        let body = serde_json::to_vec(&message).unwrap();
        let expected = sign_payload(b"s3cret", &body).unwrap();

        let mock = server
            .mock("POST", "/hook")
            .match_header(SIGNATURE_HEADER, expected.as_str())
            .match_header("x-team", "ops")
            .with_status(204)
            .create_async()
            .await;

        let headers = BTreeMap::from([("X-Team".to_string(), "ops".to_string())]);
        let notifier = WebhookNotifier::new(
            Client::new(),
            format!("{}/hook", server.url()),
            "post",
            &headers,
            Some("s3cret".to_string()),
            None,
        )
        .unwrap();

        notifier.send(&message).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", "/hook")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(
            Client::new(),
            format!("{}/hook", server.url()),
            "PUT",
            &BTreeMap::new(),
            None,
            Some(r#"{"text": "{{ subject }}"}"#.to_string()),
        )
        .unwrap();

        let err = notifier
            .send(&NotificationMessage::sample(Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { status: 500, .. }));
    }
}
