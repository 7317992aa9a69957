use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use std::time::Instant;
use uptime_core::models::{CheckResult, KeywordMode, Monitor, MonitorConfig};

use super::{Checker, elapsed_ms, probe_timeout};

/// HTTP, HTTPS and keyword monitors.
pub struct HttpChecker;

impl HttpChecker {
    // Redirect policy and TLS verification are per monitor, so is the client.
    fn client(monitor: &Monitor) -> reqwest::Result<Client> {
        let config = &monitor.config;
        let redirects = if config.follow_redirects {
            Policy::limited(config.max_redirects as usize)
        } else {
            Policy::none()
        };
        Client::builder()
            .timeout(probe_timeout(monitor))
            .redirect(redirects)
            .danger_accept_invalid_certs(!config.verify_tls)
            .user_agent(concat!("uptime-checker/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, monitor: &Monitor) -> Result<CheckResult> {
        let config = &monitor.config;
        let client = Self::client(monitor).context("failed to build http client")?;
        let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid http method {}", config.method))?;

        let mut request = client.request(method, &monitor.target);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &config.body {
            request = request.body(body.clone());
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!("request timed out after {}s", monitor.timeout)
            } else {
                anyhow::Error::new(e).context("request failed")
            }
        })?;
        let status_code = response.status().as_u16();
        let body = match &config.keyword {
            Some(_) => Some(response.text().await.context("failed to read response body")?),
            None => None,
        };

        Ok(evaluate(config, status_code, body.as_deref(), elapsed_ms(started)))
    }
}

/// Judges a completed response against the monitor config.
pub fn evaluate(
    config: &MonitorConfig,
    status_code: u16,
    body: Option<&str>,
    response_time_ms: u64,
) -> CheckResult {
    if !config.accepts_status(status_code) {
        return CheckResult::down(
            format!(
                "unexpected status code {status_code} (expected {})",
                config.expected_status
            ),
            response_time_ms,
        )
        .with_status_code(status_code);
    }

    let keyword = config.keyword.as_deref().filter(|k| !k.is_empty());
    if let (Some(keyword), Some(body)) = (keyword, body) {
        let found = body.contains(keyword);
        let failure = match (config.keyword_mode, found) {
            (KeywordMode::Contains, false) => Some(format!("keyword \"{keyword}\" not found in response")),
            (KeywordMode::NotContains, true) => Some(format!("keyword \"{keyword}\" found in response")),
            _ => None,
        };
        if let Some(error) = failure {
            return CheckResult::down(error, response_time_ms).with_status_code(status_code);
        }
    }

    CheckResult::up(response_time_ms).with_status_code(status_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime_core::models::{CheckStatus, MonitorType};
    use uuid::Uuid;

    fn monitor(url: String, expected_status: &str) -> Monitor {
        let mut monitor = Monitor::new(Uuid::new_v4(), "web", MonitorType::Http, url);
        monitor.timeout = 5;
        monitor.config.expected_status = expected_status.to_string();
        monitor
    }

    #[tokio::test]
    async fn unexpected_status_is_down() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let result = HttpChecker
            .check(&monitor(format!("{}/health", server.url()), "200"))
            .await
            .unwrap();

        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.status_code, Some(503));
        assert!(result.error.unwrap().contains("503"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn listed_status_is_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/orders")
            .match_header("x-probe", "1")
            .match_body("{}")
            .with_status(201)
            .create_async()
            .await;

        let mut m = monitor(format!("{}/orders", server.url()), "200,201");
        m.config.method = "post".to_string();
        m.config.headers.insert("x-probe".to_string(), "1".to_string());
        m.config.body = Some("{}".to_string());

        let result = HttpChecker.check(&m).await.unwrap();
        assert_eq!(result.status, CheckStatus::Up);
        assert_eq!(result.status_code, Some(201));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn keyword_is_searched_in_the_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_body("<h1>All systems operational</h1>")
            .create_async()
            .await;

        let mut m = monitor(server.url(), "200");
        m.monitor_type = MonitorType::Keyword;
        m.config.keyword = Some("operational".to_string());
        assert!(HttpChecker.check(&m).await.unwrap().is_up());

        m.config.keyword_mode = KeywordMode::NotContains;
        let result = HttpChecker.check(&m).await.unwrap();
        assert!(!result.is_up());
        assert_eq!(
            result.error.as_deref(),
            Some("keyword \"operational\" found in response")
        );
    }

    #[tokio::test]
    async fn redirects_are_not_followed_when_disabled() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/old")
            .with_status(301)
            .with_header("location", "/new")
            .create_async()
            .await;

        let mut m = monitor(format!("{}/old", server.url()), "200");
        m.config.follow_redirects = false;
        let result = HttpChecker.check(&m).await.unwrap();
        assert_eq!(result.status_code, Some(301));
        assert!(!result.is_up());
    }

    #[test]
    fn evaluate_ignores_keyword_when_status_already_failed() {
        let config = MonitorConfig {
            keyword: Some("ok".to_string()),
            ..Default::default()
        };
        let result = evaluate(&config, 500, Some("ok"), 12);
        assert!(result.error.unwrap().starts_with("unexpected status code 500"));
        assert!(evaluate(&config, 200, Some("ok"), 12).is_up());
        assert!(!evaluate(&config, 200, Some("nope"), 12).is_up());
    }
}
