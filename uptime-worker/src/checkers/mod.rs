//! One checker per monitor type. A checker may fail with an error; the
//! [`Prober`] turns every failure, including a blown time budget, into a
//! `down` result so nothing past this module ever sees a probe error.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;
use uptime_core::models::{CheckResult, Monitor, MonitorType};
use uptime_core::store::Store;

mod domain;
mod heartbeat;
mod http;
mod ping;
mod port;
mod ssl;

pub use domain::DomainChecker;
pub use heartbeat::HeartbeatChecker;
pub use http::HttpChecker;
pub use ping::PingChecker;
pub use port::PortChecker;
pub use ssl::SslChecker;

/// Extra time a checker gets beyond the monitor timeout before it is cut off.
const BACKSTOP_GRACE: Duration = Duration::from_secs(2);

#[async_trait]
pub trait Checker: Send + Sync {
    /// A single probe. Retries belong to the caller.
    async fn check(&self, monitor: &Monitor) -> Result<CheckResult>;
}

/// Routes a monitor to its checker and normalizes the outcome.
pub struct Prober {
    region: String,
    http: HttpChecker,
    ping: PingChecker,
    port: PortChecker,
    ssl: SslChecker,
    domain: DomainChecker,
    heartbeat: HeartbeatChecker,
}

impl Prober {
    pub fn new(region: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            region: region.into(),
            http: HttpChecker,
            ping: PingChecker::new(),
            port: PortChecker,
            ssl: SslChecker,
            domain: DomainChecker,
            heartbeat: HeartbeatChecker::new(store),
        }
    }

    fn checker_for(&self, monitor_type: MonitorType) -> &dyn Checker {
        match monitor_type {
            MonitorType::Http | MonitorType::Https | MonitorType::Keyword => &self.http,
            MonitorType::Ping => &self.ping,
            MonitorType::Port => &self.port,
            MonitorType::Ssl => &self.ssl,
            MonitorType::Domain => &self.domain,
            MonitorType::Heartbeat => &self.heartbeat,
        }
    }

    /// Never fails: errors and timeouts come back as `down`.
    pub async fn probe(&self, monitor: &Monitor) -> CheckResult {
        let started = Instant::now();
        let budget = probe_timeout(monitor) + BACKSTOP_GRACE;
        let checker = self.checker_for(monitor.monitor_type);

        let result = match timeout(budget, checker.check(monitor)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => CheckResult::down(format!("{e:#}"), elapsed_ms(started)),
            Err(_) => CheckResult::down(
                format!("check timed out after {}s", probe_timeout(monitor).as_secs()),
                elapsed_ms(started),
            ),
        };
        debug!(
            monitor_id = %monitor.id,
            kind = %monitor.monitor_type,
            status = %result.status,
            response_time_ms = result.response_time_ms,
            "probe finished"
        );
        result.in_region(&self.region)
    }
}

pub(crate) fn probe_timeout(monitor: &Monitor) -> Duration {
    Duration::from_secs(u64::try_from(monitor.timeout).unwrap_or(30).max(1))
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Host part of a monitor target: `https://a.io/x`, `a.io:8443` and `a.io`
/// all give `a.io`. Bracketed IPv6 literals lose their brackets.
pub(crate) fn target_host(target: &str) -> String {
    let target = target.trim();
    if let Ok(url) = url::Url::parse(target) {
        if let Some(host) = url.host_str() {
            return host.trim_start_matches('[').trim_end_matches(']').to_string();
        }
    }

    let authority = target.split('/').next().unwrap_or(target);
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest).to_string();
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host.to_string(),
        _ => authority.to_string(),
    }
}

/// Port embedded in the target, if any.
pub(crate) fn target_port(target: &str) -> Option<u16> {
    let target = target.trim();
    if let Ok(url) = url::Url::parse(target) {
        if url.host_str().is_some() {
            return url.port();
        }
    }
    let authority = target.split('/').next()?;
    let (host, port) = authority.rsplit_once(':')?;
    if host.contains(':') && !host.ends_with(']') {
        return None;
    }
    port.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime_core::store::MemoryStore;
    use uuid::Uuid;

    #[test]
    fn host_is_extracted_from_urls_and_bare_targets() {
        assert_eq!(target_host("https://shop.example.com/health"), "shop.example.com");
        assert_eq!(target_host("shop.example.com"), "shop.example.com");
        assert_eq!(target_host("shop.example.com:8443"), "shop.example.com");
        assert_eq!(target_host("10.0.0.1"), "10.0.0.1");
        assert_eq!(target_host("[::1]:443"), "::1");
        assert_eq!(target_host("::1"), "::1");
    }

    #[test]
    fn port_comes_from_the_target_when_present() {
        assert_eq!(target_port("db.internal:5432"), Some(5432));
        assert_eq!(target_port("https://example.com:8443/x"), Some(8443));
        assert_eq!(target_port("https://example.com"), None);
        assert_eq!(target_port("example.com"), None);
        assert_eq!(target_port("::1"), None);
    }

    #[tokio::test]
    async fn errors_become_down_results_in_the_worker_region() {
        let prober = Prober::new("eu-west", Arc::new(MemoryStore::new()));
        let mut monitor = Monitor::new(Uuid::new_v4(), "closed", MonitorType::Port, "127.0.0.1");
        monitor.port = Some(1);
        monitor.timeout = 5;

        let result = prober.probe(&monitor).await;
        assert!(!result.is_up());
        assert!(result.error.is_some());
        assert_eq!(result.region, "eu-west");
    }
}
