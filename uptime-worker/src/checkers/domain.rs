use anyhow::Result;
use async_trait::async_trait;
use std::time::Instant;
use uptime_core::models::{CheckResult, Monitor};

use super::{Checker, elapsed_ms, target_host};

/// Resolution only; registration expiry is not looked up.
pub struct DomainChecker;

#[async_trait]
impl Checker for DomainChecker {
    async fn check(&self, monitor: &Monitor) -> Result<CheckResult> {
        let host = target_host(&monitor.target);
        let started = Instant::now();
        let result = match tokio::net::lookup_host((host.as_str(), 0)).await {
            Ok(mut addrs) => {
                if addrs.next().is_some() {
                    CheckResult::up(elapsed_ms(started))
                } else {
                    CheckResult::down(
                        format!("DNS resolution returned no addresses for {host}"),
                        elapsed_ms(started),
                    )
                }
            }
            Err(e) => CheckResult::down(
                format!("DNS resolution failed for {host}: {e}"),
                elapsed_ms(started),
            ),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime_core::models::MonitorType;
    use uuid::Uuid;

    #[tokio::test]
    async fn unresolvable_domain_is_down() {
        let monitor = Monitor::new(
            Uuid::new_v4(),
            "dns",
            MonitorType::Domain,
            "https://no-such-host.invalid/",
        );
        let result = DomainChecker.check(&monitor).await.unwrap();
        assert!(!result.is_up());
        assert!(result.error.unwrap().starts_with("DNS resolution"));
    }

    #[tokio::test]
    async fn localhost_resolves() {
        let monitor = Monitor::new(Uuid::new_v4(), "dns", MonitorType::Domain, "localhost");
        assert!(DomainChecker.check(&monitor).await.unwrap().is_up());
    }
}
