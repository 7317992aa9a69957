use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use rand::random;
use std::net::IpAddr;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tracing::warn;
use uptime_core::models::{CheckResult, Monitor};

use super::{Checker, probe_timeout, target_host};

/// ICMP echo. Raw sockets need privileges; without them every ping check
/// reports the socket error instead of panicking.
pub struct PingChecker {
    v4: std::result::Result<Client, String>,
    v6: std::result::Result<Client, String>,
}

impl PingChecker {
    pub fn new() -> Self {
        let open = |kind: ICMP| {
            let config = Config::builder().kind(kind).build();
            Client::new(&config).map_err(|e| {
                warn!(error = %e, "icmp socket unavailable");
                e.to_string()
            })
        };
        Self {
            v4: open(ICMP::V4),
            v6: open(ICMP::V6),
        }
    }

    fn client_for(&self, addr: IpAddr) -> Result<&Client> {
        let client = if addr.is_ipv4() { &self.v4 } else { &self.v6 };
        client
            .as_ref()
            .map_err(|e| anyhow!("icmp socket unavailable: {e}"))
    }
}

impl Default for PingChecker {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) async fn resolve(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| anyhow!("DNS resolution failed for {host}: {e}"))?;
    match addrs.next() {
        Some(addr) => Ok(addr.ip()),
        None => bail!("DNS resolution returned no addresses for {host}"),
    }
}

#[async_trait]
impl Checker for PingChecker {
    async fn check(&self, monitor: &Monitor) -> Result<CheckResult> {
        let host = target_host(&monitor.target);
        let addr = resolve(&host).await?;
        let client = self.client_for(addr)?;

        let mut pinger = client.pinger(addr, PingIdentifier(random())).await;
        pinger.timeout(probe_timeout(monitor));
        match pinger.ping(PingSequence(0), &[0; 32]).await {
            Ok((_reply, rtt)) => {
                let rtt = u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX);
                Ok(CheckResult::up(rtt))
            }
            Err(SurgeError::Timeout { .. }) => Ok(CheckResult::down(
                format!("no echo reply from {addr} within {}s", monitor.timeout),
                probe_timeout(monitor).as_millis() as u64,
            )),
            Err(e) => Err(anyhow!("ping to {addr} failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_addresses_skip_dns() {
        assert_eq!(resolve("127.0.0.1").await.unwrap(), IpAddr::from([127, 0, 0, 1]));
        assert!(resolve("::1").await.unwrap().is_ipv6());
    }

    #[tokio::test]
    async fn unknown_hosts_fail_resolution() {
        let err = resolve("no-such-host.invalid").await.unwrap_err();
        assert!(err.to_string().contains("no-such-host.invalid"));
    }
}
