use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::time::timeout;
use uptime_core::models::{CheckResult, Monitor};

use super::{Checker, elapsed_ms, probe_timeout, target_host, target_port};

/// Plain TCP connect.
pub struct PortChecker;

#[async_trait]
impl Checker for PortChecker {
    async fn check(&self, monitor: &Monitor) -> Result<CheckResult> {
        let host = target_host(&monitor.target);
        let port = monitor
            .port
            .or_else(|| target_port(&monitor.target))
            .ok_or_else(|| anyhow!("no port configured for {host}"))?;

        let started = Instant::now();
        match timeout(probe_timeout(monitor), TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_stream)) => Ok(CheckResult::up(elapsed_ms(started))),
            Ok(Err(e)) => Ok(CheckResult::down(
                format!("connection to {host}:{port} failed: {e}"),
                elapsed_ms(started),
            )),
            Err(_) => Ok(CheckResult::down(
                format!("connection to {host}:{port} timed out after {}s", monitor.timeout),
                elapsed_ms(started),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use uptime_core::models::MonitorType;
    use uuid::Uuid;

    #[tokio::test]
    async fn open_port_is_up_and_closed_port_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();

        let mut monitor = Monitor::new(Uuid::new_v4(), "db", MonitorType::Port, "127.0.0.1");
        monitor.timeout = 5;
        monitor.port = Some(open);
        assert!(PortChecker.check(&monitor).await.unwrap().is_up());

        drop(listener);
        let result = PortChecker.check(&monitor).await.unwrap();
        assert!(!result.is_up());
        assert!(result.error.unwrap().contains(&format!("127.0.0.1:{open}")));
    }

    #[tokio::test]
    async fn port_may_come_from_the_target() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let monitor = Monitor::new(Uuid::new_v4(), "db", MonitorType::Port, addr.to_string());
        assert!(PortChecker.check(&monitor).await.unwrap().is_up());
    }
}
