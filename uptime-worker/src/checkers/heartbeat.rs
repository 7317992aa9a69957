use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uptime_core::models::{CheckResult, Monitor};
use uptime_core::store::Store;

use super::Checker;

/// Passive: looks at when the monitor last pushed instead of probing.
pub struct HeartbeatChecker {
    store: Arc<dyn Store>,
}

impl HeartbeatChecker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Checker for HeartbeatChecker {
    async fn check(&self, monitor: &Monitor) -> Result<CheckResult> {
        let last_push = self.store.last_push_at(monitor.id).await?;
        Ok(evaluate(
            last_push,
            monitor.created_at,
            monitor.interval,
            Utc::now(),
        ))
    }
}

/// A monitor that never pushed is measured from its creation, so it gets one
/// interval of grace before going down.
pub fn evaluate(
    last_push: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    interval_secs: i32,
    now: DateTime<Utc>,
) -> CheckResult {
    let since = last_push.unwrap_or(created_at);
    let elapsed = (now - since).num_seconds().max(0);
    if elapsed <= i64::from(interval_secs) {
        return CheckResult::up(0);
    }
    let error = match last_push {
        Some(_) => format!(
            "no heartbeat received for {elapsed}s (expected every {interval_secs}s)"
        ),
        None => format!("no heartbeat received since the monitor was created {elapsed}s ago"),
    };
    CheckResult::down(error, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uptime_core::models::{Check, MonitorType, PUSH_REGION};
    use uptime_core::store::MemoryStore;
    use uuid::Uuid;

    #[test]
    fn recent_push_is_up_and_stale_push_is_down() {
        let now = Utc::now();
        let created = now - Duration::days(1);

        assert!(evaluate(Some(now - Duration::seconds(30)), created, 60, now).is_up());

        let stale = evaluate(Some(now - Duration::seconds(90)), created, 60, now);
        assert!(!stale.is_up());
        assert_eq!(
            stale.error.as_deref(),
            Some("no heartbeat received for 90s (expected every 60s)")
        );
    }

    #[test]
    fn new_monitor_gets_one_interval_of_grace() {
        let now = Utc::now();
        assert!(evaluate(None, now - Duration::seconds(20), 60, now).is_up());
        assert!(!evaluate(None, now - Duration::seconds(120), 60, now).is_up());
    }

    #[tokio::test]
    async fn reads_last_push_from_the_store() {
        let store = Arc::new(MemoryStore::new());
        let mut monitor = Monitor::new(Uuid::new_v4(), "cron", MonitorType::Heartbeat, "");
        monitor.created_at = Utc::now() - Duration::days(1);
        store.insert_monitor(monitor.clone()).unwrap();

        let checker = HeartbeatChecker::new(store.clone());
        assert!(!checker.check(&monitor).await.unwrap().is_up());

        let push = CheckResult::up(0).in_region(PUSH_REGION);
        store
            .insert_check(&Check::from_result(monitor.id, &push, Utc::now()))
            .await
            .unwrap();
        assert!(checker.check(&monitor).await.unwrap().is_up());
    }
}
