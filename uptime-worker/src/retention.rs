//! Daily pruning of check history and closed incidents.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uptime_core::Result;
use uptime_core::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub checks_deleted: u64,
    pub incidents_deleted: u64,
}

pub struct RetentionCleanup {
    store: Arc<dyn Store>,
    days: i64,
}

impl RetentionCleanup {
    pub fn new(store: Arc<dyn Store>, days: i64) -> Self {
        Self {
            store,
            days: days.max(1),
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.days)
    }

    /// Open incidents are never pruned, however old.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = self.cutoff(now);
        let report = CleanupReport {
            checks_deleted: self.store.delete_checks_before(cutoff).await?,
            incidents_deleted: self.store.delete_resolved_incidents_before(cutoff).await?,
        };
        info!(
            %cutoff,
            checks = report.checks_deleted,
            incidents = report.incidents_deleted,
            "retention cleanup completed"
        );
        Ok(report)
    }
}
