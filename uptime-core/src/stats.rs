use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Check;
use crate::store::Store;
use crate::Result;

/// Rolling figures kept on the monitor row.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub uptime_percentage: f64,
    pub avg_response_time: i64,
}

/// Uptime and mean latency over `checks`. An empty window yields zeros.
pub fn compute(checks: &[Check]) -> MonitorStats {
    if checks.is_empty() {
        return MonitorStats::default();
    }

    let (up_count, up_total_ms) = checks
        .iter()
        .filter(|c| c.is_up())
        .fold((0usize, 0i128), |(n, sum), c| {
            (n + 1, sum + i128::from(c.response_time.max(0)))
        });

    let uptime = up_count as f64 / checks.len() as f64 * 100.0;
    let avg = if up_count == 0 {
        0
    } else {
        let mean = up_total_ms / up_count as i128;
        let rounded = if (up_total_ms % up_count as i128) * 2 >= up_count as i128 {
            mean + 1
        } else {
            mean
        };
        i64::try_from(rounded).unwrap_or(i64::MAX)
    };

    MonitorStats {
        uptime_percentage: (uptime * 100.0).round() / 100.0,
        avg_response_time: avg,
    }
}

pub struct StatsAggregator {
    store: Arc<dyn Store>,
    window: Duration,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn Store>, window_hours: i64) -> Self {
        Self {
            store,
            window: Duration::hours(window_hours.max(1)),
        }
    }

    /// Recomputes one monitor's figures from its stored check history.
    pub async fn refresh(&self, monitor_id: Uuid, now: DateTime<Utc>) -> Result<MonitorStats> {
        let checks = self.store.checks_since(monitor_id, now - self.window).await?;
        let stats = compute(&checks);
        self.store.update_monitor_stats(monitor_id, &stats).await?;
        debug!(
            monitor_id = %monitor_id,
            uptime = stats.uptime_percentage,
            avg_ms = stats.avg_response_time,
            "stats refreshed"
        );
        Ok(stats)
    }

    /// Backstop pass over every active monitor. A failure on one monitor is
    /// logged and does not stop the others.
    pub async fn refresh_all(&self, now: DateTime<Utc>) -> Result<usize> {
        let monitors = self.store.active_monitors().await?;
        let mut refreshed = 0;
        for monitor in monitors {
            match self.refresh(monitor.id, now).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(monitor_id = %monitor.id, error = %e, "stats refresh failed"),
            }
        }
        Ok(refreshed)
    }
}
