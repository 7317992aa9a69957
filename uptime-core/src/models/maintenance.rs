use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindow {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl MaintenanceWindow {
    /// Half-open: a window ending exactly at `at` no longer applies.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn window_is_half_open() {
        let now = Utc::now();
        let window = MaintenanceWindow {
            id: Uuid::new_v4(),
            monitor_id: Uuid::new_v4(),
            title: "db upgrade".to_string(),
            starts_at: now - Duration::minutes(5),
            ends_at: now + Duration::minutes(5),
        };
        assert!(window.covers(now));
        assert!(window.covers(window.starts_at));
        assert!(!window.covers(window.ends_at));
        assert!(!window.covers(now - Duration::minutes(6)));
    }
}
