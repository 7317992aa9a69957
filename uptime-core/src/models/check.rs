use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

text_enum!(CheckStatus {
    Up => "up",
    Down => "down",
});

/// Normalized outcome of one probe, as produced by a checker or pushed in
/// from outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub status: CheckStatus,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub region: String,
    pub ssl_expiry_days: Option<i64>,
    pub warning: Option<String>,
}

impl CheckResult {
    pub fn up(response_time_ms: u64) -> Self {
        Self {
            status: CheckStatus::Up,
            status_code: None,
            response_time_ms,
            error: None,
            region: String::new(),
            ssl_expiry_days: None,
            warning: None,
        }
    }

    pub fn down(error: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            status: CheckStatus::Down,
            error: Some(error.into()),
            ..Self::up(response_time_ms)
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_ssl_expiry_days(mut self, days: i64) -> Self {
        self.ssl_expiry_days = Some(days);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == CheckStatus::Up
    }
}

/// Immutable record of one probe outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub status: CheckStatus,
    pub status_code: Option<i32>,
    pub response_time: i64,
    pub error: Option<String>,
    pub region: String,
    pub ssl_expiry_days: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

impl Check {
    pub fn from_result(monitor_id: Uuid, result: &CheckResult, checked_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            monitor_id,
            status: result.status,
            status_code: result.status_code.map(i32::from),
            response_time: i64::try_from(result.response_time_ms).unwrap_or(i64::MAX),
            error: result.error.clone(),
            region: result.region.clone(),
            ssl_expiry_days: result.ssl_expiry_days,
            checked_at,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == CheckStatus::Up
    }
}
