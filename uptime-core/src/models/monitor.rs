use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::text_enum;
use crate::{Error, Result};

pub const MIN_INTERVAL_SECS: i32 = 30;
pub const MAX_INTERVAL_SECS: i32 = 3600;
pub const MIN_TIMEOUT_SECS: i32 = 5;
pub const MAX_TIMEOUT_SECS: i32 = 300;
pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Http,
    Https,
    Ping,
    Port,
    Keyword,
    Heartbeat,
    Ssl,
    Domain,
}

text_enum!(MonitorType {
    Http => "http",
    Https => "https",
    Ping => "ping",
    Port => "port",
    Keyword => "keyword",
    Heartbeat => "heartbeat",
    Ssl => "ssl",
    Domain => "domain",
});

impl MonitorType {
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http | Self::Https | Self::Keyword)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
    Paused,
    Maintenance,
}

text_enum!(MonitorStatus {
    Up => "up",
    Down => "down",
    Paused => "paused",
    Maintenance => "maintenance",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordMode {
    #[default]
    Contains,
    NotContains,
}

/// Protocol-specific knobs. Stored as a JSON column; unknown fields fall back
/// to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Comma separated codes, `a-b` ranges or `Nxx` classes.
    pub expected_status: String,
    pub keyword: Option<String>,
    pub keyword_mode: KeywordMode,
    pub verify_tls: bool,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub retries: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            expected_status: "200-299".to_string(),
            keyword: None,
            keyword_mode: KeywordMode::Contains,
            verify_tls: true,
            follow_redirects: true,
            max_redirects: 10,
            retries: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRange {
    pub start: u16,
    pub end: u16,
}

impl StatusRange {
    pub fn contains(&self, code: u16) -> bool {
        (self.start..=self.end).contains(&code)
    }
}

impl MonitorConfig {
    pub fn expected_status_ranges(&self) -> Result<Vec<StatusRange>> {
        let mut ranges = Vec::new();
        for part in self.expected_status.split(',').map(str::trim) {
            if part.is_empty() {
                continue;
            }
            let range = if let Some(class) = part.strip_suffix("xx").or(part.strip_suffix("XX")) {
                let digit: u16 = class
                    .parse()
                    .map_err(|_| Error::validation(format!("invalid status class: {part}")))?;
                StatusRange {
                    start: digit * 100,
                    end: digit * 100 + 99,
                }
            } else if let Some((start, end)) = part.split_once('-') {
                StatusRange {
                    start: parse_code(start.trim())?,
                    end: parse_code(end.trim())?,
                }
            } else {
                let code = parse_code(part)?;
                StatusRange { start: code, end: code }
            };
            if range.start > range.end || !(100..=599).contains(&range.start) || range.end > 599 {
                return Err(Error::validation(format!("invalid status range: {part}")));
            }
            ranges.push(range);
        }
        if ranges.is_empty() {
            return Err(Error::validation("expected status must not be empty"));
        }
        Ok(ranges)
    }

    /// Unparseable specs accept nothing, so a broken config reads as down.
    pub fn accepts_status(&self, code: u16) -> bool {
        self.expected_status_ranges()
            .map(|ranges| ranges.iter().any(|r| r.contains(code)))
            .unwrap_or(false)
    }

    pub fn attempts(&self) -> u32 {
        self.retries.clamp(1, MAX_RETRIES)
    }
}

fn parse_code(value: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| Error::validation(format!("invalid status code: {value}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub monitor_type: MonitorType,
    pub target: String,
    pub port: Option<u16>,
    /// Seconds between checks.
    pub interval: i32,
    /// Seconds before a single probe is abandoned.
    pub timeout: i32,
    pub config: MonitorConfig,
    pub is_active: bool,
    pub status: MonitorStatus,
    pub uptime_percentage: f64,
    pub avg_response_time: i64,
    pub last_check_at: Option<DateTime<Utc>>,
    pub push_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    pub fn new(
        workspace_id: Uuid,
        name: impl Into<String>,
        monitor_type: MonitorType,
        target: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let push_token =
            (monitor_type == MonitorType::Heartbeat).then(|| Uuid::new_v4().simple().to_string());
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            name: name.into(),
            monitor_type,
            target: target.into(),
            port: None,
            interval: 60,
            timeout: 30,
            config: MonitorConfig::default(),
            is_active: true,
            status: MonitorStatus::Up,
            uptime_percentage: 0.0,
            avg_response_time: 0,
            last_check_at: None,
            push_token,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rejects configurations that must never reach the scheduler.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("monitor name is required"));
        }
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.interval) {
            return Err(Error::validation(format!(
                "interval must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS} seconds"
            )));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout) {
            return Err(Error::validation(format!(
                "timeout must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS} seconds"
            )));
        }
        if !(1..=MAX_RETRIES).contains(&self.config.retries) {
            return Err(Error::validation(format!(
                "retries must be between 1 and {MAX_RETRIES}"
            )));
        }

        match self.monitor_type {
            MonitorType::Heartbeat => {
                if self.push_token.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::validation("heartbeat monitors need a push token"));
                }
            }
            _ if self.target.trim().is_empty() => {
                return Err(Error::validation("monitor target is required"));
            }
            MonitorType::Port if self.port.is_none() => {
                return Err(Error::validation("port monitors need a port"));
            }
            kind if kind.is_http() => {
                let url = url::Url::parse(&self.target)
                    .map_err(|e| Error::validation(format!("invalid url: {e}")))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(Error::validation("url scheme must be http or https"));
                }
                self.config.expected_status_ranges()?;
                if kind == MonitorType::Keyword
                    && self.config.keyword.as_deref().is_none_or(str::is_empty)
                {
                    return Err(Error::validation("keyword monitors need a keyword"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_check_at {
            None => true,
            Some(last) => (now - last).num_seconds() >= i64::from(self.interval),
        }
    }

    /// Only up/down monitors take part in status transitions and incidents.
    pub fn tracks_transitions(&self) -> bool {
        self.is_active && matches!(self.status, MonitorStatus::Up | MonitorStatus::Down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn http_monitor() -> Monitor {
        Monitor::new(Uuid::new_v4(), "api", MonitorType::Http, "https://example.com/health")
    }

    #[test]
    fn expected_status_accepts_codes_ranges_and_classes() {
        let mut config = MonitorConfig {
            expected_status: "200".to_string(),
            ..Default::default()
        };
        assert!(config.accepts_status(200));
        assert!(!config.accepts_status(503));

        config.expected_status = "200, 201".to_string();
        assert!(config.accepts_status(201));

        config.expected_status = "200-204,3xx".to_string();
        assert!(config.accepts_status(204));
        assert!(config.accepts_status(301));
        assert!(!config.accepts_status(404));
    }

    #[test]
    fn broken_expected_status_accepts_nothing() {
        let config = MonitorConfig {
            expected_status: "abc".to_string(),
            ..Default::default()
        };
        assert!(config.expected_status_ranges().is_err());
        assert!(!config.accepts_status(200));
    }

    #[test]
    fn validate_rejects_out_of_range_interval_and_timeout() {
        let mut monitor = http_monitor();
        assert!(monitor.validate().is_ok());

        monitor.interval = 10;
        assert!(matches!(monitor.validate(), Err(Error::Validation(_))));

        monitor.interval = 60;
        monitor.timeout = 301;
        assert!(monitor.validate().is_err());

        monitor.timeout = 30;
        monitor.config.retries = 6;
        assert!(monitor.validate().is_err());
    }

    #[test]
    fn validate_checks_type_specific_fields() {
        let mut port = Monitor::new(Uuid::new_v4(), "db", MonitorType::Port, "db.internal");
        assert!(port.validate().is_err());
        port.port = Some(5432);
        assert!(port.validate().is_ok());

        let keyword = Monitor::new(Uuid::new_v4(), "kw", MonitorType::Keyword, "https://x.io");
        assert!(keyword.validate().is_err());

        let heartbeat = Monitor::new(Uuid::new_v4(), "cron", MonitorType::Heartbeat, "");
        assert!(heartbeat.push_token.is_some());
        assert!(heartbeat.validate().is_ok());

        let bad_url = Monitor::new(Uuid::new_v4(), "x", MonitorType::Http, "ftp://x.io");
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn due_after_interval_elapsed() {
        let now = Utc::now();
        let mut monitor = http_monitor();
        assert!(monitor.is_due(now));

        monitor.last_check_at = Some(now - Duration::seconds(30));
        assert!(!monitor.is_due(now));

        monitor.last_check_at = Some(now - Duration::seconds(60));
        assert!(monitor.is_due(now));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: MonitorConfig =
            serde_json::from_value(serde_json::json!({ "method": "HEAD", "keywordMode": "not_contains" }))
                .unwrap();
        assert_eq!(config.method, "HEAD");
        assert_eq!(config.keyword_mode, KeywordMode::NotContains);
        assert_eq!(config.expected_status, "200-299");
        assert!(config.verify_tls);
        assert_eq!(config.attempts(), 1);
    }
}
