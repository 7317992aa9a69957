use config::{Environment, builder::DefaultState};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.database
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration: i64,
}

/// Cadence of the periodic tasks driven by the scheduler process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub stats_refresh_secs: u64,
    pub cleanup_secs: u64,
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn stats_refresh(&self) -> Duration {
        Duration::from_secs(self.stats_refresh_secs.max(1))
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub region: String,
    pub poll_interval_ms: u64,
    /// Pause between probe attempts of a single check job.
    pub retry_delay_ms: u64,
    pub job_max_attempts: u32,
    pub job_backoff_ms: u64,
    pub keep_completed: usize,
    pub keep_failed: usize,
    /// How long a claimed job may run before another worker takes it back.
    pub job_lease_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    pub window_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub retention: RetentionConfig,
    pub stats: StatsConfig,
    pub smtp: Option<SmtpConfig>,
    pub sms: Option<SmsConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut cfg = Self::defaults()?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            cfg = cfg.set_override("database.url", database_url)?;
        }

        cfg = cfg
            .set_override(
                "redis.url",
                env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            )?
            .set_override(
                "auth.jwt_secret",
                env::var("JWT_SECRET").unwrap_or_else(|_| "your-secret-key".to_string()),
            )?;

        if let Ok(port) = env::var("PORT") {
            cfg = cfg.set_override("server.port", port.parse::<u16>().unwrap_or(8080))?;
        }

        cfg.add_source(
            Environment::with_prefix("UPTIME")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
    }

    fn defaults() -> Result<config::ConfigBuilder<DefaultState>, config::ConfigError> {
        config::Config::builder()
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.username", "uptime")?
            .set_default("database.password", "password")?
            .set_default("database.database", "uptime")?
            .set_default("database.max_connections", 10)?
            .set_default("redis.max_connections", 10)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("auth.jwt_expiration", 86400)?
            .set_default("scheduler.tick_secs", 60)?
            .set_default("scheduler.stats_refresh_secs", 3600)?
            .set_default("scheduler.cleanup_secs", 86400)?
            .set_default("worker.concurrency", 10)?
            .set_default("worker.region", "default")?
            .set_default("worker.poll_interval_ms", 500)?
            .set_default("worker.retry_delay_ms", 1000)?
            .set_default("worker.job_max_attempts", 3)?
            .set_default("worker.job_backoff_ms", 5000)?
            .set_default("worker.keep_completed", 100)?
            .set_default("worker.keep_failed", 500)?
            .set_default("worker.job_lease_secs", 600)?
            .set_default("retention.days", 90)?
            .set_default("stats.window_hours", 24)
    }
}
