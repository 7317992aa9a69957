//! Durable work queue between producers (scheduler, API) and workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::Result;
use crate::config::WorkerConfig;
use crate::notify::NotificationJob;

mod memory;
mod redis_queue;

pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Job {
    CheckMonitor {
        monitor_id: Uuid,
        #[serde(default)]
        forced: bool,
    },
    SendNotification(NotificationJob),
    CleanupOldData,
    RefreshStats,
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CheckMonitor { .. } => "check-monitor",
            Self::SendNotification(_) => "send-notification",
            Self::CleanupOldData => "cleanup-old-data",
            Self::RefreshStats => "refresh-stats",
        }
    }

    /// Only deliveries are retried. A failed check is already recorded as
    /// down and the next tick probes again.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::SendNotification(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: Job,
    /// Number of times the job has been claimed, including the current one.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Raw entry held in the in-flight set while a worker owns the job.
    #[serde(skip)]
    pub receipt: Option<String>,
}

impl QueuedJob {
    pub fn new(job: Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            attempts: 0,
            enqueued_at: Utc::now(),
            receipt: None,
        }
    }
}

/// What happened to a job after [`JobQueue::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retrying { delay: Duration },
    Failed,
}

/// Entry kept in the bounded failure history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJob {
    pub id: Uuid,
    pub kind: String,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub keep_completed: usize,
    pub keep_failed: usize,
    /// A claimed job not completed or failed within this long goes back to
    /// the ready set.
    pub lease: Duration,
}

impl QueuePolicy {
    /// Exponential backoff: `backoff * 2^(attempts - 1)`.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exponent)
    }

    pub fn disposition(&self, job: &QueuedJob) -> Disposition {
        if job.job.retryable() && job.attempts < self.max_attempts {
            Disposition::Retrying {
                delay: self.retry_delay(job.attempts),
            }
        } else {
            Disposition::Failed
        }
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(5000),
            keep_completed: 100,
            keep_failed: 500,
            lease: Duration::from_secs(600),
        }
    }
}

impl From<&WorkerConfig> for QueuePolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.job_max_attempts.max(1),
            backoff: Duration::from_millis(config.job_backoff_ms),
            keep_completed: config.keep_completed,
            keep_failed: config.keep_failed,
            lease: Duration::from_secs(config.job_lease_secs.max(1)),
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Makes `job` claimable once `delay` has elapsed.
    async fn enqueue(&self, job: Job, delay: Duration) -> Result<Uuid>;

    /// Takes the oldest ready job, if any. A job is handed to one claimer
    /// only, and returns to the ready set if its lease runs out first.
    async fn claim(&self) -> Result<Option<QueuedJob>>;

    async fn complete(&self, job: &QueuedJob) -> Result<()>;

    /// Requeues retryable jobs with backoff, otherwise records the failure.
    async fn fail(&self, job: QueuedJob, error: &str) -> Result<Disposition>;
}

/// Enqueues a check that bypasses the interval gate.
pub async fn schedule_check(queue: &dyn JobQueue, monitor_id: Uuid, delay: Duration) -> Result<Uuid> {
    queue
        .enqueue(
            Job::CheckMonitor {
                monitor_id,
                forced: true,
            },
            delay,
        )
        .await
}

pub async fn schedule_notification(
    queue: &dyn JobQueue,
    job: NotificationJob,
    delay: Duration,
) -> Result<Uuid> {
    queue.enqueue(Job::SendNotification(job), delay).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_are_tagged_by_kind() {
        let job = Job::CheckMonitor {
            monitor_id: Uuid::nil(),
            forced: false,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "check-monitor");

        let cleanup: Job = serde_json::from_value(serde_json::json!({ "kind": "cleanup-old-data" })).unwrap();
        assert_eq!(cleanup, Job::CleanupOldData);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = QueuePolicy {
            backoff: Duration::from_secs(5),
            ..QueuePolicy::default()
        };
        assert_eq!(policy.retry_delay(1), Duration::from_secs(5));
        assert_eq!(policy.retry_delay(2), Duration::from_secs(10));
        assert_eq!(policy.retry_delay(3), Duration::from_secs(20));
    }

    #[test]
    fn only_notifications_retry() {
        let policy = QueuePolicy::default();
        let mut check = QueuedJob::new(Job::RefreshStats);
        check.attempts = 1;
        assert_eq!(policy.disposition(&check), Disposition::Failed);
    }
}
