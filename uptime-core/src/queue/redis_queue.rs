use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use redis::aio::MultiplexedConnection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Disposition, FailedJob, Job, JobQueue, QueuePolicy, QueuedJob};
use crate::config::RedisConfig;
use crate::redis_conn::{connect, create_redis_client};
use crate::{Error, Result};

const DELAYED_KEY: &str = "uptime:jobs:delayed";
const COMPLETED_KEY: &str = "uptime:jobs:completed";
const FAILED_KEY: &str = "uptime:jobs:failed";
const IN_FLIGHT_KEY: &str = "uptime:jobs:in-flight";

/// Returns expired leases to the ready set, then moves the oldest ready job
/// into the in-flight set scored by its lease deadline.
/// KEYS: delayed, in-flight. ARGV: now ms, lease deadline ms.
const CLAIM_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, member in ipairs(expired) do
  redis.call('ZREM', KEYS[2], member)
  redis.call('ZADD', KEYS[1], ARGV[1], member)
end
local ready = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ready == 0 then
  return false
end
redis.call('ZREM', KEYS[1], ready[1])
redis.call('ZADD', KEYS[2], ARGV[2], ready[1])
return ready[1]
"#;

/// Redis-backed queue. Ready and delayed jobs sit in one sorted set scored by
/// the epoch millisecond they become ready. A claim moves the entry into the
/// in-flight set under a lease; completing or failing the job removes it, and
/// a lease that runs out puts the job back, so a crashed worker loses nothing.
pub struct RedisQueue {
    conn: MultiplexedConnection,
    policy: QueuePolicy,
    claim_script: Script,
    closed: AtomicBool,
}

impl RedisQueue {
    pub async fn open(config: &RedisConfig, policy: QueuePolicy) -> Result<Self> {
        let client = create_redis_client(config)?;
        let conn = connect(&client).await?;
        info!("job queue connected");
        Ok(Self {
            conn,
            policy,
            claim_script: Script::new(CLAIM_SCRIPT),
            closed: AtomicBool::new(false),
        })
    }

    /// Refuses further work. Jobs already in Redis stay there for the next run.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("job queue closed");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::queue("queue is closed"));
        }
        Ok(())
    }

    async fn push_delayed(&self, job: &QueuedJob, delay: Duration) -> Result<()> {
        let ready_at = Utc::now().timestamp_millis()
            + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX / 2);
        let member = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.zadd(DELAYED_KEY, member, ready_at).await?;
        Ok(())
    }

    async fn release(&self, job: &QueuedJob) -> Result<()> {
        let Some(receipt) = &job.receipt else {
            return Ok(());
        };
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrem(IN_FLIGHT_KEY, receipt).await?;
        Ok(())
    }

    async fn push_history(&self, key: &str, entry: String, keep: usize) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(key, entry).await?;
        let stop = isize::try_from(keep).unwrap_or(isize::MAX).saturating_sub(1);
        let _: () = conn.ltrim(key, 0, stop).await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: Job, delay: Duration) -> Result<Uuid> {
        self.ensure_open()?;
        let queued = QueuedJob::new(job);
        self.push_delayed(&queued, delay).await?;
        debug!(job_id = %queued.id, kind = queued.job.kind(), delay_ms = delay.as_millis() as u64, "job enqueued");
        Ok(queued.id)
    }

    async fn claim(&self) -> Result<Option<QueuedJob>> {
        self.ensure_open()?;
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let deadline = now + i64::try_from(self.policy.lease.as_millis()).unwrap_or(i64::MAX / 2);

        loop {
            let claimed: Option<String> = self
                .claim_script
                .key(DELAYED_KEY)
                .key(IN_FLIGHT_KEY)
                .arg(now)
                .arg(deadline)
                .invoke_async(&mut conn)
                .await?;
            let Some(member) = claimed else {
                return Ok(None);
            };

            match serde_json::from_str::<QueuedJob>(&member) {
                Ok(mut job) => {
                    job.attempts += 1;
                    job.receipt = Some(member);
                    return Ok(Some(job));
                }
                Err(e) => {
                    warn!(error = %e, "dropping undecodable job");
                    let _: i64 = conn.zrem(IN_FLIGHT_KEY, &member).await?;
                    let entry = serde_json::to_string(&FailedJob {
                        id: Uuid::nil(),
                        kind: "unknown".to_string(),
                        attempts: 0,
                        error: format!("undecodable job: {e}"),
                        failed_at: Utc::now(),
                    })?;
                    self.push_history(FAILED_KEY, entry, self.policy.keep_failed)
                        .await?;
                }
            }
        }
    }

    async fn complete(&self, job: &QueuedJob) -> Result<()> {
        self.release(job).await?;
        self.push_history(COMPLETED_KEY, job.id.to_string(), self.policy.keep_completed)
            .await
    }

    async fn fail(&self, job: QueuedJob, error: &str) -> Result<Disposition> {
        let disposition = self.policy.disposition(&job);
        match disposition {
            Disposition::Retrying { delay } => {
                self.push_delayed(&job, delay).await?;
            }
            Disposition::Failed => {
                let entry = serde_json::to_string(&FailedJob {
                    id: job.id,
                    kind: job.job.kind().to_string(),
                    attempts: job.attempts,
                    error: error.to_string(),
                    failed_at: Utc::now(),
                })?;
                self.push_history(FAILED_KEY, entry, self.policy.keep_failed)
                    .await?;
            }
        }
        self.release(&job).await?;
        Ok(disposition)
    }
}
