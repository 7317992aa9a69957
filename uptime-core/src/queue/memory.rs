use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{Disposition, FailedJob, Job, JobQueue, QueuePolicy, QueuedJob};
use crate::{Error, Result};

#[derive(Default)]
struct State {
    pending: Vec<(DateTime<Utc>, QueuedJob)>,
    /// Claimed jobs by id: lease deadline and the entry as it was queued.
    in_flight: HashMap<Uuid, (DateTime<Utc>, QueuedJob)>,
    completed: VecDeque<Uuid>,
    failed: VecDeque<FailedJob>,
}

/// In-process queue with the same claim and retry semantics as [`super::RedisQueue`].
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    policy: QueuePolicy,
}

impl MemoryQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            state: Mutex::default(),
            policy,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::internal("memory queue lock poisoned"))
    }

    /// Pending jobs, earliest ready first.
    pub fn pending(&self) -> Vec<Job> {
        let Ok(state) = self.state() else {
            return Vec::new();
        };
        let mut pending = state.pending.clone();
        pending.sort_by_key(|(ready_at, _)| *ready_at);
        pending.into_iter().map(|(_, job)| job.job).collect()
    }

    pub fn completed(&self) -> Vec<Uuid> {
        self.state()
            .map(|s| s.completed.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn failed(&self) -> Vec<FailedJob> {
        self.state()
            .map(|s| s.failed.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.state().map(|s| s.in_flight.len()).unwrap_or_default()
    }

    fn push(&self, job: QueuedJob, delay: Duration) -> Result<()> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| Error::queue(format!("invalid delay: {e}")))?;
        self.state()?.pending.push((Utc::now() + delay, job));
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: Job, delay: Duration) -> Result<Uuid> {
        let queued = QueuedJob::new(job);
        let id = queued.id;
        self.push(queued, delay)?;
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<QueuedJob>> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.policy.lease)
            .map_err(|e| Error::queue(format!("invalid lease: {e}")))?;
        let mut state = self.state()?;

        let expired: Vec<Uuid> = state
            .in_flight
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((_, job)) = state.in_flight.remove(&id) {
                state.pending.push((now, job));
            }
        }

        let next = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, (ready_at, _))| *ready_at <= now)
            .min_by_key(|(_, (ready_at, _))| *ready_at)
            .map(|(index, _)| index);

        Ok(next.map(|index| {
            let (_, queued) = state.pending.swap_remove(index);
            let mut job = queued.clone();
            state.in_flight.insert(queued.id, (now + lease, queued));
            job.attempts += 1;
            job
        }))
    }

    async fn complete(&self, job: &QueuedJob) -> Result<()> {
        let mut state = self.state()?;
        state.in_flight.remove(&job.id);
        state.completed.push_front(job.id);
        state.completed.truncate(self.policy.keep_completed);
        Ok(())
    }

    async fn fail(&self, job: QueuedJob, error: &str) -> Result<Disposition> {
        let disposition = self.policy.disposition(&job);
        self.state()?.in_flight.remove(&job.id);
        match disposition {
            Disposition::Retrying { delay } => self.push(job, delay)?,
            Disposition::Failed => {
                let mut state = self.state()?;
                state.failed.push_front(FailedJob {
                    id: job.id,
                    kind: job.job.kind().to_string(),
                    attempts: job.attempts,
                    error: error.to_string(),
                    failed_at: Utc::now(),
                });
                state.failed.truncate(self.policy.keep_failed);
            }
        }
        Ok(disposition)
    }
}
