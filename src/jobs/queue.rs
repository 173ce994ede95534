//! Redis-backed priority queue with at-least-once delivery.
//!
//! Layout: one list per priority (`jobs:high`, `jobs:normal`, `jobs:low`), a
//! processing list holding in-flight jobs, a scheduled sorted set keyed by
//! due timestamp, and a dead-letter list. Delivery is at-least-once: a job is
//! moved list-to-list atomically and only removed from processing on ack; a
//! reaper returns jobs whose visibility timeout lapsed.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::CacheService;

use super::error::JobResult;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const VISIBILITY_TIMEOUT_SECS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn queue_key(&self) -> &'static str {
        match self {
            Priority::High => "jobs:high",
            Priority::Normal => "jobs:normal",
            Priority::Low => "jobs:low",
        }
    }

    /// Drain order for workers.
    pub const ORDERED: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];
}

/// Work the runtime knows how to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    MetaPurchase { payment_id: String },
    Delivery { payment_id: String },
    ReconcileSweep,
}

impl JobKind {
    pub fn priority(&self) -> Priority {
        match self {
            JobKind::MetaPurchase { .. } => Priority::High,
            JobKind::Delivery { .. } => Priority::Normal,
            JobKind::ReconcileSweep => Priority::Low,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::MetaPurchase { .. } => "meta_purchase",
            JobKind::Delivery { .. } => "delivery",
            JobKind::ReconcileSweep => "reconcile_sweep",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Set when the job is picked up; used by the visibility reaper.
    pub picked_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at: Utc::now(),
            picked_at: None,
        }
    }
}

const PROCESSING_KEY: &str = "jobs:processing";
const SCHEDULED_KEY: &str = "jobs:scheduled";
const DEAD_KEY: &str = "jobs:dead";

#[derive(Clone)]
pub struct JobQueue {
    cache: CacheService,
}

impl JobQueue {
    pub fn new(cache: CacheService) -> Self {
        Self { cache }
    }

    pub async fn enqueue(&self, kind: JobKind) -> JobResult<Uuid> {
        let job = Job::new(kind);
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.cache.connection();
        let _: () = conn.lpush(job.kind.priority().queue_key(), payload).await?;
        info!(job_id = %job.id, kind = job.kind.name(), "job enqueued");
        Ok(job.id)
    }

    /// Moves due scheduled jobs onto their priority lists.
    pub async fn promote_due(&self) -> JobResult<u64> {
        let mut conn = self.cache.connection();
        let now = Utc::now().timestamp();
        let due: Vec<String> = conn
            .zrangebyscore(SCHEDULED_KEY, i64::MIN, now)
            .await?;

        let mut promoted = 0;
        for payload in due {
            let job: Job = serde_json::from_str(&payload)?;
            let removed: i64 = conn.zrem(SCHEDULED_KEY, &payload).await?;
            // Another worker may have promoted it between the range and the
            // zrem; only the one that removed it gets to push.
            if removed > 0 {
                let _: () = conn
                    .lpush(job.kind.priority().queue_key(), &payload)
                    .await?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Pops the highest-priority available job, marking it in-flight.
    pub async fn pop(&self) -> JobResult<Option<Job>> {
        let mut conn = self.cache.connection();
        for priority in Priority::ORDERED {
            let payload: Option<String> = conn
                .rpoplpush(priority.queue_key(), PROCESSING_KEY)
                .await?;
            if let Some(payload) = payload {
                let mut job: Job = serde_json::from_str(&payload)?;
                // Rewrite the processing entry with the pickup timestamp so
                // the reaper can spot stale ones.
                let _: i64 = conn.lrem(PROCESSING_KEY, 1, &payload).await?;
                job.picked_at = Some(Utc::now());
                job.attempts += 1;
                let stamped = serde_json::to_string(&job)?;
                let _: () = conn.lpush(PROCESSING_KEY, stamped).await?;
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Removes a completed job from the processing list.
    pub async fn ack(&self, job: &Job) -> JobResult<()> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.cache.connection();
        let _: i64 = conn.lrem(PROCESSING_KEY, 1, payload).await?;
        Ok(())
    }

    /// Schedules a failed job for a backed-off retry, or dead-letters it once
    /// the attempt budget is spent. Retries sit in the scheduled set until
    /// due; housekeeping promotes them back onto their queue.
    pub async fn nack(&self, job: &Job) -> JobResult<()> {
        self.ack(job).await?;
        let mut conn = self.cache.connection();
        if job.attempts >= job.max_attempts {
            warn!(
                job_id = %job.id,
                kind = job.kind.name(),
                attempts = job.attempts,
                "job dead-lettered"
            );
            let payload = serde_json::to_string(job)?;
            let _: () = conn.lpush(DEAD_KEY, payload).await?;
        } else {
            let mut retry = job.clone();
            retry.picked_at = None;
            let payload = serde_json::to_string(&retry)?;
            let due = Utc::now().timestamp() + retry_delay_secs(retry.attempts);
            let _: () = conn.zadd(SCHEDULED_KEY, payload, due).await?;
        }
        Ok(())
    }

    /// Returns in-flight jobs whose visibility timeout lapsed to their
    /// queues. Covers workers that died mid-job.
    pub async fn reap_stale(&self) -> JobResult<u64> {
        let mut conn = self.cache.connection();
        let in_flight: Vec<String> = conn.lrange(PROCESSING_KEY, 0, -1).await?;
        let now = Utc::now();

        let mut reaped = 0;
        for payload in in_flight {
            let job: Job = match serde_json::from_str(&payload) {
                Ok(job) => job,
                Err(_) => continue,
            };
            let stale = job
                .picked_at
                .map(|t| (now - t).num_seconds() > VISIBILITY_TIMEOUT_SECS)
                .unwrap_or(true);
            if stale {
                let removed: i64 = conn.lrem(PROCESSING_KEY, 1, &payload).await?;
                if removed > 0 {
                    warn!(job_id = %job.id, "reaping stale in-flight job");
                    self.nack(&job).await?;
                    reaped += 1;
                }
            }
        }
        Ok(reaped)
    }

    pub async fn queue_depth(&self, priority: Priority) -> JobResult<u64> {
        let mut conn = self.cache.connection();
        Ok(conn.llen(priority.queue_key()).await?)
    }
}

/// Exponential backoff per attempt: 2s, 4s, 8s, capped at one minute.
fn retry_delay_secs(attempts: u32) -> i64 {
    let exp = attempts.min(6);
    (1i64 << exp).min(60).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kinds_map_to_their_priorities() {
        assert_eq!(
            JobKind::MetaPurchase {
                payment_id: "p".to_string()
            }
            .priority(),
            Priority::High
        );
        assert_eq!(
            JobKind::Delivery {
                payment_id: "p".to_string()
            }
            .priority(),
            Priority::Normal
        );
        assert_eq!(JobKind::ReconcileSweep.priority(), Priority::Low);
    }

    #[test]
    fn job_envelope_round_trips_through_json() {
        let job = Job::new(JobKind::MetaPurchase {
            payment_id: "BOT1_1700000000_aabbccdd".to_string(),
        });
        let payload = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.attempts, 0);
        assert!(matches!(parsed.kind, JobKind::MetaPurchase { .. }));
    }

    #[test]
    fn retry_backoff_grows_and_caps() {
        assert_eq!(retry_delay_secs(1), 2);
        assert_eq!(retry_delay_secs(2), 4);
        assert_eq!(retry_delay_secs(3), 8);
        assert_eq!(retry_delay_secs(10), 60);
    }

    #[test]
    fn drain_order_is_high_to_low() {
        assert_eq!(
            Priority::ORDERED.map(|p| p.queue_key()),
            ["jobs:high", "jobs:normal", "jobs:low"]
        );
    }
}
