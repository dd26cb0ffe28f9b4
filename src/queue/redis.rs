use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use tracing::{debug, error, info};

use super::{Job, JobQueue, Lane, LaneCounts, QueueError, QueueTuning};

/// Claims the next due job id: one atomic step moves it from the scheduled
/// zset into the processing zset, so a crash can never strand it outside
/// both. KEYS[1]=scheduled, KEYS[2]=processing, ARGV[1]=now millis,
/// ARGV[2]=claim deadline millis.
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
    return false
end
redis.call('ZREM', KEYS[1], due[1])
redis.call('ZADD', KEYS[2], ARGV[2], due[1])
return due[1]
"#;

/// Moves every job id whose claim deadline has passed back onto the
/// scheduled zset, returning the moved ids. KEYS[1]=processing,
/// KEYS[2]=scheduled, ARGV[1]=now millis.
const REAP_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('ZADD', KEYS[2], ARGV[1], id)
end
return expired
"#;

/// Moves one job id between zsets only when it is still a member of the
/// source, reporting whether the move happened. KEYS[1]=source,
/// KEYS[2]=destination, ARGV[1]=job id, ARGV[2]=destination score.
const MOVE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
    return 1
end
return 0
"#;

/// Job payload retention in Redis. Matches the idempotency horizon; anything
/// older than a day is operator-recovery territory, not queue territory.
const JOB_RETENTION_SECS: usize = 86_400;

/// How many stale scheduled entries a single claim call will step over before
/// giving up (entries whose payload key expired).
const CLAIM_SCAN_LIMIT: usize = 8;

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

fn lane_key(namespace: &str, lane: Lane, suffix: &str) -> String {
    format!("{}:{}:{}", namespace, lane, suffix)
}

/// Redis-backed job queue. Jobs survive process restarts; lanes are
/// independent key groups under one namespace.
///
/// Layout per lane (`{ns}:{lane}`):
/// - `:job:{id}`    job JSON, expiring after [`JOB_RETENTION_SECS`]
/// - `:scheduled`   zset of job ids scored by `run_at` (millis)
/// - `:processing`  zset of job ids scored by claim deadline (millis)
#[derive(Clone)]
pub struct RedisJobQueue {
    connection: ConnectionManager,
    namespace: String,
    tuning: QueueTuning,
}

impl RedisJobQueue {
    pub async fn connect(
        redis_url: &str,
        namespace: impl Into<String>,
        tuning: QueueTuning,
    ) -> Result<Self, QueueError> {
        let namespace = namespace.into();
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        info!(namespace = %namespace, "Redis job queue ready");
        Ok(Self {
            connection,
            namespace,
            tuning,
        })
    }

    fn key(&self, lane: Lane, suffix: &str) -> String {
        lane_key(&self.namespace, lane, suffix)
    }

    fn job_key(&self, lane: Lane, id: &str) -> String {
        lane_key(&self.namespace, lane, &format!("job:{}", id))
    }

    async fn save_job(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let json =
            serde_json::to_string(job).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let _: () = conn
            .set_ex(
                self.job_key(job.lane, &job.id.to_string()),
                json,
                JOB_RETENTION_SECS,
            )
            .await?;
        Ok(())
    }

    async fn load_job(&self, lane: Lane, id: &str) -> Result<Option<Job>, QueueError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(self.job_key(lane, id)).await?;
        match raw {
            Some(json) => {
                let job = serde_json::from_str(&json)
                    .map_err(|e| QueueError::Serialization(e.to_string()))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn delete_job(&self, lane: Lane, id: &str) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.job_key(lane, id)).await?;
        Ok(())
    }

    /// Bumps the stored attempt count of a job already back on the
    /// scheduled zset, or dead-letters it when its attempts are spent. A
    /// crash before the bump leaves the job scheduled with a stale count,
    /// never lost.
    async fn bump_or_drop(&self, lane: Lane, id: &str, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        match self.load_job(lane, id).await? {
            Some(mut job) => {
                job.attempt += 1;
                if job.attempt >= job.max_attempts {
                    error!(
                        job_id = %id,
                        lane = %lane,
                        attempts = job.attempt,
                        reason,
                        "Job exhausted its delivery attempts, dead-lettering"
                    );
                    self.delete_job(lane, id).await?;
                    let _: i64 = conn.zrem(self.key(lane, "scheduled"), id).await?;
                } else {
                    debug!(job_id = %id, lane = %lane, attempt = job.attempt, reason, "Requeueing job");
                    self.save_job(&job).await?;
                }
            }
            None => {
                debug!(job_id = %id, "Requeued entry for a job past retention");
                let _: i64 = conn.zrem(self.key(lane, "scheduled"), id).await?;
            }
        }
        Ok(())
    }

    /// Move jobs whose claim timed out back into the scheduled set.
    async fn reap_expired(&self, lane: Lane) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let now_ms = Utc::now().timestamp_millis();

        let expired: Vec<String> = Script::new(REAP_SCRIPT)
            .key(self.key(lane, "processing"))
            .key(self.key(lane, "scheduled"))
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        for id in expired {
            self.bump_or_drop(lane, &id, "claim expired").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, mut job: Job) -> Result<(), QueueError> {
        job.max_attempts = self.tuning.max_attempts;
        self.save_job(&job).await?;

        let mut conn = self.connection.clone();
        let _: () = conn
            .zadd(
                self.key(job.lane, "scheduled"),
                job.id.to_string(),
                job.run_at.timestamp_millis(),
            )
            .await?;
        Ok(())
    }

    async fn claim(&self, lane: Lane) -> Result<Option<Job>, QueueError> {
        self.reap_expired(lane).await?;

        let mut conn = self.connection.clone();
        let scheduled = self.key(lane, "scheduled");
        let processing = self.key(lane, "processing");

        for _ in 0..CLAIM_SCAN_LIMIT {
            let now_ms = Utc::now().timestamp_millis();
            let deadline =
                now_ms + self.tuning.claim_timeout.as_millis().min(i64::MAX as u128) as i64;

            // One atomic move claims exclusively; the job id is never
            // outside both zsets
            let claimed: Option<String> = Script::new(CLAIM_SCRIPT)
                .key(&scheduled)
                .key(&processing)
                .arg(now_ms)
                .arg(deadline)
                .invoke_async(&mut conn)
                .await?;
            let Some(id) = claimed else {
                return Ok(None);
            };

            match self.load_job(lane, &id).await? {
                Some(job) => return Ok(Some(job)),
                None => {
                    debug!(job_id = %id, "Claimed entry for a job past retention, dropping");
                    let _: i64 = conn.zrem(&processing, &id).await?;
                    continue;
                }
            }
        }

        Ok(None)
    }

    async fn ack(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .zrem(self.key(job.lane, "processing"), job.id.to_string())
            .await?;
        self.delete_job(job.lane, &job.id.to_string()).await
    }

    async fn nack(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let id = job.id.to_string();
        let delay_ms = self.tuning.retry_delay.as_millis().min(i64::MAX as u128) as i64;
        let run_at_ms = Utc::now().timestamp_millis() + delay_ms;

        let moved: i64 = Script::new(MOVE_SCRIPT)
            .key(self.key(job.lane, "processing"))
            .key(self.key(job.lane, "scheduled"))
            .arg(&id)
            .arg(run_at_ms)
            .invoke_async(&mut conn)
            .await?;
        if moved == 0 {
            debug!(job_id = %job.id, "Nack for a job whose claim already expired");
            return Ok(());
        }

        self.bump_or_drop(job.lane, &id, "nacked").await
    }

    async fn discard(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .zrem(self.key(job.lane, "processing"), job.id.to_string())
            .await?;
        debug!(job_id = %job.id, lane = %job.lane, "Job discarded");
        self.delete_job(job.lane, &job.id.to_string()).await
    }

    async fn counts(&self, lane: Lane) -> Result<LaneCounts, QueueError> {
        let mut conn = self.connection.clone();
        let now_ms = Utc::now().timestamp_millis();

        let total: u64 = conn.zcard(self.key(lane, "scheduled")).await?;
        let ready: u64 = conn
            .zcount(self.key(lane, "scheduled"), "-inf", now_ms)
            .await?;
        let in_flight: u64 = conn.zcard(self.key(lane, "processing")).await?;

        Ok(LaneCounts {
            ready,
            delayed: total.saturating_sub(ready),
            in_flight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_namespaced_per_lane() {
        assert_eq!(
            lane_key("paygate:jobs", Lane::WebhookDelivery, "scheduled"),
            "paygate:jobs:webhook-delivery:scheduled"
        );
        assert_eq!(
            lane_key("paygate:jobs", Lane::PaymentProcessing, "job:abc"),
            "paygate:jobs:payment-processing:job:abc"
        );
        assert_ne!(
            lane_key("ns", Lane::PaymentProcessing, "processing"),
            lane_key("ns", Lane::RefundProcessing, "processing")
        );
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn redis_roundtrip() {
        let queue = RedisJobQueue::connect(
            "redis://127.0.0.1:6379",
            format!("paygate-test:{}", uuid::Uuid::new_v4()),
            QueueTuning::default(),
        )
        .await
        .unwrap();

        queue
            .enqueue(Job::new(Lane::PaymentProcessing, json!({"payment_id": "pay_a"})))
            .await
            .unwrap();

        let claimed = queue.claim(Lane::PaymentProcessing).await.unwrap().unwrap();
        assert_eq!(claimed.payload["payment_id"], "pay_a");
        assert!(queue.claim(Lane::PaymentProcessing).await.unwrap().is_none());

        queue.ack(&claimed).await.unwrap();
        let counts = queue.counts(Lane::PaymentProcessing).await.unwrap();
        assert_eq!(counts.in_flight, 0);
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn expired_claim_is_redelivered_not_lost() {
        let tuning = QueueTuning {
            claim_timeout: std::time::Duration::from_millis(50),
            ..QueueTuning::default()
        };
        let queue = RedisJobQueue::connect(
            "redis://127.0.0.1:6379",
            format!("paygate-test:{}", uuid::Uuid::new_v4()),
            tuning,
        )
        .await
        .unwrap();

        queue
            .enqueue(Job::new(Lane::RefundProcessing, json!({"refund_id": "rfnd_a"})))
            .await
            .unwrap();

        // Claim and walk away; the claim must lapse back to scheduled
        let first = queue.claim(Lane::RefundProcessing).await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;

        let second = queue.claim(Lane::RefundProcessing).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt, first.attempt + 1);

        let counts = queue.counts(Lane::RefundProcessing).await.unwrap();
        assert_eq!(counts.in_flight, 1);
        assert_eq!(counts.ready + counts.delayed, 0);
    }
}
