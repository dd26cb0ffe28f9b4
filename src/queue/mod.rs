/*!
 * # Job Queue
 *
 * This module provides the lane-based work queue backing the settlement
 * workers and the webhook delivery engine: at-least-once delivery, delayed
 * dispatch, exclusive claims with a visibility timeout, and bounded
 * queue-level retries.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::QueueConfig;

pub mod memory;
pub mod redis;

pub use memory::InMemoryJobQueue;
pub use redis::RedisJobQueue;

/// Queue-level delivery attempts a job gets before dead-lettering, unless the
/// backend tuning says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is full")]
    Full,
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Queue backend error: {0}")]
    Backend(String),
}

impl From<QueueError> for crate::errors::ServiceError {
    fn from(err: QueueError) -> Self {
        crate::errors::ServiceError::QueueError(err.to_string())
    }
}

/// The three work lanes. Every job belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lane {
    PaymentProcessing,
    RefundProcessing,
    WebhookDelivery,
}

impl Lane {
    pub const ALL: [Lane; 3] = [
        Lane::PaymentProcessing,
        Lane::RefundProcessing,
        Lane::WebhookDelivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::PaymentProcessing => "payment-processing",
            Lane::RefundProcessing => "refund-processing",
            Lane::WebhookDelivery => "webhook-delivery",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job envelope for queue items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub lane: Lane,
    pub payload: serde_json::Value,
    /// Not-before time; the job is invisible to claims until this passes.
    pub run_at: DateTime<Utc>,
    /// Queue-level delivery attempts already consumed.
    pub attempt: u32,
    /// Stamped from backend tuning on enqueue.
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// A job dispatchable immediately.
    pub fn new(lane: Lane, payload: serde_json::Value) -> Self {
        Self::delayed(lane, payload, Utc::now())
    }

    /// A job held back until `run_at`.
    pub fn delayed(lane: Lane, payload: serde_json::Value, run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lane,
            payload,
            run_at,
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at: Utc::now(),
        }
    }
}

/// Depth counts for one lane.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LaneCounts {
    /// Due and waiting for a claim
    pub ready: u64,
    /// Held back by `run_at`
    pub delayed: u64,
    /// Claimed and not yet acked
    pub in_flight: u64,
}

/// Backend tuning shared by the queue implementations.
#[derive(Debug, Clone)]
pub struct QueueTuning {
    /// How long a claim stays exclusive before the job is redelivered
    pub claim_timeout: Duration,
    /// Fixed delay before a nacked job becomes claimable again
    pub retry_delay: Duration,
    /// Queue-level delivery attempts before dead-lettering
    pub max_attempts: u32,
    /// Upper bound on jobs held per lane (in-memory backend)
    pub max_size: usize,
}

impl Default for QueueTuning {
    fn default() -> Self {
        Self {
            claim_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_size: 10_000,
        }
    }
}

impl From<&QueueConfig> for QueueTuning {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            claim_timeout: Duration::from_secs(cfg.claim_timeout_secs),
            retry_delay: Duration::from_secs(cfg.retry_delay_secs),
            max_attempts: cfg.max_attempts,
            ..Default::default()
        }
    }
}

/// Work queue trait for different backends.
///
/// Delivery is at-least-once: a claimed job that is neither acked nor
/// discarded before the claim timeout is handed out again with its attempt
/// count bumped. Consumers must tolerate duplicates.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job to its lane, honoring `run_at`.
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    /// Claim the next due job on the lane, if any. The claim is exclusive
    /// until acked, nacked, discarded, or timed out.
    async fn claim(&self, lane: Lane) -> Result<Option<Job>, QueueError>;

    /// The job finished; drop it.
    async fn ack(&self, job: &Job) -> Result<(), QueueError>;

    /// The job failed transiently; redeliver after the backend retry delay,
    /// or dead-letter it when attempts are exhausted.
    async fn nack(&self, job: &Job) -> Result<(), QueueError>;

    /// The job can never succeed; drop it without redelivery.
    async fn discard(&self, job: &Job) -> Result<(), QueueError>;

    /// Depth counts for the lane.
    async fn counts(&self, lane: Lane) -> Result<LaneCounts, QueueError>;
}
