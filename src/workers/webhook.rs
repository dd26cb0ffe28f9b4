use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::header::CONTENT_TYPE;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::db::DbPool;
use crate::entities::merchant::Entity as Merchant;
use crate::entities::webhook_log::{self, Entity as WebhookLog, WebhookLogStatus};
use crate::errors::ServiceError;
use crate::id;
use crate::queue::{Job, JobQueue, Lane};
use crate::webhooks::{RetrySchedule, SignatureGenerator, MAX_DELIVERY_ATTEMPTS};

use super::{payload_str, JobHandler};

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Stored response bodies are capped at this many bytes.
const RESPONSE_BODY_LIMIT: usize = 1024;

/// Outbound client for delivery attempts: bounded wait, no redirect
/// following so signed bytes are never re-posted elsewhere.
pub fn delivery_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

fn truncate_response(mut body: String) -> String {
    if body.len() > RESPONSE_BODY_LIMIT {
        let mut end = RESPONSE_BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

enum AttemptOutcome {
    Delivered { code: i32, body: String },
    Failed { code: Option<i32>, body: String },
}

/// Delivers signed event payloads to merchant endpoints, journaling every
/// attempt and scheduling bounded retries on failure.
pub struct WebhookWorker {
    db_pool: Arc<DbPool>,
    queue: Arc<dyn JobQueue>,
    http: reqwest::Client,
    schedule: RetrySchedule,
}

impl WebhookWorker {
    pub fn new(
        db_pool: Arc<DbPool>,
        queue: Arc<dyn JobQueue>,
        http: reqwest::Client,
        schedule: RetrySchedule,
    ) -> Self {
        Self {
            db_pool,
            queue,
            http,
            schedule,
        }
    }

    async fn attempt(&self, url: &str, signature: &str, body: String) -> AttemptOutcome {
        match self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
        {
            Ok(response) => {
                let code = response.status().as_u16() as i32;
                let text = response.text().await.unwrap_or_default();
                if (200..300).contains(&code) {
                    AttemptOutcome::Delivered { code, body: text }
                } else {
                    AttemptOutcome::Failed {
                        code: Some(code),
                        body: text,
                    }
                }
            }
            Err(e) => AttemptOutcome::Failed {
                code: None,
                body: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl JobHandler for WebhookWorker {
    fn lane(&self) -> Lane {
        Lane::WebhookDelivery
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn handle(&self, job: &Job) -> Result<(), ServiceError> {
        let merchant_id = payload_str(job, "merchant_id")?;
        let event = payload_str(job, "event")?.to_string();
        let payload = job.payload.get("payload").cloned().ok_or_else(|| {
            ServiceError::ValidationError("Job payload is missing 'payload'".to_string())
        })?;
        let log_id = job
            .payload
            .get("log_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let db = &*self.db_pool;

        let merchant = Merchant::find_by_id(merchant_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Merchant with ID {} not found", merchant_id))
            })?;
        let Some((url, secret)) = merchant.webhook_config() else {
            // A retry whose endpoint was removed mid-flight must not leave
            // its journal row pending forever
            if let Some(log_id) = &log_id {
                if let Some(row) = WebhookLog::find_by_id(log_id).one(db).await? {
                    let mut active: webhook_log::ActiveModel = row.into();
                    active.status = Set(WebhookLogStatus::Failed.as_str().to_string());
                    active.next_retry_at = Set(None);
                    active.update(db).await?;
                    warn!(
                        log_id,
                        merchant_id, event, "Delivery endpoint removed mid-retry, journal row closed as failed"
                    );
                }
            } else {
                info!(merchant_id, event, "Webhook skipped, merchant has no delivery endpoint");
            }
            return Ok(());
        };

        // Retries carry the journal row id; the stored text stays the signed
        // source of truth across attempts.
        let row = match &log_id {
            Some(log_id) => WebhookLog::find_by_id(log_id)
                .one(db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Webhook log with ID {} not found", log_id))
                })?,
            None => {
                webhook_log::ActiveModel {
                    id: Set(id::webhook_log_id()),
                    merchant_id: Set(merchant_id.to_string()),
                    event: Set(event.clone()),
                    payload: Set(serde_json::to_string(&payload)?),
                    status: Set(WebhookLogStatus::Pending.as_str().to_string()),
                    attempts: Set(0),
                    response_code: Set(None),
                    response_body: Set(None),
                    last_attempt_at: Set(None),
                    next_retry_at: Set(None),
                    created_at: Set(Utc::now()),
                }
                .insert(db)
                .await?
            }
        };

        let row_id = row.id.clone();
        let body = row.payload.clone();
        let attempt_number = row.attempts + 1;
        let signature = SignatureGenerator::new(secret.to_string()).sign(&body);

        let outcome = self.attempt(url, &signature, body).await;
        let now = Utc::now();
        let mut active: webhook_log::ActiveModel = row.into();
        active.attempts = Set(attempt_number);
        active.last_attempt_at = Set(Some(now));

        match outcome {
            AttemptOutcome::Delivered { code, body } => {
                active.status = Set(WebhookLogStatus::Success.as_str().to_string());
                active.response_code = Set(Some(code));
                active.response_body = Set(Some(truncate_response(body)));
                active.next_retry_at = Set(None);
                active.update(db).await?;
                info!(log_id = %row_id, event, attempt = attempt_number, code, "Webhook delivered");
                Ok(())
            }
            AttemptOutcome::Failed { code, body } => {
                active.response_code = Set(code);
                active.response_body = Set(Some(truncate_response(body)));

                if (attempt_number as u32) < MAX_DELIVERY_ATTEMPTS {
                    let delay = self
                        .schedule
                        .delay_before_attempt(attempt_number as u32 + 1)
                        .unwrap_or_default();
                    let next_at = now + ChronoDuration::milliseconds(delay.as_millis() as i64);

                    active.status = Set(WebhookLogStatus::Pending.as_str().to_string());
                    active.next_retry_at = Set(Some(next_at));
                    active.update(db).await?;

                    self.queue
                        .enqueue(Job::delayed(
                            Lane::WebhookDelivery,
                            json!({
                                "merchant_id": merchant_id,
                                "event": event,
                                "payload": payload,
                                "log_id": row_id,
                            }),
                            next_at,
                        ))
                        .await?;
                    warn!(
                        log_id = %row_id,
                        event,
                        attempt = attempt_number,
                        code = code.unwrap_or_default(),
                        retry_at = %next_at,
                        "Webhook delivery failed, retry scheduled"
                    );
                } else {
                    active.status = Set(WebhookLogStatus::Failed.as_str().to_string());
                    active.next_retry_at = Set(None);
                    active.update(db).await?;
                    error!(
                        log_id = %row_id,
                        event,
                        attempts = attempt_number,
                        "Webhook delivery failed permanently"
                    );
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::merchant;
    use crate::migrator::Migrator;
    use crate::queue::{memory::InMemoryJobQueue, QueueTuning};
    use sea_orm::{Database, DatabaseConnection, EntityTrait};
    use sea_orm_migration::MigratorTrait;

    async fn test_db() -> Arc<DatabaseConnection> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    async fn seed_merchant(db: &DatabaseConnection, webhook_url: Option<&str>) -> merchant::Model {
        merchant::ActiveModel {
            id: Set("merch_1".to_string()),
            name: Set("Test Merchant".to_string()),
            api_key: Set("key_1".to_string()),
            api_secret: Set("secret_1".to_string()),
            webhook_url: Set(webhook_url.map(str::to_string)),
            webhook_secret: Set(webhook_url.map(|_| "whsec_test".to_string())),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .unwrap()
    }

    fn delivery_job(log_id: Option<&str>) -> Job {
        let mut payload = json!({
            "merchant_id": "merch_1",
            "event": "payment.success",
            "payload": { "event": "payment.success", "data": {} },
        });
        if let Some(id) = log_id {
            payload["log_id"] = json!(id);
        }
        Job::new(Lane::WebhookDelivery, payload)
    }

    #[tokio::test]
    async fn unconfigured_merchant_is_skipped_without_journaling() {
        let db = test_db().await;
        let queue = Arc::new(InMemoryJobQueue::new(QueueTuning::default()));
        seed_merchant(&db, None).await;

        let worker = WebhookWorker::new(
            db.clone(),
            queue.clone(),
            delivery_client(Duration::from_secs(1)).unwrap(),
            RetrySchedule::sandbox(),
        );
        worker.handle(&delivery_job(None)).await.unwrap();

        let rows = WebhookLog::find().all(&*db).await.unwrap();
        assert!(rows.is_empty());
        let counts = queue.counts(Lane::WebhookDelivery).await.unwrap();
        assert_eq!(counts.ready + counts.delayed, 0);
    }

    #[tokio::test]
    async fn retry_against_a_removed_endpoint_closes_the_journal_row() {
        let db = test_db().await;
        let queue = Arc::new(InMemoryJobQueue::new(QueueTuning::default()));
        seed_merchant(&db, None).await;

        let row = webhook_log::ActiveModel {
            id: Set(id::webhook_log_id()),
            merchant_id: Set("merch_1".to_string()),
            event: Set("payment.success".to_string()),
            payload: Set("{}".to_string()),
            status: Set(WebhookLogStatus::Pending.as_str().to_string()),
            attempts: Set(2),
            response_code: Set(Some(500)),
            response_body: Set(None),
            last_attempt_at: Set(Some(Utc::now())),
            next_retry_at: Set(Some(Utc::now())),
            created_at: Set(Utc::now()),
        }
        .insert(&*db)
        .await
        .unwrap();

        let worker = WebhookWorker::new(
            db.clone(),
            queue.clone(),
            delivery_client(Duration::from_secs(1)).unwrap(),
            RetrySchedule::sandbox(),
        );
        worker.handle(&delivery_job(Some(&row.id))).await.unwrap();

        let row = WebhookLog::find_by_id(&row.id)
            .one(&*db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, WebhookLogStatus::Failed.as_str());
        assert!(row.next_retry_at.is_none());
        let counts = queue.counts(Lane::WebhookDelivery).await.unwrap();
        assert_eq!(counts.ready + counts.delayed, 0);
    }

    #[tokio::test]
    async fn missing_merchant_is_a_permanent_failure() {
        let db = test_db().await;
        let queue = Arc::new(InMemoryJobQueue::new(QueueTuning::default()));
        let worker = WebhookWorker::new(
            db,
            queue,
            delivery_client(Duration::from_secs(1)).unwrap(),
            RetrySchedule::sandbox(),
        );

        let err = worker.handle(&delivery_job(None)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "x".repeat(RESPONSE_BODY_LIMIT + 100);
        assert_eq!(truncate_response(long).len(), RESPONSE_BODY_LIMIT);

        let multibyte = "é".repeat(RESPONSE_BODY_LIMIT);
        let truncated = truncate_response(multibyte);
        assert!(truncated.len() <= RESPONSE_BODY_LIMIT);
        assert!(truncated.is_char_boundary(truncated.len()));

        assert_eq!(truncate_response("short".to_string()), "short");
    }
}
