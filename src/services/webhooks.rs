use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::db::DbPool;
use crate::entities::webhook_log::{self, Entity as WebhookLog, WebhookLogStatus};
use crate::errors::ServiceError;
use crate::queue::{Job, JobQueue, Lane};

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookLogResponse {
    pub id: String,
    pub event: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub response_code: Option<i32>,
    pub response_body: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&webhook_log::Model> for WebhookLogResponse {
    type Error = ServiceError;

    fn try_from(model: &webhook_log::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id.clone(),
            event: model.event.clone(),
            payload: serde_json::from_str(&model.payload)?,
            status: model.status.clone(),
            attempts: model.attempts,
            response_code: model.response_code,
            response_body: model.response_body.clone(),
            last_attempt_at: model.last_attempt_at,
            next_retry_at: model.next_retry_at,
            created_at: model.created_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookListResponse {
    pub data: Vec<WebhookLogResponse>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// Read and replay operations over the webhook delivery journal.
#[derive(Clone)]
pub struct WebhookService {
    db_pool: Arc<DbPool>,
    queue: Arc<dyn JobQueue>,
}

impl WebhookService {
    pub fn new(db_pool: Arc<DbPool>, queue: Arc<dyn JobQueue>) -> Self {
        Self { db_pool, queue }
    }

    /// Delivery log for a merchant, newest first.
    #[instrument(skip(self))]
    pub async fn list_webhooks(
        &self,
        merchant_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<WebhookListResponse, ServiceError> {
        let db = &*self.db_pool;
        let scoped = WebhookLog::find().filter(webhook_log::Column::MerchantId.eq(merchant_id));

        let total = scoped.clone().count(db).await?;
        let rows = scoped
            .order_by_desc(webhook_log::Column::CreatedAt)
            .offset(offset)
            .limit(limit)
            .all(db)
            .await?;

        let data = rows
            .iter()
            .map(WebhookLogResponse::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(WebhookListResponse {
            data,
            total,
            limit,
            offset,
        })
    }

    /// Resets a delivery row and enqueues an immediate attempt against it.
    /// Rejected while the engine still owes the row an attempt of its own.
    #[instrument(skip(self))]
    pub async fn retry_webhook(
        &self,
        merchant_id: &str,
        log_id: &str,
    ) -> Result<webhook_log::Model, ServiceError> {
        let row = WebhookLog::find()
            .filter(webhook_log::Column::Id.eq(log_id))
            .filter(webhook_log::Column::MerchantId.eq(merchant_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Webhook log with ID {} not found", log_id))
            })?;

        let in_progress = WebhookLogStatus::parse(&row.status) == Some(WebhookLogStatus::Pending)
            && (row.next_retry_at.is_some() || row.last_attempt_at.is_some());
        if in_progress {
            return Err(ServiceError::ValidationError(
                "A delivery attempt is already scheduled for this webhook".to_string(),
            ));
        }

        let payload: serde_json::Value = serde_json::from_str(&row.payload)?;
        let event = row.event.clone();

        let mut active: webhook_log::ActiveModel = row.into();
        active.status = Set(WebhookLogStatus::Pending.as_str().to_string());
        active.attempts = Set(0);
        active.response_code = Set(None);
        active.response_body = Set(None);
        active.last_attempt_at = Set(None);
        active.next_retry_at = Set(None);
        let updated = active.update(&*self.db_pool).await?;

        self.queue
            .enqueue(Job::new(
                Lane::WebhookDelivery,
                json!({
                    "merchant_id": merchant_id,
                    "event": event,
                    "payload": payload,
                    "log_id": updated.id,
                }),
            ))
            .await?;

        info!(log_id = %updated.id, "Webhook delivery manually re-queued");
        Ok(updated)
    }
}
