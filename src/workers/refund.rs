use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::db::DbPool;
use crate::entities::payment::{Entity as Payment, PaymentStatus};
use crate::entities::refund::{self, Entity as Refund, RefundStatus};
use crate::errors::ServiceError;
use crate::queue::{Job, JobQueue, Lane};
use crate::webhooks::events;

use super::{payload_str, JobHandler};

/// Moves admitted refunds to `processed` and emits the notification job.
pub struct RefundWorker {
    db_pool: Arc<DbPool>,
    queue: Arc<dyn JobQueue>,
}

impl RefundWorker {
    pub fn new(db_pool: Arc<DbPool>, queue: Arc<dyn JobQueue>) -> Self {
        Self { db_pool, queue }
    }

    async fn enqueue_webhook(&self, model: &refund::Model) -> Result<(), ServiceError> {
        if RefundStatus::parse(&model.status) != Some(RefundStatus::Processed) {
            warn!(refund_id = %model.id, status = %model.status, "No webhook for this state");
            return Ok(());
        }
        self.queue
            .enqueue(Job::new(
                Lane::WebhookDelivery,
                json!({
                    "merchant_id": model.merchant_id,
                    "event": events::REFUND_PROCESSED,
                    "payload": events::refund_event(model),
                }),
            ))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for RefundWorker {
    fn lane(&self) -> Lane {
        Lane::RefundProcessing
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn handle(&self, job: &Job) -> Result<(), ServiceError> {
        let refund_id = payload_str(job, "refund_id")?;
        let db = &*self.db_pool;

        let model = Refund::find_by_id(refund_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Refund with ID {} not found", refund_id))
            })?;
        let status = RefundStatus::parse(&model.status).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Refund {} has unrecognized status '{}'",
                model.id, model.status
            ))
        })?;
        if status == RefundStatus::Processed {
            // Redelivery after a crash between process and webhook enqueue.
            info!(refund_id, "Already processed, re-emitting webhook");
            return self.enqueue_webhook(&model).await;
        }

        // Admission guarantees this; a mismatch means the data was tampered
        // with and the job can never succeed.
        let parent = Payment::find_by_id(&model.payment_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Payment with ID {} not found",
                    model.payment_id
                ))
            })?;
        if PaymentStatus::parse(&parent.status) != Some(PaymentStatus::Success) {
            return Err(ServiceError::ValidationError(format!(
                "Refund {} belongs to payment {} which is not successful",
                model.id, parent.id
            )));
        }

        let result = Refund::update_many()
            .col_expr(
                refund::Column::Status,
                Expr::value(RefundStatus::Processed.as_str()),
            )
            .col_expr(refund::Column::ProcessedAt, Expr::value(Utc::now()))
            .filter(refund::Column::Id.eq(refund_id))
            .filter(refund::Column::Status.eq(RefundStatus::Pending.as_str()))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            warn!(refund_id, "Processing raced another delivery, keeping stored state");
        } else {
            info!(refund_id, amount = model.amount, "Refund processed");
        }

        let processed = Refund::find_by_id(refund_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Refund with ID {} not found", refund_id))
            })?;
        self.enqueue_webhook(&processed).await
    }
}
