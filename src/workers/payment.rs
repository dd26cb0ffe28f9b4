use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::db::DbPool;
use crate::entities::payment::{self, Entity as Payment, PaymentStatus};
use crate::errors::ServiceError;
use crate::processor::{Outcome, OutcomeStrategy};
use crate::queue::{Job, JobQueue, Lane};
use crate::webhooks::events;

use super::{payload_str, JobHandler};

/// Settles pending payments claimed from the `payment-processing` lane. The
/// terminal transition is a compare-and-set on `pending`, so redelivered jobs
/// never flip an already settled payment.
pub struct PaymentWorker {
    db_pool: Arc<DbPool>,
    queue: Arc<dyn JobQueue>,
    strategy: Arc<dyn OutcomeStrategy>,
}

impl PaymentWorker {
    pub fn new(
        db_pool: Arc<DbPool>,
        queue: Arc<dyn JobQueue>,
        strategy: Arc<dyn OutcomeStrategy>,
    ) -> Self {
        Self {
            db_pool,
            queue,
            strategy,
        }
    }

    async fn enqueue_webhook(&self, model: &payment::Model) -> Result<(), ServiceError> {
        let status = PaymentStatus::parse(&model.status);
        let Some(event) = status.and_then(events::payment_event_name) else {
            warn!(payment_id = %model.id, status = %model.status, "No webhook for this state");
            return Ok(());
        };
        self.queue
            .enqueue(Job::new(
                Lane::WebhookDelivery,
                json!({
                    "merchant_id": model.merchant_id,
                    "event": event,
                    "payload": events::payment_event(event, model),
                }),
            ))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for PaymentWorker {
    fn lane(&self) -> Lane {
        Lane::PaymentProcessing
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn handle(&self, job: &Job) -> Result<(), ServiceError> {
        let payment_id = payload_str(job, "payment_id")?;
        let db = &*self.db_pool;

        let model = Payment::find_by_id(payment_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment with ID {} not found", payment_id))
            })?;
        let status = PaymentStatus::parse(&model.status).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Payment {} has unrecognized status '{}'",
                model.id, model.status
            ))
        })?;
        if status.is_terminal() {
            // Redelivery after a crash between settle and webhook enqueue.
            info!(payment_id, status = %model.status, "Already settled, re-emitting webhook");
            return self.enqueue_webhook(&model).await;
        }

        let outcome = self.strategy.decide(&model);
        let now = Utc::now();
        let update = match &outcome {
            Outcome::Approved => Payment::update_many()
                .col_expr(
                    payment::Column::Status,
                    Expr::value(PaymentStatus::Success.as_str()),
                )
                .col_expr(payment::Column::Captured, Expr::value(true))
                .col_expr(payment::Column::UpdatedAt, Expr::value(now)),
            Outcome::Declined { code, description } => Payment::update_many()
                .col_expr(
                    payment::Column::Status,
                    Expr::value(PaymentStatus::Failed.as_str()),
                )
                .col_expr(payment::Column::ErrorCode, Expr::value(code.clone()))
                .col_expr(
                    payment::Column::ErrorDescription,
                    Expr::value(description.clone()),
                )
                .col_expr(payment::Column::UpdatedAt, Expr::value(now)),
        };
        let result = update
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending.as_str()))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            warn!(payment_id, "Settlement raced another delivery, keeping stored state");
        } else {
            info!(payment_id, approved = matches!(outcome, Outcome::Approved), "Payment settled");
        }

        let settled = Payment::find_by_id(payment_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment with ID {} not found", payment_id))
            })?;
        self.enqueue_webhook(&settled).await
    }
}
