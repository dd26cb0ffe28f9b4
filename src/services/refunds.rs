use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::db::DbPool;
use crate::entities::payment::{self, Entity as Payment, PaymentStatus};
use crate::entities::refund::{self, Entity as Refund, RefundStatus};
use crate::errors::ServiceError;
use crate::id;
use crate::idempotency::IdempotencyCache;
use crate::locks::PaymentLocks;
use crate::queue::{Job, JobQueue, Lane};

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct CreateRefundRequest {
    /// Minor units; defaults to the full payment amount.
    #[validate(range(min = 1, message = "amount must be a positive integer"))]
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefundResponse {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<&refund::Model> for RefundResponse {
    fn from(model: &refund::Model) -> Self {
        Self {
            id: model.id.clone(),
            payment_id: model.payment_id.clone(),
            amount: model.amount,
            reason: model.reason.clone(),
            status: model.status.clone(),
            created_at: model.created_at,
            processed_at: model.processed_at,
        }
    }
}

pub enum RefundAdmission {
    Created(refund::Model),
    Replayed(String),
}

/// Admission-side refund operations. The sum-cap check and the insert run
/// under a per-payment lock inside one transaction, so concurrent refunds
/// cannot jointly exceed the refundable balance.
#[derive(Clone)]
pub struct RefundService {
    db_pool: Arc<DbPool>,
    queue: Arc<dyn JobQueue>,
    idempotency: Arc<IdempotencyCache>,
    locks: Arc<PaymentLocks>,
}

impl RefundService {
    pub fn new(
        db_pool: Arc<DbPool>,
        queue: Arc<dyn JobQueue>,
        idempotency: Arc<IdempotencyCache>,
        locks: Arc<PaymentLocks>,
    ) -> Self {
        Self {
            db_pool,
            queue,
            idempotency,
            locks,
        }
    }

    #[instrument(skip(self, request), fields(merchant_id = %merchant_id, payment_id = %payment_id))]
    pub async fn create_refund(
        &self,
        merchant_id: &str,
        payment_id: &str,
        request: CreateRefundRequest,
        idempotency_key: Option<&str>,
    ) -> Result<RefundAdmission, ServiceError> {
        request.validate()?;

        if let Some(key) = idempotency_key {
            if let Some(cached) = self.idempotency.lookup(merchant_id, key).await? {
                info!(key, "Replaying cached admission response");
                return Ok(RefundAdmission::Replayed(cached));
            }
        }

        let model = {
            let _guard = self.locks.acquire(payment_id).await;
            let txn = self.db_pool.begin().await?;

            let payment = Payment::find()
                .filter(payment::Column::Id.eq(payment_id))
                .filter(payment::Column::MerchantId.eq(merchant_id))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Payment with ID {} not found", payment_id))
                })?;
            if PaymentStatus::parse(&payment.status) != Some(PaymentStatus::Success) {
                return Err(ServiceError::ValidationError(
                    "Refunds are only allowed for successful payments".to_string(),
                ));
            }

            let amount = request.amount.unwrap_or(payment.amount);
            let already_refunded: i64 = Refund::find()
                .filter(refund::Column::PaymentId.eq(payment_id))
                .all(&txn)
                .await?
                .iter()
                .map(|r| r.amount)
                .sum();
            if already_refunded + amount > payment.amount {
                return Err(ServiceError::ValidationError(format!(
                    "Refund amount {} exceeds the refundable balance {}",
                    amount,
                    payment.amount - already_refunded
                )));
            }

            let model = refund::ActiveModel {
                id: Set(id::refund_id()),
                payment_id: Set(payment_id.to_string()),
                merchant_id: Set(merchant_id.to_string()),
                amount: Set(amount),
                reason: Set(request.reason),
                status: Set(RefundStatus::Pending.as_str().to_string()),
                created_at: Set(Utc::now()),
                processed_at: Set(None),
            }
            .insert(&txn)
            .await?;

            txn.commit().await?;
            model
        };

        self.queue
            .enqueue(Job::new(
                Lane::RefundProcessing,
                json!({ "refund_id": model.id }),
            ))
            .await?;

        if let Some(key) = idempotency_key {
            let body = serde_json::to_string(&RefundResponse::from(&model))?;
            match self.idempotency.store(merchant_id, key, body).await {
                Ok(()) => {}
                Err(ServiceError::Conflict(_)) => {
                    warn!(key, "Idempotency race lost, serving stored response");
                    if let Some(cached) = self.idempotency.lookup(merchant_id, key).await? {
                        return Ok(RefundAdmission::Replayed(cached));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        info!(refund_id = %model.id, amount = model.amount, "Refund admitted");
        Ok(RefundAdmission::Created(model))
    }

    /// Fetches a refund scoped to the owning merchant.
    #[instrument(skip(self))]
    pub async fn get_refund(
        &self,
        merchant_id: &str,
        refund_id: &str,
    ) -> Result<refund::Model, ServiceError> {
        Refund::find()
            .filter(refund::Column::Id.eq(refund_id))
            .filter(refund::Column::MerchantId.eq(merchant_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Refund with ID {} not found", refund_id))
            })
    }
}
