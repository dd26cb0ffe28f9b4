use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::db::DbPool;
use crate::entities::payment::{self, Entity as Payment, PaymentStatus};
use crate::errors::ServiceError;
use crate::id;
use crate::idempotency::IdempotencyCache;
use crate::queue::{Job, JobQueue, Lane};

/// Amount applied when the request omits one, in minor units.
pub const DEFAULT_AMOUNT: i64 = 50_000;
pub const DEFAULT_CURRENCY: &str = "INR";

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1, message = "order_id is required"))]
    pub order_id: String,
    #[validate(range(min = 1, message = "amount must be a positive integer"))]
    pub amount: Option<i64>,
    #[validate(length(min = 3, max = 3, message = "currency must be 3 characters"))]
    pub currency: Option<String>,
    #[validate(length(min = 1, message = "method is required"))]
    pub method: String,
    pub vpa: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub method: String,
    pub vpa: Option<String>,
    pub status: String,
    pub captured: bool,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&payment::Model> for PaymentResponse {
    fn from(model: &payment::Model) -> Self {
        Self {
            id: model.id.clone(),
            order_id: model.order_id.clone(),
            amount: model.amount,
            currency: model.currency.clone(),
            method: model.method.clone(),
            vpa: model.vpa.clone(),
            status: model.status.clone(),
            captured: model.captured,
            error_code: model.error_code.clone(),
            error_description: model.error_description.clone(),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Outcome of payment admission: a freshly created record, or the cached
/// body of an earlier admission under the same idempotency key.
pub enum PaymentAdmission {
    Created(payment::Model),
    Replayed(String),
}

/// Admission-side payment operations. Settlement happens later in the
/// payment worker.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    queue: Arc<dyn JobQueue>,
    idempotency: Arc<IdempotencyCache>,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        queue: Arc<dyn JobQueue>,
        idempotency: Arc<IdempotencyCache>,
    ) -> Self {
        Self {
            db_pool,
            queue,
            idempotency,
        }
    }

    /// Validates and persists a `pending` payment, enqueues its processing
    /// job, and records the response under the idempotency key when one is
    /// supplied. A replayed admission returns the stored body verbatim.
    #[instrument(skip(self, request), fields(merchant_id = %merchant_id, order_id = %request.order_id))]
    pub async fn create_payment(
        &self,
        merchant_id: &str,
        request: CreatePaymentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<PaymentAdmission, ServiceError> {
        request.validate()?;
        if request.method == "upi" && request.vpa.as_deref().map_or(true, str::is_empty) {
            return Err(ServiceError::ValidationError(
                "vpa is required for upi payments".to_string(),
            ));
        }

        if let Some(key) = idempotency_key {
            if let Some(cached) = self.idempotency.lookup(merchant_id, key).await? {
                info!(key, "Replaying cached admission response");
                return Ok(PaymentAdmission::Replayed(cached));
            }
        }

        let now = Utc::now();
        let model = payment::ActiveModel {
            id: Set(id::payment_id()),
            merchant_id: Set(merchant_id.to_string()),
            order_id: Set(request.order_id),
            amount: Set(request.amount.unwrap_or(DEFAULT_AMOUNT)),
            currency: Set(request
                .currency
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())),
            method: Set(request.method),
            vpa: Set(request.vpa),
            status: Set(PaymentStatus::Pending.as_str().to_string()),
            captured: Set(false),
            error_code: Set(None),
            error_description: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await?;

        self.queue
            .enqueue(Job::new(
                Lane::PaymentProcessing,
                json!({ "payment_id": model.id }),
            ))
            .await?;

        if let Some(key) = idempotency_key {
            let body = serde_json::to_string(&PaymentResponse::from(&model))?;
            match self.idempotency.store(merchant_id, key, body).await {
                Ok(()) => {}
                Err(ServiceError::Conflict(_)) => {
                    // Lost an admission race; the winner's body is canonical.
                    warn!(key, "Idempotency race lost, serving stored response");
                    if let Some(cached) = self.idempotency.lookup(merchant_id, key).await? {
                        return Ok(PaymentAdmission::Replayed(cached));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        info!(payment_id = %model.id, amount = model.amount, "Payment admitted");
        Ok(PaymentAdmission::Created(model))
    }

    /// Fetches a payment scoped to the owning merchant.
    #[instrument(skip(self))]
    pub async fn get_payment(
        &self,
        merchant_id: &str,
        payment_id: &str,
    ) -> Result<payment::Model, ServiceError> {
        Payment::find()
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::MerchantId.eq(merchant_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment with ID {} not found", payment_id))
            })
    }

    /// Marks a successful payment as captured. Capturing twice is a no-op.
    #[instrument(skip(self))]
    pub async fn capture_payment(
        &self,
        merchant_id: &str,
        payment_id: &str,
    ) -> Result<payment::Model, ServiceError> {
        let model = self.get_payment(merchant_id, payment_id).await?;
        if PaymentStatus::parse(&model.status) != Some(PaymentStatus::Success) {
            return Err(ServiceError::ValidationError(
                "Only successful payments can be captured".to_string(),
            ));
        }
        if model.captured {
            return Ok(model);
        }

        let mut active: payment::ActiveModel = model.into();
        active.captured = Set(true);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db_pool).await?;

        info!(payment_id = %updated.id, "Payment captured");
        Ok(updated)
    }
}
