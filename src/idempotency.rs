use chrono::{Duration, Utc};
use sea_orm::error::SqlErr;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::entities::idempotency_key::{self, Entity as IdempotencyKey};
use crate::errors::ServiceError;

/// Idempotency records live this long; expiry is lazy.
pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

/// Admission-layer idempotency cache over the `idempotency_keys` table.
/// Keys are scoped per merchant; the stored value is the exact response body
/// the first admission produced.
pub struct IdempotencyCache {
    db_pool: Arc<DatabaseConnection>,
}

impl IdempotencyCache {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    /// Returns the cached response for `(merchant_id, key)` if one exists and
    /// is still live. An expired record is evicted here and treated as absent.
    #[instrument(skip(self))]
    pub async fn lookup(
        &self,
        merchant_id: &str,
        key: &str,
    ) -> Result<Option<String>, ServiceError> {
        let record = IdempotencyKey::find_by_id((merchant_id.to_string(), key.to_string()))
            .one(&*self.db_pool)
            .await?;

        match record {
            Some(record) if record.expires_at <= Utc::now() => {
                debug!(merchant_id, key, "Evicting expired idempotency record");
                IdempotencyKey::delete_by_id((merchant_id.to_string(), key.to_string()))
                    .exec(&*self.db_pool)
                    .await?;
                Ok(None)
            }
            Some(record) => Ok(Some(record.response_body)),
            None => Ok(None),
        }
    }

    /// Atomic check-and-insert. Fails with `Conflict` when a live record
    /// already exists; the caller must then serve the stored response instead
    /// of its own.
    #[instrument(skip(self, response_body))]
    pub async fn store(
        &self,
        merchant_id: &str,
        key: &str,
        response_body: String,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let txn = self.db_pool.begin().await?;

        let existing = IdempotencyKey::find_by_id((merchant_id.to_string(), key.to_string()))
            .one(&txn)
            .await?;
        if let Some(record) = existing {
            if record.expires_at > now {
                txn.rollback().await?;
                return Err(ServiceError::Conflict(format!(
                    "Idempotency key '{}' already recorded",
                    key
                )));
            }
            IdempotencyKey::delete_by_id((merchant_id.to_string(), key.to_string()))
                .exec(&txn)
                .await?;
        }

        let insert = idempotency_key::ActiveModel {
            merchant_id: Set(merchant_id.to_string()),
            key: Set(key.to_string()),
            response_body: Set(response_body),
            created_at: Set(now),
            expires_at: Set(now + Duration::hours(IDEMPOTENCY_TTL_HOURS)),
        }
        .insert(&txn)
        .await;

        if let Err(e) = insert {
            // Backstop for a raced insert that slipped past the check
            return match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => Err(ServiceError::Conflict(format!(
                    "Idempotency key '{}' already recorded",
                    key
                ))),
                _ => Err(ServiceError::DatabaseError(e)),
            };
        }

        txn.commit().await?;
        Ok(())
    }
}
