use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Journal of webhook delivery attempts. One row per event; the first attempt
/// inserts it and every later attempt mutates the same row.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "webhook_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub merchant_id: String,
    pub event: String,
    /// The exact JSON text that was signed and sent.
    pub payload: String,
    pub status: String,
    /// Completed delivery attempts so far.
    pub attempts: i32,
    pub response_code: Option<i32>,
    pub response_body: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookLogStatus {
    Pending,
    Success,
    Failed,
}

impl WebhookLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookLogStatus::Pending => "pending",
            WebhookLogStatus::Success => "success",
            WebhookLogStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(WebhookLogStatus::Pending),
            "success" => Some(WebhookLogStatus::Success),
            "failed" => Some(WebhookLogStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for WebhookLogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
