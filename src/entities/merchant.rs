use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "merchants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub name: String,
    #[sea_orm(unique)]
    pub api_key: String,
    pub api_secret: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Delivery needs both an endpoint and a signing secret; anything less is
    /// treated as webhooks-not-configured.
    pub fn webhook_config(&self) -> Option<(&str, &str)> {
        match (self.webhook_url.as_deref(), self.webhook_secret.as_deref()) {
            (Some(url), Some(secret)) if !url.is_empty() && !secret.is_empty() => {
                Some((url, secret))
            }
            _ => None,
        }
    }
}
