use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::auth::AuthedMerchant;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::webhooks::{WebhookListResponse, WebhookLogResponse};
use crate::ApiResponse;

const DEFAULT_PAGE_SIZE: u64 = 10;
const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Deserialize)]
struct ListWebhooksQuery {
    limit: Option<u64>,
    offset: Option<u64>,
}

/// Delivery log for the merchant, newest first
async fn list_webhooks(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Query(query): Query<ListWebhooksQuery>,
) -> Result<Json<ApiResponse<WebhookListResponse>>, ServiceError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let list = state
        .webhook_service
        .list_webhooks(&merchant.id, limit, offset)
        .await?;
    Ok(Json(ApiResponse::success(list)))
}

/// Reset a webhook's delivery bookkeeping and schedule an immediate attempt
async fn retry_webhook(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Path(log_id): Path<String>,
) -> Result<Json<ApiResponse<WebhookLogResponse>>, ServiceError> {
    let row = state
        .webhook_service
        .retry_webhook(&merchant.id, &log_id)
        .await?;
    Ok(Json(ApiResponse::success(WebhookLogResponse::try_from(
        &row,
    )?)))
}

/// Webhook journal routes
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_webhooks))
        .route("/:log_id/retry", post(retry_webhook))
}
