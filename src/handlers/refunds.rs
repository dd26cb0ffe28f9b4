use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};

use crate::auth::AuthedMerchant;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::refunds::RefundResponse;
use crate::ApiResponse;

/// Get refund by ID
async fn get_refund(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Path(refund_id): Path<String>,
) -> Result<Json<ApiResponse<RefundResponse>>, ServiceError> {
    let refund = state
        .refund_service
        .get_refund(&merchant.id, &refund_id)
        .await?;
    Ok(Json(ApiResponse::success(RefundResponse::from(&refund))))
}

/// Refund routes. Refund creation is nested under the payment routes since
/// it addresses a payment.
pub fn refund_routes() -> Router<AppState> {
    Router::new().route("/:refund_id", get(get_refund))
}
