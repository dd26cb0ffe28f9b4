use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Extension, Json, Router,
};

use crate::auth::AuthedMerchant;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payments::{CreatePaymentRequest, PaymentAdmission, PaymentResponse};
use crate::services::refunds::{CreateRefundRequest, RefundAdmission, RefundResponse};
use crate::ApiResponse;

/// Admit a payment. Send `Idempotency-Key` to make the call safely
/// retryable; a replayed admission returns the original body with
/// `X-Idempotent-Replay: true`.
async fn create_payment(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Response, ServiceError> {
    let key = super::idempotency_key(&headers);
    match state
        .payment_service
        .create_payment(&merchant.id, request, key)
        .await?
    {
        PaymentAdmission::Created(payment) => {
            Ok(super::created_response(PaymentResponse::from(&payment)))
        }
        PaymentAdmission::Replayed(body) => super::replayed_response(body),
    }
}

/// Get payment by ID
async fn get_payment(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Path(payment_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state
        .payment_service
        .get_payment(&merchant.id, &payment_id)
        .await?;
    Ok(Json(ApiResponse::success(PaymentResponse::from(&payment))))
}

/// Mark a successful payment as captured
async fn capture_payment(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Path(payment_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state
        .payment_service
        .capture_payment(&merchant.id, &payment_id)
        .await?;
    Ok(Json(ApiResponse::success(PaymentResponse::from(&payment))))
}

/// Admit a refund against a payment. The body is optional; without one the
/// refund covers the full payment amount. A body that is present but does
/// not parse is rejected, never treated as a full refund.
async fn create_refund(
    State(state): State<AppState>,
    Extension(AuthedMerchant(merchant)): Extension<AuthedMerchant>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let request = if body.is_empty() {
        CreateRefundRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ServiceError::ValidationError(format!("Invalid refund request body: {}", e))
        })?
    };
    let key = super::idempotency_key(&headers);
    match state
        .refund_service
        .create_refund(&merchant.id, &payment_id, request, key)
        .await?
    {
        RefundAdmission::Created(refund) => {
            Ok(super::created_response(RefundResponse::from(&refund)))
        }
        RefundAdmission::Replayed(body) => super::replayed_response(body),
    }
}

/// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_payment))
        .route("/:payment_id", get(get_payment))
        .route("/:payment_id/capture", post(capture_payment))
        .route("/:payment_id/refunds", post(create_refund))
}
