/*!
 * # Merchant Authentication
 *
 * API-key authentication for the merchant-facing surface. Requests carry the
 * merchant's key pair in headers; the middleware resolves the merchant row
 * and stores it in request extensions for handlers downstream.
 */

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::warn;

use crate::entities::merchant::{self, Entity as Merchant};
use crate::errors::ServiceError;
use crate::AppState;

pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const API_SECRET_HEADER: &str = "X-Api-Secret";

/// Merchant resolved from request credentials.
///
/// Handlers pull this out of request extensions with `Extension<AuthedMerchant>`.
#[derive(Clone, Debug)]
pub struct AuthedMerchant(pub merchant::Model);

/// Middleware guarding the merchant API routes.
///
/// Attach with `axum::middleware::from_fn_with_state(state, auth_middleware)`.
/// Rejections render through `ServiceError::Unauthorized` as 401 responses.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let merchant = authenticate(&state.db, request.headers()).await?;
    request.extensions_mut().insert(AuthedMerchant(merchant));
    Ok(next.run(request).await)
}

/// Looks up the merchant by API key and verifies the paired secret.
async fn authenticate(
    db: &DatabaseConnection,
    headers: &HeaderMap,
) -> Result<merchant::Model, ServiceError> {
    let api_key = header_value(headers, API_KEY_HEADER)?;
    let api_secret = header_value(headers, API_SECRET_HEADER)?;

    let merchant = Merchant::find()
        .filter(merchant::Column::ApiKey.eq(api_key))
        .one(db)
        .await?
        .filter(|found| found.api_secret == api_secret);

    merchant.ok_or_else(|| {
        warn!("Rejected request with unknown or mismatched API credentials");
        ServiceError::Unauthorized("Invalid API credentials".to_string())
    })
}

fn header_value<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, ServiceError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized(format!("Missing {} header", name)))
}
