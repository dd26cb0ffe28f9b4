//! Paygate API Library
//!
//! This crate provides the core functionality for the Paygate payment gateway:
//! idempotent payment and refund admission, queue-driven settlement workers,
//! and a signed webhook delivery engine.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod id;
pub mod idempotency;
pub mod locks;
pub mod migrator;
pub mod processor;
pub mod queue;
pub mod services;
pub mod webhooks;
pub mod workers;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::idempotency::IdempotencyCache;
use crate::locks::PaymentLocks;
use crate::queue::JobQueue;
use crate::services::{PaymentService, RefundService, WebhookService};

/// Per-request budget before the timeout layer cuts a handler off.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub queue: Arc<dyn JobQueue>,
    pub payment_service: PaymentService,
    pub refund_service: RefundService,
    pub webhook_service: WebhookService,
}

impl AppState {
    /// Wires the admission services over one database pool and one queue.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let idempotency = Arc::new(IdempotencyCache::new(db.clone()));
        let locks = Arc::new(PaymentLocks::new());

        let payment_service =
            PaymentService::new(db.clone(), queue.clone(), idempotency.clone());
        let refund_service = RefundService::new(db.clone(), queue.clone(), idempotency, locks);
        let webhook_service = WebhookService::new(db.clone(), queue.clone());

        Self {
            db,
            config,
            queue,
            payment_service,
            refund_service,
            webhook_service,
        }
    }
}

// Common response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Merchant-facing API under `/api/v1`.
///
/// Everything except the jobs introspection routes sits behind the API-key
/// middleware, which needs a state value to resolve merchants with.
pub fn api_v1_routes(state: &AppState) -> Router<AppState> {
    let merchant_api = Router::new()
        .nest("/payments", handlers::payments::payment_routes())
        .nest("/refunds", handlers::refunds::refund_routes())
        .nest("/webhooks", handlers::webhooks::webhook_routes())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(merchant_api)
        .nest("/jobs", handlers::jobs::job_routes())
}

/// Full application router with the ambient HTTP layers applied.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "paygate-api up" }))
        .nest("/api/v1", api_v1_routes(&state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
