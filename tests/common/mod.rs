#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use paygate_api::{
    config::AppConfig,
    db,
    entities::merchant,
    migrator,
    processor::OutcomeStrategy,
    queue::{InMemoryJobQueue, QueueTuning},
    webhooks::RetrySchedule,
    workers::{webhook::delivery_client, JobHandler, PaymentWorker, RefundWorker, WebhookWorker},
    AppState,
};

pub const TEST_MERCHANT_ID: &str = "merch_test";
pub const TEST_API_KEY: &str = "key_test_acme";
pub const TEST_API_SECRET: &str = "secret_test_acme";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_acme";

/// Helper harness for spinning up an application backed by a throwaway
/// SQLite database file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    db_file: PathBuf,
}

impl TestApp {
    /// Construct a test application whose seeded merchant has no webhook
    /// endpoint configured.
    pub async fn new() -> Self {
        Self::with_webhook_url(None).await
    }

    /// Construct a test application. When `webhook_url` is set, the seeded
    /// merchant is configured for delivery with [`TEST_WEBHOOK_SECRET`].
    pub async fn with_webhook_url(webhook_url: Option<&str>) -> Self {
        let db_file = std::env::temp_dir().join(format!("paygate_test_{}.db", Uuid::new_v4()));

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "redis://127.0.0.1:6379".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps SQLite writes serialized in tests
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.webhooks.retry_schedule = "sandbox".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        migrator::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        merchant::ActiveModel {
            id: Set(TEST_MERCHANT_ID.into()),
            name: Set("Test Merchant".into()),
            api_key: Set(TEST_API_KEY.into()),
            api_secret: Set(TEST_API_SECRET.into()),
            webhook_url: Set(webhook_url.map(str::to_string)),
            webhook_secret: Set(webhook_url.map(|_| TEST_WEBHOOK_SECRET.to_string())),
            created_at: Set(Utc::now()),
        }
        .insert(&*db)
        .await
        .expect("seed test merchant");

        let queue = Arc::new(InMemoryJobQueue::new(QueueTuning::default()));
        let state = AppState::new(db.clone(), cfg, queue);
        let router = paygate_api::app(state.clone());

        Self {
            router,
            state,
            db,
            db_file,
        }
    }

    /// Seed an additional merchant, returning its id.
    pub async fn seed_merchant(&self, api_key: &str, api_secret: &str) -> String {
        let id = format!("merch_{}", Uuid::new_v4().simple());
        merchant::ActiveModel {
            id: Set(id.clone()),
            name: Set("Other Merchant".into()),
            api_key: Set(api_key.into()),
            api_secret: Set(api_secret.into()),
            webhook_url: Set(None),
            webhook_secret: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed extra merchant");
        id
    }

    /// Send a request against the router with optional API credentials.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        credentials: Option<(&str, &str)>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, credentials, &[])
            .await
    }

    /// Convenience helper for requests as the seeded test merchant.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some((TEST_API_KEY, TEST_API_SECRET)))
            .await
    }

    /// Authenticated request with extra headers, e.g. `Idempotency-Key`.
    pub async fn request_authenticated_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        self.request_with_headers(
            method,
            uri,
            body,
            Some((TEST_API_KEY, TEST_API_SECRET)),
            headers,
        )
        .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        credentials: Option<(&str, &str)>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some((key, secret)) = credentials {
            builder = builder
                .header("X-Api-Key", key)
                .header("X-Api-Secret", secret);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Payment settlement worker with the given acquirer strategy.
    pub fn payment_worker(&self, strategy: Arc<dyn OutcomeStrategy>) -> PaymentWorker {
        PaymentWorker::new(self.db.clone(), self.state.queue.clone(), strategy)
    }

    /// Refund settlement worker.
    pub fn refund_worker(&self) -> RefundWorker {
        RefundWorker::new(self.db.clone(), self.state.queue.clone())
    }

    /// Webhook delivery worker using the harness retry schedule.
    pub fn webhook_worker(&self) -> WebhookWorker {
        let schedule = RetrySchedule::from_config(&self.state.config.webhooks);
        let http = delivery_client(Duration::from_secs(2)).expect("build delivery client");
        WebhookWorker::new(self.db.clone(), self.state.queue.clone(), http, schedule)
    }

    /// Claims and handles due jobs on the handler's lane until none are left.
    /// Dispatch mirrors the worker pool: transient failures nack, permanent
    /// ones discard. Returns the number of jobs handled.
    pub async fn drain_lane(&self, handler: &dyn JobHandler) -> usize {
        let lane = handler.lane();
        let mut handled = 0;
        while let Some(job) = self.state.queue.claim(lane).await.expect("claim job") {
            match handler.handle(&job).await {
                Ok(()) => self.state.queue.ack(&job).await.expect("ack job"),
                Err(e) if e.is_transient() => self.state.queue.nack(&job).await.expect("nack job"),
                Err(_) => self.state.queue.discard(&job).await.expect("discard job"),
            }
            handled += 1;
        }
        handled
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let base = self.db_file.display().to_string();
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{base}{suffix}"));
        }
    }
}

/// Collects a response body into JSON.
pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Collects a response body into raw bytes, for byte-equality assertions.
pub async fn read_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body")
        .to_vec()
}
