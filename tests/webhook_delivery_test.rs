//! Integration tests for the webhook delivery engine.
//!
//! A wiremock endpoint stands in for the merchant. Tests cover signing,
//! journaling, the retry schedule, attempt exhaustion, manual replay and the
//! log listing surface.

mod common;

use std::sync::Arc;

use axum::http::Method;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{read_json, TestApp, TEST_MERCHANT_ID, TEST_WEBHOOK_SECRET};
use paygate_api::entities::webhook_log;
use paygate_api::id;
use paygate_api::processor::FixedOutcome;
use paygate_api::queue::{Job, Lane};
use paygate_api::webhooks::SignatureGenerator;
use paygate_api::workers::JobHandler;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Admits a payment and settles it, leaving one delivery job on the lane.
async fn settle_payment(app: &TestApp) -> String {
    let body = read_json(
        app.request_authenticated(
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "order_id": "order_4001",
                "amount": 5000,
                "currency": "INR",
                "method": "upi",
                "vpa": "alice@upi"
            })),
        )
        .await,
    )
    .await;
    let payment_id = body["data"]["id"].as_str().unwrap().to_string();

    let worker = app.payment_worker(Arc::new(FixedOutcome::approve()));
    app.drain_lane(&worker).await;
    payment_id
}

/// Inserts a delivery journal row directly, bypassing the admission path.
async fn seed_log(
    app: &TestApp,
    status: &str,
    attempts: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
) -> webhook_log::Model {
    let payload = json!({
        "event": "payment.success",
        "timestamp": Utc::now().timestamp(),
        "data": { "payment": { "id": "pay_feedfacefeedface" } }
    });
    webhook_log::ActiveModel {
        id: Set(id::webhook_log_id()),
        merchant_id: Set(TEST_MERCHANT_ID.to_string()),
        event: Set("payment.success".to_string()),
        payload: Set(payload.to_string()),
        status: Set(status.to_string()),
        attempts: Set(attempts),
        response_code: Set(last_attempt_at.map(|_| 503)),
        response_body: Set(last_attempt_at.map(|_| "Service Unavailable".to_string())),
        last_attempt_at: Set(last_attempt_at),
        next_retry_at: Set(next_retry_at),
        created_at: Set(Utc::now() - ChronoDuration::minutes(1)),
    }
    .insert(&*app.db)
    .await
    .expect("seed webhook log row")
}

#[tokio::test]
async fn delivery_signs_the_body_and_journals_the_attempt() {
    let server = MockServer::start().await;
    let endpoint = format!("{}/hook", server.uri());
    let app = TestApp::with_webhook_url(Some(&endpoint)).await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let payment_id = settle_payment(&app).await;
    assert_eq!(app.drain_lane(&app.webhook_worker()).await, 1);

    let requests = server.received_requests().await.expect("recorded requests");
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let body_str = std::str::from_utf8(&request.body).expect("utf-8 body");
    let event: serde_json::Value = serde_json::from_str(body_str).expect("json body");
    assert_eq!(event["event"], "payment.success");
    assert!(event["timestamp"].is_i64());
    assert_eq!(event["data"]["payment"]["id"], payment_id.as_str());
    assert_eq!(event["data"]["payment"]["amount"], 5000);
    assert_eq!(event["data"]["payment"]["status"], "success");

    // The signature must verify against the exact bytes on the wire
    let signature = request
        .headers
        .get("X-Webhook-Signature")
        .expect("signature header")
        .to_str()
        .unwrap();
    let expected = SignatureGenerator::new(TEST_WEBHOOK_SECRET.to_string()).sign(body_str);
    assert_eq!(signature, expected);
    assert_eq!(
        request.headers.get("content-type").unwrap().to_str().unwrap(),
        "application/json"
    );

    let body = read_json(
        app.request_authenticated(Method::GET, "/api/v1/webhooks", None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["total"], 1);
    let log = &body["data"]["data"][0];
    assert_eq!(log["event"], "payment.success");
    assert_eq!(log["status"], "success");
    assert_eq!(log["attempts"], 1);
    assert_eq!(log["response_code"], 200);
    assert_eq!(log["response_body"], "OK");
    assert!(log["next_retry_at"].is_null());

    server.verify().await;
}

#[tokio::test]
async fn failed_delivery_schedules_a_delayed_retry() {
    let server = MockServer::start().await;
    let endpoint = format!("{}/hook", server.uri());
    let app = TestApp::with_webhook_url(Some(&endpoint)).await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream error"))
        .mount(&server)
        .await;

    settle_payment(&app).await;
    assert_eq!(app.drain_lane(&app.webhook_worker()).await, 1);

    let body = read_json(
        app.request_authenticated(Method::GET, "/api/v1/webhooks", None)
            .await,
    )
    .await;
    let log = &body["data"]["data"][0];
    assert_eq!(log["status"], "pending");
    assert_eq!(log["attempts"], 1);
    assert_eq!(log["response_code"], 500);
    assert_eq!(log["response_body"], "upstream error");
    assert!(log["next_retry_at"].as_str().is_some());

    // The retry sits in the lane but is not due yet
    let counts = app.state.queue.counts(Lane::WebhookDelivery).await.unwrap();
    assert_eq!(counts.ready, 0);
    assert_eq!(counts.delayed, 1);
    assert_eq!(
        app.drain_lane(&app.webhook_worker()).await,
        0,
        "a scheduled retry must not be claimable before its due time"
    );
}

#[tokio::test]
async fn retry_after_a_500_succeeds_on_the_same_row() {
    let server = MockServer::start().await;
    let endpoint = format!("{}/hook", server.uri());
    let app = TestApp::with_webhook_url(Some(&endpoint)).await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream error"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    settle_payment(&app).await;
    assert_eq!(app.drain_lane(&app.webhook_worker()).await, 1);

    let row = webhook_log::Entity::find()
        .one(&*app.db)
        .await
        .unwrap()
        .expect("journal row after first attempt");
    assert_eq!(row.status, "pending");
    assert_eq!(row.attempts, 1);

    // Run the scheduled retry without waiting out its delay
    let payload: serde_json::Value = serde_json::from_str(&row.payload).unwrap();
    let job = Job::new(
        Lane::WebhookDelivery,
        json!({
            "merchant_id": TEST_MERCHANT_ID,
            "event": "payment.success",
            "payload": payload,
            "log_id": row.id,
        }),
    );
    app.webhook_worker().handle(&job).await.unwrap();

    let updated = webhook_log::Entity::find_by_id(row.id)
        .one(&*app.db)
        .await
        .unwrap()
        .expect("journal row after retry");
    assert_eq!(updated.status, "success");
    assert_eq!(updated.attempts, 2);
    assert_eq!(updated.response_code, Some(200));
    assert!(updated.next_retry_at.is_none());
}

#[tokio::test]
async fn delivery_fails_permanently_once_attempts_are_exhausted() {
    let server = MockServer::start().await;
    let endpoint = format!("{}/hook", server.uri());
    let app = TestApp::with_webhook_url(Some(&endpoint)).await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    // Four attempts already burned; the next one is the last
    let row = seed_log(
        &app,
        "pending",
        4,
        Some(Utc::now() - ChronoDuration::seconds(20)),
        Some(Utc::now() - ChronoDuration::seconds(1)),
    )
    .await;

    let payload: serde_json::Value = serde_json::from_str(&row.payload).unwrap();
    let job = Job::new(
        Lane::WebhookDelivery,
        json!({
            "merchant_id": TEST_MERCHANT_ID,
            "event": "payment.success",
            "payload": payload,
            "log_id": row.id,
        }),
    );
    app.webhook_worker().handle(&job).await.unwrap();

    let updated = webhook_log::Entity::find_by_id(row.id.clone())
        .one(&*app.db)
        .await
        .unwrap()
        .expect("journal row");
    assert_eq!(updated.status, "failed");
    assert_eq!(updated.attempts, 5);
    assert!(updated.next_retry_at.is_none());

    let counts = app.state.queue.counts(Lane::WebhookDelivery).await.unwrap();
    assert_eq!(
        counts.ready + counts.delayed,
        0,
        "an exhausted delivery must not re-enqueue"
    );
}

#[tokio::test]
async fn manual_retry_resets_the_row_and_redelivers() {
    let server = MockServer::start().await;
    let endpoint = format!("{}/hook", server.uri());
    let app = TestApp::with_webhook_url(Some(&endpoint)).await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    // A delivery the engine has given up on
    let row = seed_log(
        &app,
        "failed",
        5,
        Some(Utc::now() - ChronoDuration::seconds(20)),
        None,
    )
    .await;

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/webhooks/{}/retry", row.id),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = read_json(response).await;
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["attempts"], 0);
    assert!(body["data"]["response_code"].is_null());
    assert!(body["data"]["last_attempt_at"].is_null());

    let counts = app.state.queue.counts(Lane::WebhookDelivery).await.unwrap();
    assert_eq!(counts.ready, 1, "manual retry enqueues an immediate attempt");

    assert_eq!(app.drain_lane(&app.webhook_worker()).await, 1);

    let updated = webhook_log::Entity::find_by_id(row.id.clone())
        .one(&*app.db)
        .await
        .unwrap()
        .expect("journal row");
    assert_eq!(updated.status, "success");
    assert_eq!(updated.attempts, 1);

    server.verify().await;
}

#[tokio::test]
async fn retry_is_rejected_while_an_attempt_is_scheduled() {
    let app = TestApp::new().await;

    let row = seed_log(
        &app,
        "pending",
        1,
        Some(Utc::now()),
        Some(Utc::now() + ChronoDuration::seconds(5)),
    )
    .await;

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/webhooks/{}/retry", row.id),
            None,
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = read_json(response).await;
    assert!(
        body["message"].as_str().unwrap().contains("already scheduled"),
        "message was {}",
        body["message"]
    );
}

#[tokio::test]
async fn retry_is_scoped_to_the_merchant() {
    let app = TestApp::new().await;
    app.seed_merchant("key_other", "secret_other").await;

    let row = seed_log(&app, "failed", 5, Some(Utc::now()), None).await;

    let response = app
        .request_with_headers(
            Method::POST,
            &format!("/api/v1/webhooks/{}/retry", row.id),
            None,
            Some(("key_other", "secret_other")),
            &[],
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn webhook_list_paginates_newest_first() {
    let app = TestApp::new().await;

    // Empty journal first: defaults echo back
    let body = read_json(
        app.request_authenticated(Method::GET, "/api/v1/webhooks", None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["total"], 0);
    assert_eq!(body["data"]["limit"], 10);
    assert_eq!(body["data"]["offset"], 0);

    let mut ids = Vec::new();
    for minutes_ago in [3i64, 2, 1] {
        let payload = json!({"event": "payment.success", "data": {}});
        let row = webhook_log::ActiveModel {
            id: Set(id::webhook_log_id()),
            merchant_id: Set(TEST_MERCHANT_ID.to_string()),
            event: Set("payment.success".to_string()),
            payload: Set(payload.to_string()),
            status: Set("success".to_string()),
            attempts: Set(1),
            response_code: Set(Some(200)),
            response_body: Set(Some("OK".to_string())),
            last_attempt_at: Set(Some(Utc::now())),
            next_retry_at: Set(None),
            created_at: Set(Utc::now() - ChronoDuration::minutes(minutes_ago)),
        }
        .insert(&*app.db)
        .await
        .unwrap();
        ids.push(row.id);
    }

    let body = read_json(
        app.request_authenticated(Method::GET, "/api/v1/webhooks?limit=2", None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["limit"], 2);
    let page = body["data"]["data"].as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["id"], ids[2].as_str(), "newest row comes first");
    assert_eq!(page[1]["id"], ids[1].as_str());

    let body = read_json(
        app.request_authenticated(Method::GET, "/api/v1/webhooks?limit=2&offset=2", None)
            .await,
    )
    .await;
    let page = body["data"]["data"].as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["id"], ids[0].as_str());
    assert_eq!(body["data"]["offset"], 2);

    // Oversized limits clamp
    let body = read_json(
        app.request_authenticated(Method::GET, "/api/v1/webhooks?limit=500", None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["limit"], 100);
}

#[tokio::test]
async fn unconfigured_merchant_skips_delivery_without_journaling() {
    let app = TestApp::new().await;

    settle_payment(&app).await;
    let counts = app.state.queue.counts(Lane::WebhookDelivery).await.unwrap();
    assert_eq!(counts.ready, 1);

    assert_eq!(app.drain_lane(&app.webhook_worker()).await, 1);

    let rows = webhook_log::Entity::find().all(&*app.db).await.unwrap();
    assert!(rows.is_empty(), "no endpoint configured, nothing to journal");
    let counts = app.state.queue.counts(Lane::WebhookDelivery).await.unwrap();
    assert_eq!(counts.ready + counts.delayed, 0);
}
