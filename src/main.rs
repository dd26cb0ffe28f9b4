use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use paygate_api as api;

use api::queue::{InMemoryJobQueue, JobQueue, QueueTuning, RedisJobQueue};
use api::webhooks::RetrySchedule;
use api::workers::{
    payment::PaymentWorker, refund::RefundWorker, webhook::WebhookWorker, WorkerPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::migrator::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Job queue backend; fall back to in-memory when Redis is unreachable
    let tuning = QueueTuning::from(&cfg.queue);
    let queue: Arc<dyn JobQueue> = match cfg.queue.backend.to_ascii_lowercase().as_str() {
        "redis" => {
            match RedisJobQueue::connect(&cfg.redis_url, cfg.queue.namespace.clone(), tuning).await
            {
                Ok(queue) => {
                    info!("Job queue backed by Redis at {}", cfg.redis_url);
                    Arc::new(queue)
                }
                Err(err) => {
                    error!(
                        "Failed to initialize Redis job queue (falling back to in-memory): {}",
                        err
                    );
                    Arc::new(InMemoryJobQueue::new(QueueTuning::from(&cfg.queue)))
                }
            }
        }
        _ => Arc::new(InMemoryJobQueue::new(tuning)),
    };

    // Settlement and delivery workers
    let strategy = api::processor::from_config(&cfg.processor);
    let schedule = RetrySchedule::from_config(&cfg.webhooks);
    let http = api::workers::webhook::delivery_client(Duration::from_secs(cfg.webhooks.timeout_secs))
        .context("failed to build the webhook delivery client")?;

    let mut pool = WorkerPool::new(
        queue.clone(),
        cfg.queue.worker_concurrency,
        Duration::from_millis(cfg.queue.poll_interval_ms),
    );
    pool.register(Arc::new(PaymentWorker::new(
        db.clone(),
        queue.clone(),
        strategy,
    )));
    pool.register(Arc::new(RefundWorker::new(db.clone(), queue.clone())));
    pool.register(Arc::new(WebhookWorker::new(
        db.clone(),
        queue.clone(),
        http,
        schedule,
    )));

    // Compose shared app state and serve
    let state = api::AppState::new(db, cfg.clone(), queue);
    let app = api::app(state);

    let addr = cfg.bind_address();
    info!("paygate-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight jobs finish before the process exits
    info!("Draining workers");
    pool.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
