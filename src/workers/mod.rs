//! Queue consumers. The pool runs a claim loop per worker task; handlers map
//! job payloads onto database transitions and follow-up jobs.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::ServiceError;
use crate::queue::{Job, JobQueue, Lane};

pub mod payment;
pub mod refund;
pub mod webhook;

pub use payment::PaymentWorker;
pub use refund::RefundWorker;
pub use webhook::WebhookWorker;

/// A lane consumer. `handle` returning `Ok` acks the job; a transient error
/// nacks it back to the lane, anything else discards it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn lane(&self) -> Lane;
    async fn handle(&self, job: &Job) -> Result<(), ServiceError>;
}

/// Spawns and tracks the claim tasks for every registered handler.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, concurrency: usize, poll_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            queue,
            concurrency,
            poll_interval,
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        }
    }

    /// Spawns `concurrency` claim loops for the handler's lane.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let lane = handler.lane();
        for worker in 0..self.concurrency {
            let queue = self.queue.clone();
            let handler = handler.clone();
            let poll_interval = self.poll_interval;
            let mut shutdown = self.shutdown_rx.clone();
            self.tasks.push(tokio::spawn(async move {
                claim_loop(queue, handler, poll_interval, &mut shutdown, worker).await;
            }));
        }
        info!(%lane, workers = self.concurrency, "Workers started");
    }

    /// Stops issuing claims and waits for in-flight handlers to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task failed during shutdown");
            }
        }
        info!("Worker pool drained");
    }
}

async fn claim_loop(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
    worker: usize,
) {
    let lane = handler.lane();
    debug!(%lane, worker, "Claim loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match queue.claim(lane).await {
            Ok(Some(job)) => dispatch(queue.as_ref(), handler.as_ref(), &job).await,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                error!(%lane, error = %e, "Failed to claim job");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
    debug!(%lane, worker, "Claim loop stopped");
}

async fn dispatch(queue: &dyn JobQueue, handler: &dyn JobHandler, job: &Job) {
    match handler.handle(job).await {
        Ok(()) => {
            if let Err(e) = queue.ack(job).await {
                warn!(job_id = %job.id, error = %e, "Failed to ack completed job");
            }
        }
        Err(e) if e.is_transient() => {
            warn!(
                job_id = %job.id,
                lane = %job.lane,
                attempt = job.attempt,
                error = %e,
                "Transient failure, returning job to queue"
            );
            if let Err(e) = queue.nack(job).await {
                error!(job_id = %job.id, error = %e, "Failed to nack job");
            }
        }
        Err(e) => {
            error!(
                job_id = %job.id,
                lane = %job.lane,
                error = %e,
                "Permanent failure, discarding job"
            );
            if let Err(e) = queue.discard(job).await {
                error!(job_id = %job.id, error = %e, "Failed to discard job");
            }
        }
    }
}

/// Required string field of a job payload. Absence is a permanent error.
pub(crate) fn payload_str<'a>(job: &'a Job, field: &str) -> Result<&'a str, ServiceError> {
    job.payload
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("Job payload is missing '{}'", field))
        })
}
