use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error};
use uuid::Uuid;

use super::{Job, JobQueue, Lane, LaneCounts, QueueError, QueueTuning};

/// In-memory job queue. Single-process only; jobs do not survive a restart.
/// Default backend for tests and development runs.
pub struct InMemoryJobQueue {
    lanes: Mutex<HashMap<Lane, LaneState>>,
    tuning: QueueTuning,
}

#[derive(Default)]
struct LaneState {
    ready: BinaryHeap<Scheduled>,
    in_flight: HashMap<Uuid, InFlight>,
}

struct InFlight {
    job: Job,
    deadline: Instant,
}

/// Heap entry ordered so the earliest `run_at` surfaces first.
struct Scheduled(Job);

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.0.run_at == other.0.run_at && self.0.id == other.0.id
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap and we want the soonest job on top
        other
            .0
            .run_at
            .cmp(&self.0.run_at)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

impl InMemoryJobQueue {
    pub fn new(tuning: QueueTuning) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            tuning,
        }
    }

    fn with_lane<T>(&self, lane: Lane, f: impl FnOnce(&mut LaneState, &QueueTuning) -> T) -> T {
        let mut lanes = self.lanes.lock().unwrap();
        f(lanes.entry(lane).or_default(), &self.tuning)
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueTuning::default())
    }
}

/// Hand a failed or timed-out job back to the lane, or dead-letter it once
/// its attempts are spent. Dead-lettered jobs are logged and dropped.
fn requeue_or_drop(state: &mut LaneState, mut job: Job, delay: Duration, reason: &str) {
    job.attempt += 1;
    if job.attempt >= job.max_attempts {
        error!(
            job_id = %job.id,
            lane = %job.lane,
            attempts = job.attempt,
            reason,
            "Job exhausted its delivery attempts, dead-lettering"
        );
        return;
    }
    debug!(job_id = %job.id, lane = %job.lane, attempt = job.attempt, reason, "Requeueing job");
    job.run_at = Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    state.ready.push(Scheduled(job));
}

/// Move jobs whose claim timed out back into the ready set.
fn reap_expired(state: &mut LaneState, now: Instant) {
    let expired: Vec<Uuid> = state
        .in_flight
        .iter()
        .filter(|(_, inflight)| inflight.deadline <= now)
        .map(|(id, _)| *id)
        .collect();
    for id in expired {
        if let Some(inflight) = state.in_flight.remove(&id) {
            requeue_or_drop(state, inflight.job, Duration::ZERO, "claim expired");
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, mut job: Job) -> Result<(), QueueError> {
        self.with_lane(job.lane, |state, tuning| {
            if state.ready.len() + state.in_flight.len() >= tuning.max_size {
                return Err(QueueError::Full);
            }
            job.max_attempts = tuning.max_attempts;
            state.ready.push(Scheduled(job));
            Ok(())
        })
    }

    async fn claim(&self, lane: Lane) -> Result<Option<Job>, QueueError> {
        let now_utc = Utc::now();
        let now = Instant::now();
        let claimed = self.with_lane(lane, |state, tuning| {
            reap_expired(state, now);

            match state.ready.peek() {
                Some(top) if top.0.run_at <= now_utc => {
                    let job = state.ready.pop().map(|s| s.0)?;
                    state.in_flight.insert(
                        job.id,
                        InFlight {
                            job: job.clone(),
                            deadline: now + tuning.claim_timeout,
                        },
                    );
                    Some(job)
                }
                _ => None,
            }
        });
        Ok(claimed)
    }

    async fn ack(&self, job: &Job) -> Result<(), QueueError> {
        self.with_lane(job.lane, |state, _| {
            if state.in_flight.remove(&job.id).is_none() {
                debug!(job_id = %job.id, "Ack for a job whose claim already expired");
            }
        });
        Ok(())
    }

    async fn nack(&self, job: &Job) -> Result<(), QueueError> {
        self.with_lane(job.lane, |state, tuning| {
            match state.in_flight.remove(&job.id) {
                Some(inflight) => {
                    requeue_or_drop(state, inflight.job, tuning.retry_delay, "nacked")
                }
                None => {
                    debug!(job_id = %job.id, "Nack for a job whose claim already expired");
                }
            }
        });
        Ok(())
    }

    async fn discard(&self, job: &Job) -> Result<(), QueueError> {
        self.with_lane(job.lane, |state, _| {
            state.in_flight.remove(&job.id);
            debug!(job_id = %job.id, lane = %job.lane, "Job discarded");
        });
        Ok(())
    }

    async fn counts(&self, lane: Lane) -> Result<LaneCounts, QueueError> {
        let now = Utc::now();
        Ok(self.with_lane(lane, |state, _| {
            let delayed = state
                .ready
                .iter()
                .filter(|scheduled| scheduled.0.run_at > now)
                .count() as u64;
            LaneCounts {
                ready: state.ready.len() as u64 - delayed,
                delayed,
                in_flight: state.in_flight.len() as u64,
            }
        }))
    }
}
