use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry size at which unused entries get pruned.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-payment async locks. Refund admission takes the lock for its payment
/// before checking the refundable remainder, so two concurrent refunds against
/// the same payment serialize instead of both passing the cap check.
///
/// In-process only: a multi-node deployment would push this down into the
/// database.
#[derive(Default)]
pub struct PaymentLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PaymentLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire the lock for one payment, waiting if another task holds it.
    pub async fn acquire(&self, payment_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(payment_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        if self.locks.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        lock.lock_owned().await
    }

    /// Drop entries nobody holds a handle to. The entry being acquired is
    /// always kept: its Arc count includes the caller's clone.
    fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}
