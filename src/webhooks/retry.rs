use std::time::Duration;

use crate::config::WebhookConfig;

/// Hard cap on delivery attempts per webhook, schedule length included.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// Delay table consulted before each delivery attempt. The first entry is
/// always zero; later entries space out the retries.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    delays: [Duration; MAX_DELIVERY_ATTEMPTS as usize],
}

impl RetrySchedule {
    /// Spread retries over two hours: immediate, 1m, 5m, 30m, 2h.
    pub fn production() -> Self {
        Self {
            delays: [
                Duration::ZERO,
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(1800),
                Duration::from_secs(7200),
            ],
        }
    }

    /// Compressed schedule so sandbox merchants see the full retry cycle
    /// within a minute.
    pub fn sandbox() -> Self {
        Self {
            delays: [
                Duration::ZERO,
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(15),
                Duration::from_secs(20),
            ],
        }
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        match config.retry_schedule.as_str() {
            "sandbox" => Self::sandbox(),
            _ => Self::production(),
        }
    }

    /// Delay to wait before delivery attempt `attempt` (1-indexed). `None`
    /// once the attempt budget is exhausted.
    pub fn delay_before_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > MAX_DELIVERY_ATTEMPTS {
            return None;
        }
        Some(self.delays[(attempt - 1) as usize])
    }
}
