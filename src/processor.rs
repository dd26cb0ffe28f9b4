use rand::Rng;
use std::sync::Arc;

use crate::config::ProcessorConfig;
use crate::entities::payment;

/// Result of running a pending payment through the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Approved,
    Declined { code: String, description: String },
}

impl Outcome {
    pub fn declined() -> Self {
        Outcome::Declined {
            code: "PAYMENT_FAILED".to_string(),
            description: "Payment was declined by the processor".to_string(),
        }
    }
}

/// Decides whether a pending payment settles or declines. The payment worker
/// is generic over this so tests can pin the outcome.
pub trait OutcomeStrategy: Send + Sync {
    fn decide(&self, payment: &payment::Model) -> Outcome;
}

/// Approves with a per-method probability, mimicking an acquirer that
/// declines a slice of traffic.
pub struct ProbabilisticOutcome {
    upi_success_rate: f64,
    other_success_rate: f64,
}

impl ProbabilisticOutcome {
    pub fn new(upi_success_rate: f64, other_success_rate: f64) -> Self {
        Self {
            upi_success_rate,
            other_success_rate,
        }
    }
}

impl OutcomeStrategy for ProbabilisticOutcome {
    fn decide(&self, payment: &payment::Model) -> Outcome {
        let rate = if payment.method == "upi" {
            self.upi_success_rate
        } else {
            self.other_success_rate
        };
        if rand::thread_rng().gen_bool(rate.clamp(0.0, 1.0)) {
            Outcome::Approved
        } else {
            Outcome::declined()
        }
    }
}

/// Always returns the same outcome. Used by the "approve" and "decline"
/// processor modes and by tests.
pub struct FixedOutcome {
    approve: bool,
}

impl FixedOutcome {
    pub fn approve() -> Self {
        Self { approve: true }
    }

    pub fn decline() -> Self {
        Self { approve: false }
    }
}

impl OutcomeStrategy for FixedOutcome {
    fn decide(&self, _payment: &payment::Model) -> Outcome {
        if self.approve {
            Outcome::Approved
        } else {
            Outcome::declined()
        }
    }
}

pub fn from_config(config: &ProcessorConfig) -> Arc<dyn OutcomeStrategy> {
    match config.mode.as_str() {
        "approve" => Arc::new(FixedOutcome::approve()),
        "decline" => Arc::new(FixedOutcome::decline()),
        _ => Arc::new(ProbabilisticOutcome::new(
            config.upi_success_rate,
            config.other_success_rate,
        )),
    }
}
