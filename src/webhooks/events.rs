use chrono::Utc;
use serde_json::{json, Value};

use crate::entities::{payment, refund};

pub const PAYMENT_SUCCESS: &str = "payment.success";
pub const PAYMENT_FAILED: &str = "payment.failed";
pub const REFUND_PROCESSED: &str = "refund.processed";

/// Event name for a payment that just reached a terminal status.
pub fn payment_event_name(status: payment::PaymentStatus) -> Option<&'static str> {
    match status {
        payment::PaymentStatus::Success => Some(PAYMENT_SUCCESS),
        payment::PaymentStatus::Failed => Some(PAYMENT_FAILED),
        payment::PaymentStatus::Pending => None,
    }
}

/// Body for `payment.success` / `payment.failed`. The same shape serves both;
/// the `event` field and the embedded status tell them apart.
pub fn payment_event(event: &str, payment: &payment::Model) -> Value {
    json!({
        "event": event,
        "timestamp": Utc::now().timestamp(),
        "data": {
            "payment": {
                "id": payment.id,
                "order_id": payment.order_id,
                "amount": payment.amount,
                "currency": payment.currency,
                "method": payment.method,
                "vpa": payment.vpa,
                "status": payment.status,
                "created_at": payment.created_at,
            }
        }
    })
}

/// Body for `refund.processed`.
pub fn refund_event(refund: &refund::Model) -> Value {
    json!({
        "event": REFUND_PROCESSED,
        "timestamp": Utc::now().timestamp(),
        "data": {
            "refund": {
                "id": refund.id,
                "payment_id": refund.payment_id,
                "amount": refund.amount,
                "status": refund.status,
                "created_at": refund.created_at,
            }
        }
    })
}
