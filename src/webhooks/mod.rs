//! Outbound webhook plumbing: event bodies, HMAC signing, and the retry
//! schedule consulted by the delivery worker.

pub mod events;
pub mod retry;
pub mod signature;

pub use retry::{RetrySchedule, MAX_DELIVERY_ATTEMPTS};
pub use signature::SignatureGenerator;
