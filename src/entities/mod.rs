pub mod idempotency_key;
pub mod merchant;
pub mod payment;
pub mod refund;
pub mod webhook_log;
