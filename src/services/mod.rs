// Admission-side services; settlement lives in the workers
pub mod payments;
pub mod refunds;
pub mod webhooks;

pub use payments::PaymentService;
pub use refunds::RefundService;
pub use webhooks::WebhookService;
