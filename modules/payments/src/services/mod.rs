pub mod fraud;
pub mod payment_service;
pub mod validation;

pub use fraud::{FraudRules, FraudVerdict};
pub use payment_service::PaymentService;
pub use validation::{PaymentLimits, Rejection};
