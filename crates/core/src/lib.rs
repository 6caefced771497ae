//! Core domain for the retention flow: experiment bucketing, downsell offer
//! pricing, submission validation and the shared types every crate speaks.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod experimentation;
pub mod offer;
pub mod types;
pub mod validation;

pub use config::AppConfig;
pub use error::{RetentionError, RetentionResult};
pub use experimentation::VariantAssigner;
pub use offer::compute_offer;
pub use types::{Arm, CancellationRecord, Offer, SubmissionReceipt, SubscriptionRef};
pub use validation::{sanitize, validate, validate_flow_state, ValidCancellation, ValidationError};
