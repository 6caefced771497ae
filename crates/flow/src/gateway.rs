use std::future::Future;

use serde_json::Value;

use retention_core::error::RetentionResult;
use retention_core::types::SubmissionReceipt;

/// Back end that accepts a cancellation submission.
///
/// Implementations validate and sanitize the payload themselves; the engine
/// treats any error as a failed submission and leaves the flow where it was.
pub trait CancellationGateway: Send + Sync + 'static {
    fn submit(
        &self,
        payload: Value,
    ) -> impl Future<Output = RetentionResult<SubmissionReceipt>> + Send;
}
