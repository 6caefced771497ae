//! Cancellation ledger: validates submissions, records them and applies
//! the outcome to the subscription.

use std::future::{ready, Future};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use retention_core::error::{RetentionError, RetentionResult};
use retention_core::experimentation::VariantAssigner;
use retention_core::types::{CancellationRecord, SubmissionReceipt};
use retention_core::validation::{validate, ValidCancellation, ValidationError};
use retention_flow::CancellationGateway;

use crate::subscriptions::SubscriptionStore;

#[derive(Clone)]
pub struct CancellationLedger {
    records: Arc<DashMap<Uuid, CancellationRecord>>,
    subscriptions: SubscriptionStore,
    assigner: VariantAssigner,
}

impl CancellationLedger {
    pub fn new(subscriptions: SubscriptionStore) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            subscriptions,
            assigner: VariantAssigner::new(),
        }
    }

    /// Use `assigner` to re-derive the arm of each submission. Must match
    /// the assigner the flow engine hands arms out with.
    pub fn with_assigner(mut self, assigner: VariantAssigner) -> Self {
        self.assigner = assigner;
        self
    }

    pub fn subscriptions(&self) -> &SubscriptionStore {
        &self.subscriptions
    }

    /// Validate `payload` and, if it passes, create exactly one record.
    ///
    /// The claimed variant must be the arm the user is assigned, and a known
    /// subscription must belong to the submitting user. The reason is
    /// sanitized before it is stored. Accepting the downsell reprices the
    /// subscription; declining it marks it pending cancellation.
    pub fn record(&self, payload: &Value) -> RetentionResult<SubmissionReceipt> {
        let valid = validate(payload)
            .map_err(RetentionError::from)
            .and_then(|valid| self.authorize(valid))
            .map_err(|e| {
                warn!(reason = %e, "Rejected cancellation payload");
                metrics::counter!("billing.cancellations.rejected").increment(1);
                e
            })?;

        let record = valid.into_record();
        let updated = if record.accepted_downsell {
            self.subscriptions
                .apply_downsell(&record.subscription_id, record.downsell_variant)
        } else {
            self.subscriptions
                .mark_pending_cancellation(&record.subscription_id)
        };
        if updated.is_none() {
            warn!(
                subscription_id = %record.subscription_id,
                "Cancellation recorded for unknown subscription"
            );
        }

        self.records.insert(record.id, record.clone());
        info!(
            cancellation_id = %record.id,
            user_id = %record.user_id,
            variant = %record.downsell_variant,
            accepted_downsell = record.accepted_downsell,
            "Cancellation recorded"
        );
        metrics::counter!(
            "billing.cancellations",
            "variant" => record.downsell_variant.as_str(),
            "accepted" => if record.accepted_downsell { "true" } else { "false" }
        )
        .increment(1);

        Ok(SubmissionReceipt::new(record))
    }

    fn authorize(&self, valid: ValidCancellation) -> RetentionResult<ValidCancellation> {
        let assigned = self.assigner.assign(&valid.user_id)?;
        if assigned != valid.downsell_variant {
            return Err(ValidationError::VariantMismatch {
                claimed: valid.downsell_variant,
                assigned,
            }
            .into());
        }

        if let Some(subscription) = self.subscriptions.get(&valid.subscription_id) {
            if subscription.user_id != valid.user_id {
                return Err(RetentionError::InvalidInput(format!(
                    "subscription '{}' does not belong to the submitting user",
                    valid.subscription_id
                )));
            }
        }
        Ok(valid)
    }

    pub fn get(&self, id: &Uuid) -> Option<CancellationRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn list_for_user(&self, user_id: &str) -> Vec<CancellationRecord> {
        let mut records: Vec<CancellationRecord> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CancellationGateway for CancellationLedger {
    fn submit(
        &self,
        payload: Value,
    ) -> impl Future<Output = RetentionResult<SubmissionReceipt>> + Send {
        ready(self.record(&payload))
    }
}
