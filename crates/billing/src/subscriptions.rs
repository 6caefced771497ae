//! In-memory subscription store, seeded from configuration.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use retention_core::config::BillingConfig;
use retention_core::error::{RetentionError, RetentionResult};
use retention_core::offer::price_offer;
use retention_core::types::{Arm, SubscriptionRef, SubscriptionStatus};

/// Subscriptions keyed by id, plus the id served as "the current
/// subscription" when a caller does not name one.
#[derive(Clone)]
pub struct SubscriptionStore {
    subscriptions: Arc<DashMap<String, SubscriptionRef>>,
    discounted: Arc<DashMap<String, Arm>>,
    default_id: String,
}

impl SubscriptionStore {
    /// Create a store holding the single subscription described by `config`.
    pub fn from_config(config: &BillingConfig) -> Self {
        let now = Utc::now();
        let store = Self {
            subscriptions: Arc::new(DashMap::new()),
            discounted: Arc::new(DashMap::new()),
            default_id: config.subscription_id.clone(),
        };
        store.insert(SubscriptionRef {
            id: config.subscription_id.clone(),
            user_id: config.user_id.clone(),
            monthly_price: config.monthly_price,
            status: SubscriptionStatus::Active,
            created_at: now,
            updated_at: now,
        });
        info!(
            subscription_id = %config.subscription_id,
            monthly_price = config.monthly_price,
            "SubscriptionStore seeded"
        );
        store
    }

    pub fn insert(&self, subscription: SubscriptionRef) {
        self.subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub fn get(&self, id: &str) -> Option<SubscriptionRef> {
        self.subscriptions.get(id).map(|s| s.clone())
    }

    /// The seeded subscription.
    pub fn current(&self) -> RetentionResult<SubscriptionRef> {
        self.get(&self.default_id).ok_or_else(|| {
            RetentionError::Internal(anyhow::anyhow!(
                "default subscription {} missing from store",
                self.default_id
            ))
        })
    }

    pub fn for_user(&self, user_id: &str) -> Option<SubscriptionRef> {
        self.subscriptions
            .iter()
            .find(|s| s.user_id == user_id)
            .map(|s| s.value().clone())
    }

    /// Subscription for a new flow: the named one, else the user's own.
    /// Either way it must belong to `user_id`.
    pub fn resolve(
        &self,
        user_id: &str,
        subscription_id: Option<&str>,
    ) -> RetentionResult<SubscriptionRef> {
        let subscription = match subscription_id {
            Some(id) => self.get(id).ok_or_else(|| {
                RetentionError::InvalidInput(format!("unknown subscription '{id}'"))
            })?,
            None => self.for_user(user_id).ok_or_else(|| {
                RetentionError::InvalidInput(format!("no subscription for user '{user_id}'"))
            })?,
        };
        if subscription.user_id != user_id {
            return Err(RetentionError::InvalidInput(format!(
                "subscription '{}' belongs to another user",
                subscription.id
            )));
        }
        Ok(subscription)
    }

    /// The user kept the subscription at the offer price. The discount is
    /// applied once per subscription.
    pub fn apply_downsell(&self, id: &str, arm: Arm) -> Option<SubscriptionRef> {
        let mut subscription = self.subscriptions.get_mut(id)?;
        if self.discounted.insert(id.to_string(), arm).is_none() {
            subscription.monthly_price =
                price_offer(arm, subscription.monthly_price).discounted_price;
        }
        subscription.status = SubscriptionStatus::Active;
        subscription.updated_at = Utc::now();
        Some(subscription.clone())
    }

    /// The user declined the offer; cancellation takes effect at period end.
    pub fn mark_pending_cancellation(&self, id: &str) -> Option<SubscriptionRef> {
        let mut subscription = self.subscriptions.get_mut(id)?;
        if subscription.status == SubscriptionStatus::Active {
            subscription.status = SubscriptionStatus::PendingCancellation;
            subscription.updated_at = Utc::now();
        }
        Some(subscription.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store() -> SubscriptionStore {
        SubscriptionStore::from_config(&BillingConfig::default())
    }

    #[test]
    fn test_seeded_subscription() {
        let store = store();
        let current = store.current().unwrap();
        assert_eq!(current.id, "123e4567-e89b-12d3-a456-426614174000");
        assert_eq!(current.monthly_price, 2500);
        assert_eq!(current.status, SubscriptionStatus::Active);
        assert_eq!(
            store.for_user("550e8400-e29b-41d4-a716-446655440001").unwrap().id,
            current.id
        );
    }

    #[test]
    fn test_resolve() {
        let store = store();
        let current = store.current().unwrap();
        let owner = current.user_id.clone();
        assert_eq!(store.resolve(&owner, None).unwrap().id, current.id);
        assert_eq!(store.resolve(&owner, Some(&current.id)).unwrap().id, current.id);

        for (user, id) in [
            (owner.as_str(), Some("missing")),
            ("someone-else", None),
            ("someone-else", Some(current.id.as_str())),
        ] {
            assert!(
                matches!(store.resolve(user, id), Err(RetentionError::InvalidInput(_))),
                "{user} {id:?}"
            );
        }
    }

    #[test]
    fn test_downsell_applied_once() {
        let store = store();
        let id = store.current().unwrap().id;

        let updated = store.apply_downsell(&id, Arm::B).unwrap();
        assert_eq!(updated.monthly_price, 1500);
        assert_eq!(updated.status, SubscriptionStatus::Active);

        let again = store.apply_downsell(&id, Arm::B).unwrap();
        assert_eq!(again.monthly_price, 1500);
        assert!(store.apply_downsell("missing", Arm::B).is_none());
    }

    #[test]
    fn test_arm_a_downsell_keeps_price() {
        let store = store();
        let id = store.current().unwrap().id;
        assert_eq!(store.apply_downsell(&id, Arm::A).unwrap().monthly_price, 2500);
    }

    #[test]
    fn test_pending_cancellation() {
        let store = store();
        let id = store.current().unwrap().id;
        let updated = store.mark_pending_cancellation(&id).unwrap();
        assert_eq!(updated.status, SubscriptionStatus::PendingCancellation);

        // Accepting a later offer reactivates it.
        let kept = store.apply_downsell(&id, Arm::B).unwrap();
        assert_eq!(kept.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_missing_default_is_internal_error() {
        let store = SubscriptionStore {
            subscriptions: Arc::new(DashMap::new()),
            discounted: Arc::new(DashMap::new()),
            default_id: "gone".into(),
        };
        assert!(matches!(store.current(), Err(RetentionError::Internal(_))));
    }
}
