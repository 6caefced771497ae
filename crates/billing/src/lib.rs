//! Subscription and cancellation storage for the retention flow.
//!
//! Data is kept in DashMap; a real deployment swaps these for the billing
//! provider and a database behind the same API.

pub mod ledger;
pub mod subscriptions;

pub use ledger::CancellationLedger;
pub use subscriptions::SubscriptionStore;
