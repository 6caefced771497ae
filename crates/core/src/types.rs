use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::RetentionError;

/// Experiment arm a user is bucketed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Arm {
    A,
    B,
}

impl Arm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arm::A => "A",
            Arm::B => "B",
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arm {
    type Err = RetentionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Arm::A),
            "B" => Ok(Arm::B),
            other => Err(RetentionError::InvalidInput(format!(
                "unknown arm '{other}'"
            ))),
        }
    }
}

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PendingCancellation,
    Cancelled,
}

/// A user's subscription as seen by the cancellation flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionRef {
    pub id: String,
    pub user_id: String,
    /// Monthly price in minor units (cents).
    pub monthly_price: u64,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A priced downsell offer for one arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub arm: Arm,
    pub original_price: u64,
    pub discounted_price: u64,
    pub discount: u64,
}

impl Offer {
    /// Whether the offer actually lowers the price. Arm A's offer does not,
    /// so there is nothing for the user to accept.
    pub fn is_discounted(&self) -> bool {
        self.discounted_price < self.original_price
    }
}

/// Persisted outcome of a completed cancellation flow. Built only from a
/// validated submission and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CancellationRecord {
    pub id: Uuid,
    pub user_id: String,
    pub subscription_id: String,
    pub downsell_variant: Arm,
    pub reason: String,
    pub accepted_downsell: bool,
    pub created_at: DateTime<Utc>,
}

pub const MESSAGE_DISCOUNT_APPLIED: &str = "Subscription updated with discount";
pub const MESSAGE_CANCELLATION_PROCESSED: &str = "Cancellation processed successfully";

/// Successful submission response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmissionReceipt {
    pub success: bool,
    pub cancellation: CancellationRecord,
    pub message: String,
}

impl SubmissionReceipt {
    pub fn new(cancellation: CancellationRecord) -> Self {
        let message = if cancellation.accepted_downsell {
            MESSAGE_DISCOUNT_APPLIED
        } else {
            MESSAGE_CANCELLATION_PROCESSED
        };
        Self {
            success: true,
            cancellation,
            message: message.to_string(),
        }
    }
}

/// Analytics event emitted by the flow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub flow_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub variant: Option<Arm>,
    pub step: Option<String>,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    VariantAssigned,
    FlowStarted,
    FlowRestored,
    StepAdvanced,
    DownsellAccepted,
    DownsellDeclined,
    CancellationSubmitted,
    SubmissionFailed,
    FlowClosed,
    FlowExpired,
}
