//! Downsell offer pricing.

use crate::error::{RetentionError, RetentionResult};
use crate::types::{Arm, Offer};

/// Discount granted to arm B, in minor units ($10.00).
pub const FIXED_B_DISCOUNT: u64 = 1000;

/// Discount for an arm. Arm A is the control and gets nothing.
pub fn discount_for(arm: Arm) -> u64 {
    match arm {
        Arm::A => 0,
        Arm::B => FIXED_B_DISCOUNT,
    }
}

/// Price the downsell offer for `arm`.
///
/// Returns `Ok(None)` while the arm is still unresolved. A negative price is
/// a caller bug and is rejected rather than wrapped. The discounted price
/// floors at zero when the discount exceeds the price.
pub fn compute_offer(arm: Option<Arm>, original_price: i64) -> RetentionResult<Option<Offer>> {
    let original_price = u64::try_from(original_price).map_err(|_| {
        RetentionError::InvalidInput(format!(
            "original price must be non-negative, got {original_price}"
        ))
    })?;

    Ok(arm.map(|arm| price_offer(arm, original_price)))
}

/// Infallible form of [`compute_offer`] for prices already known to be valid.
pub fn price_offer(arm: Arm, original_price: u64) -> Offer {
    let discount = discount_for(arm);
    Offer {
        arm,
        original_price,
        discounted_price: original_price.saturating_sub(discount),
        discount,
    }
}
