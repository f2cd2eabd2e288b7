//! Monetary amounts.
//!
//! All amounts are integer minor units (cents, 2 decimals, 1.00 = 100).

use crate::{ClaimError, Result};

/// Non-negative amount in minor units.
pub type Amount = u64;

/// Signed balance change in minor units.
pub type Delta = i64;

/// Minor units per whole monetary unit.
pub const CENTS_PER_UNIT: u64 = 100;

/// Render an amount with two decimals, e.g. `13000` → `"130.00"`.
pub fn format_amount(amount: Amount) -> String {
    format!("{}.{:02}", amount / CENTS_PER_UNIT, amount % CENTS_PER_UNIT)
}

/// Apply a signed delta to a balance. `None` if the result would be negative
/// or overflow.
pub fn apply_delta(balance: Amount, delta: Delta) -> Option<Amount> {
    if delta >= 0 {
        balance.checked_add(delta as u64)
    } else {
        balance.checked_sub(delta.unsigned_abs())
    }
}

/// Convert an amount to a positive delta. Amounts above `i64::MAX` cannot be
/// credited.
pub fn credit(amount: Amount) -> Result<Delta> {
    i64::try_from(amount)
        .map_err(|_| ClaimError::Validation(format!("amount {} is too large to credit", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(13_000), "130.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(1_230), "12.30");
    }

    #[test]
    fn test_apply_delta() {
        assert_eq!(apply_delta(100, 30), Some(130));
        assert_eq!(apply_delta(100, -100), Some(0));
        assert_eq!(apply_delta(100, -101), None);
        assert_eq!(apply_delta(u64::MAX, 1), None);
    }

    #[test]
    fn test_credit_rejects_oversized_amount() {
        assert_eq!(credit(3_000), Ok(3_000));
        assert_eq!(credit(i64::MAX as u64), Ok(i64::MAX));
        assert!(matches!(credit(i64::MAX as u64 + 1), Err(ClaimError::Validation(_))));
    }
}
