//! Admin fee constants and calculation helpers.

use crate::amount::Amount;
use crate::ClaimError;

/// Default admin fee on approved withdrawals in basis points (500 BPS = 5%).
pub const WITHDRAWAL_FEE_BPS: u64 = 500;

/// Maximum admin fee in basis points (50%).
pub const MAX_FEE_BPS: u64 = 5_000;

/// Basis points denominator.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Calculate the admin fee for an amount.
///
/// Returns `(fee, net)` where `net = amount - fee`. Fees round down.
pub fn calculate_fee(amount: Amount, fee_bps: u64) -> Result<(Amount, Amount), ClaimError> {
    if fee_bps > MAX_FEE_BPS {
        return Err(ClaimError::Validation(format!(
            "fee_bps {} exceeds max {}",
            fee_bps, MAX_FEE_BPS
        )));
    }
    let fee = ((amount as u128 * fee_bps as u128) / BPS_DENOMINATOR as u128) as u64;
    Ok((fee, amount - fee))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fee() {
        // 30.00 → 1.50 fee
        let (fee, net) = calculate_fee(3_000, WITHDRAWAL_FEE_BPS).unwrap();
        assert_eq!(fee, 150);
        assert_eq!(net, 2_850);
    }

    #[test]
    fn test_small_amount_rounds_down() {
        let (fee, net) = calculate_fee(1, WITHDRAWAL_FEE_BPS).unwrap();
        assert_eq!(fee, 0);
        assert_eq!(net, 1);
    }

    #[test]
    fn test_zero_bps() {
        assert_eq!(calculate_fee(10_000, 0).unwrap(), (0, 10_000));
    }

    #[test]
    fn test_fee_too_high() {
        let err = calculate_fee(100, MAX_FEE_BPS + 1).unwrap_err();
        assert!(matches!(err, ClaimError::Validation(msg) if msg.contains("exceeds max")));
    }

    #[test]
    fn test_large_amount_no_overflow() {
        let (fee, net) = calculate_fee(u64::MAX, MAX_FEE_BPS).unwrap();
        assert_eq!(fee, u64::MAX / 2);
        assert_eq!(fee + net, u64::MAX);
    }
}
