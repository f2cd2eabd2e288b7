//! Deterministic policy applied when the oracle gives no usable answer.

use claimdesk_core::{Action, Claim, ClaimPayload, PaymentStatus, User};

/// Action to take for `claim` without the oracle. `None` leaves it pending.
///
/// - referral bonus: approve iff the referred user has verified payment; an
///   unknown referred user rejects.
/// - task submission: approve.
/// - withdrawal: never decided here.
pub fn fallback_decision(claim: &Claim, referred_user: Option<&User>) -> Option<Action> {
    match &claim.payload {
        ClaimPayload::ReferralBonus { referred_id, .. } => match referred_user {
            Some(user) if user.id == *referred_id && user.payment_status == PaymentStatus::Verified => {
                Some(Action::Approve)
            }
            _ => Some(Action::Reject),
        },
        ClaimPayload::TaskSubmission { .. } => Some(Action::Approve),
        ClaimPayload::Withdrawal { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referral_follows_payment_status() {
        let claim = Claim::referral("r1", "referrer", "referred", 5_000);
        let verified = User::new("referred", "r@example.com", 0).verified();
        let unverified = User::new("referred", "r@example.com", 0);

        assert_eq!(fallback_decision(&claim, Some(&verified)), Some(Action::Approve));
        assert_eq!(fallback_decision(&claim, Some(&unverified)), Some(Action::Reject));
        assert_eq!(fallback_decision(&claim, None), Some(Action::Reject));
    }

    #[test]
    fn test_referral_ignores_wrong_user() {
        let claim = Claim::referral("r1", "referrer", "referred", 5_000);
        let other = User::new("someone-else", "x@example.com", 0).verified();
        assert_eq!(fallback_decision(&claim, Some(&other)), Some(Action::Reject));
    }

    #[test]
    fn test_task_always_approved() {
        let claim = Claim::task("t1", "u1", "task-1", 100);
        assert_eq!(fallback_decision(&claim, None), Some(Action::Approve));
    }

    #[test]
    fn test_withdrawal_held() {
        let claim = Claim::withdrawal("w1", "u1", 3_000);
        assert_eq!(fallback_decision(&claim, None), None);
    }

    #[test]
    fn test_repeatable() {
        let claim = Claim::referral("r1", "referrer", "referred", 5_000);
        let verified = User::new("referred", "r@example.com", 0).verified();
        let first = fallback_decision(&claim, Some(&verified));
        for _ in 0..100 {
            assert_eq!(fallback_decision(&claim, Some(&verified)), first);
        }
    }
}
