//! Store traits and the validation rules shared by every backend.

use async_trait::async_trait;

use claimdesk_core::{
    apply_delta, Amount, BalanceRecord, Claim, ClaimError, ClaimId, ClaimKind, ClaimPatch,
    ClaimStatus, Delta, Result, RevenueEntry, User, UserId,
};

use crate::feed::{LedgerSubscription, Subscription};

/// Persistence of claim records.
///
/// There is no unconditional status write: every mutation goes through
/// [`RequestStore::compare_and_swap`] or [`LedgerStore::commit`].
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new claim. Status is forced to pending and version to 0.
    async fn create(&self, claim: Claim) -> Result<Claim>;

    async fn get(&self, id: &str) -> Result<Claim>;

    /// Claims of one kind and status in insertion order.
    async fn list_by_status(&self, kind: ClaimKind, status: ClaimStatus) -> Result<Vec<Claim>>;

    /// Live snapshots of one `(kind, status)` set. The first delivery is the
    /// current snapshot.
    async fn subscribe(&self, kind: ClaimKind, status: ClaimStatus) -> Result<Subscription>;

    async fn compare_and_swap(
        &self,
        id: &str,
        expected_version: u64,
        new_status: ClaimStatus,
        patch: ClaimPatch,
    ) -> Result<Claim>;
}

/// Ownership of user balances.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    async fn create_user(&self, user: User) -> Result<User>;

    async fn get_user(&self, id: &str) -> Result<User>;

    async fn read(&self, user_id: &str) -> Result<BalanceRecord>;

    /// `balance += delta` if the stored version still equals `expected_version`.
    async fn atomic_adjust(
        &self,
        user_id: &str,
        delta: Delta,
        expected_version: u64,
    ) -> Result<BalanceRecord>;

    async fn total_balance(&self) -> Result<Amount>;

    async fn subscribe_ledger(&self) -> Result<LedgerSubscription>;
}

/// Both halves behind one transactional boundary.
#[async_trait]
pub trait LedgerStore: RequestStore + BalanceLedger {
    /// Apply a claim transition with its balance and revenue side effects as
    /// one unit.
    async fn commit(&self, transition: Transition) -> Result<Commit>;

    async fn revenue_since(&self, since: u64) -> Result<Vec<RevenueEntry>>;
}

/// Balance change bound to the version it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub user_id: UserId,
    pub delta: Delta,
    pub expected_version: u64,
}

/// One atomic unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub claim_id: ClaimId,
    pub expected_version: u64,
    pub new_status: ClaimStatus,
    pub patch: ClaimPatch,
    pub adjustment: Option<Adjustment>,
    pub revenue: Option<RevenueEntry>,
}

impl Transition {
    pub fn new(claim: &Claim, new_status: ClaimStatus, patch: ClaimPatch) -> Self {
        Self {
            claim_id: claim.id.clone(),
            expected_version: claim.version,
            new_status,
            patch,
            adjustment: None,
            revenue: None,
        }
    }

    pub fn with_adjustment(mut self, adjustment: Adjustment) -> Self {
        self.adjustment = Some(adjustment);
        self
    }

    pub fn with_revenue(mut self, revenue: RevenueEntry) -> Self {
        self.revenue = Some(revenue);
        self
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub claim: Claim,
    pub balance: Option<BalanceRecord>,
}

/// Reject transitions that are stale, leave a terminal status, or go back to
/// pending.
pub fn check_transition(claim: &Claim, expected_version: u64, new_status: ClaimStatus) -> Result<()> {
    if claim.version != expected_version {
        return Err(ClaimError::VersionConflict {
            entity: format!("claim {}", claim.id),
            expected: expected_version,
            actual: claim.version,
        });
    }
    if claim.status.is_terminal() {
        return Err(ClaimError::AlreadyProcessed {
            id: claim.id.clone(),
            status: claim.status,
        });
    }
    if !new_status.is_terminal() {
        return Err(ClaimError::Validation(format!(
            "claim {} cannot transition to {}",
            claim.id, new_status
        )));
    }
    Ok(())
}

/// Validate an adjustment against the stored user, returning the new balance.
pub fn check_adjustment(user: &User, delta: Delta, expected_version: u64) -> Result<Amount> {
    if user.version != expected_version {
        return Err(ClaimError::VersionConflict {
            entity: format!("user {}", user.id),
            expected: expected_version,
            actual: user.version,
        });
    }
    match apply_delta(user.balance, delta) {
        Some(balance) => Ok(balance),
        None if delta < 0 => Err(ClaimError::InsufficientFunds {
            user_id: user.id.clone(),
            balance: user.balance,
            delta,
        }),
        None => Err(ClaimError::Validation(format!(
            "balance overflow for user {}",
            user.id
        ))),
    }
}

/// Normalise a claim for insertion.
pub fn fresh_claim(mut claim: Claim) -> Claim {
    claim.status = ClaimStatus::Pending;
    claim.version = 0;
    claim.resolved_at = None;
    claim.resolved_by = None;
    claim.note = None;
    claim
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_transition_stale_version() {
        let claim = Claim::task("t1", "u1", "task", 100);
        let err = check_transition(&claim, 3, ClaimStatus::Approved).unwrap_err();
        assert!(matches!(err, ClaimError::VersionConflict { expected: 3, actual: 0, .. }));
    }

    #[test]
    fn test_check_transition_terminal() {
        let mut claim = Claim::task("t1", "u1", "task", 100);
        claim.status = ClaimStatus::Cancelled;
        let err = check_transition(&claim, 0, ClaimStatus::Approved).unwrap_err();
        assert_eq!(
            err,
            ClaimError::AlreadyProcessed {
                id: "t1".into(),
                status: ClaimStatus::Cancelled
            }
        );
    }

    #[test]
    fn test_check_transition_back_to_pending() {
        let claim = Claim::task("t1", "u1", "task", 100);
        assert!(matches!(
            check_transition(&claim, 0, ClaimStatus::Pending),
            Err(ClaimError::Validation(_))
        ));
    }

    #[test]
    fn test_check_adjustment() {
        let user = User::new("u1", "u1@example.com", 100);
        assert_eq!(check_adjustment(&user, 30, 0).unwrap(), 130);
        assert!(matches!(
            check_adjustment(&user, -101, 0),
            Err(ClaimError::InsufficientFunds { balance: 100, delta: -101, .. })
        ));
        assert!(matches!(
            check_adjustment(&user, 1, 7),
            Err(ClaimError::VersionConflict { .. })
        ));
    }

    #[test]
    fn test_fresh_claim_resets_state() {
        let mut claim = Claim::task("t1", "u1", "task", 100);
        claim.status = ClaimStatus::Approved;
        claim.version = 9;
        claim.note = Some("x".into());
        let claim = fresh_claim(claim);
        assert_eq!(claim.status, ClaimStatus::Pending);
        assert_eq!(claim.version, 0);
        assert!(claim.note.is_none());
    }
}
