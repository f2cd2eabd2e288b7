//! Single-claim resolution with optimistic retries.

use std::sync::Arc;

use tracing::{debug, info, warn};

use claimdesk_core::{
    balance_delta, calculate_fee, format_amount, now_secs, Action, BalanceRecord, Claim, ClaimError, ClaimKind,
    ClaimPatch, ClaimRef, Result, RevenueEntry, WITHDRAWAL_FEE_BPS,
};
use claimdesk_ledger::{Adjustment, BalanceLedger, LedgerStore, RequestStore, Transition};

/// Coordinator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Retries after the first attempt when a commit hits a version conflict.
    pub max_retries: u32,
    /// Admin fee taken on approved withdrawals.
    pub withdrawal_fee_bps: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            withdrawal_fee_bps: WITHDRAWAL_FEE_BPS,
        }
    }
}

/// Who is acting and what they attach to the decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminContext {
    pub admin_id: String,
    /// Payout reference, required when approving a withdrawal.
    pub transaction_id: Option<String>,
    pub note: Option<String>,
}

impl AdminContext {
    pub fn new(admin_id: &str) -> Self {
        Self {
            admin_id: admin_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: &str) -> Self {
        self.transaction_id = Some(transaction_id.to_string());
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

/// Outcome of a successful resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub claim: Claim,
    pub action: Action,
    /// New beneficiary balance, when the claim moved one.
    pub balance: Option<BalanceRecord>,
    pub revenue: Option<RevenueEntry>,
    /// Commit attempts used, starting at 1.
    pub attempts: u32,
}

/// Resolves pending claims against a [`LedgerStore`].
///
/// Holds no lock of its own; concurrent resolves on the same claim or user
/// are arbitrated by the store's version checks.
pub struct ApprovalCoordinator {
    store: Arc<dyn LedgerStore>,
    config: CoordinatorConfig,
}

impl ApprovalCoordinator {
    pub fn new(store: Arc<dyn LedgerStore>, config: CoordinatorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn config(&self) -> CoordinatorConfig {
        self.config
    }

    /// Apply `action` to a pending claim and its balance effect, exactly once.
    pub async fn resolve(
        &self,
        claim_ref: &ClaimRef,
        action: Action,
        ctx: &AdminContext,
    ) -> Result<Resolution> {
        let transaction_id = validate_request(claim_ref, action, ctx)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .try_resolve(claim_ref, action, ctx, transaction_id.as_deref())
                .await
            {
                Ok(mut resolution) => {
                    resolution.attempts = attempt;
                    return Ok(resolution);
                }
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    debug!(
                        claim_id = %claim_ref.id,
                        action = %action,
                        attempt,
                        error = %e,
                        "commit conflicted, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) if e.is_retryable() => {
                    warn!(claim_id = %claim_ref.id, action = %action, attempts = attempt, "giving up after conflicts");
                    return Err(ClaimError::Conflict {
                        id: claim_ref.id.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_resolve(
        &self,
        claim_ref: &ClaimRef,
        action: Action,
        ctx: &AdminContext,
        transaction_id: Option<&str>,
    ) -> Result<Resolution> {
        let claim = self.store.get(&claim_ref.id).await?;
        if claim.kind() != claim_ref.kind {
            return Err(ClaimError::Validation(format!(
                "claim {} is a {}, not a {}",
                claim.id,
                claim.kind(),
                claim_ref.kind
            )));
        }
        if !claim.is_pending() {
            return Err(ClaimError::AlreadyProcessed {
                id: claim.id,
                status: claim.status,
            });
        }

        let patch = ClaimPatch {
            resolved_at: now_secs(),
            resolved_by: Some(ctx.admin_id.clone()),
            note: ctx.note.clone(),
            transaction_id: transaction_id.map(str::to_string),
        };
        let mut transition = Transition::new(&claim, action.target_status(), patch);

        let delta = balance_delta(&claim.payload, action)?;
        if delta != 0 {
            let user_id = claim.payload.beneficiary().clone();
            let current = self.store.read(&user_id).await?;
            transition = transition.with_adjustment(Adjustment {
                user_id,
                delta,
                expected_version: current.version,
            });
        }

        let revenue = self.revenue_for(&claim, action)?;
        if let Some(entry) = &revenue {
            transition = transition.with_revenue(entry.clone());
        }

        let commit = self.store.commit(transition).await?;
        info!(
            claim_id = %commit.claim.id,
            kind = %claim_ref.kind,
            action = %action,
            user_id = %claim.payload.beneficiary(),
            amount = %format_amount(claim.payload.amount()),
            delta,
            admin = %ctx.admin_id,
            "claim resolved"
        );

        Ok(Resolution {
            claim: commit.claim,
            action,
            balance: commit.balance,
            revenue,
            attempts: 0,
        })
    }

    fn revenue_for(&self, claim: &Claim, action: Action) -> Result<Option<RevenueEntry>> {
        if claim.kind() != ClaimKind::Withdrawal || action != Action::Approve {
            return Ok(None);
        }
        let amount = claim.payload.amount();
        let (fee, _) = calculate_fee(amount, self.config.withdrawal_fee_bps)?;
        if fee == 0 {
            return Ok(None);
        }
        Ok(Some(RevenueEntry {
            admin_fee_amount: fee,
            original_amount: amount,
            source_user_id: claim.payload.beneficiary().clone(),
            kind: ClaimKind::Withdrawal,
            timestamp: now_secs(),
        }))
    }
}

/// Checks that need no store access. Returns the trimmed transaction id for
/// withdrawal approvals.
fn validate_request(claim_ref: &ClaimRef, action: Action, ctx: &AdminContext) -> Result<Option<String>> {
    if claim_ref.id.trim().is_empty() {
        return Err(ClaimError::Validation("claim id is empty".to_string()));
    }
    if claim_ref.kind != ClaimKind::Withdrawal || action != Action::Approve {
        return Ok(None);
    }
    match ctx.transaction_id.as_deref().map(str::trim) {
        Some(txn) if !txn.is_empty() => Ok(Some(txn.to_string())),
        _ => Err(ClaimError::Validation(format!(
            "approving withdrawal {} requires a transaction id",
            claim_ref.id
        ))),
    }
}
