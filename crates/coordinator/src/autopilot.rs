//! Automatic resolution of delegated claim kinds.
//!
//! Each pending claim of an enabled kind is sent to the decision oracle with
//! some beneficiary context. A clean verdict becomes the action; anything else
//! falls back to [`fallback_decision`]. Withdrawals are never approved here.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use claimdesk_core::{
    now_secs, Action, AutoPilotSettings, Claim, ClaimError, ClaimKind, ClaimPayload, ClaimRef,
    ClaimStatus, Result, User,
};
use claimdesk_ledger::{BalanceLedger, RequestStore};
use claimdesk_oracle::{fallback_decision, Decision, DecisionOracle, Verdict};

use crate::coordinator::{AdminContext, ApprovalCoordinator, Resolution};

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoPilotConfig {
    pub oracle_timeout: Duration,
    pub poll_interval: Duration,
    /// Let the oracle reject (and so refund) pending withdrawals.
    pub screen_withdrawals: bool,
    /// Recorded as `resolved_by` on automatic resolutions.
    pub admin_id: String,
}

impl Default for AutoPilotConfig {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
            screen_withdrawals: false,
            admin_id: "autopilot".to_string(),
        }
    }
}

/// What the oracle is shown for one claim.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimContext {
    pub claim: Claim,
    pub user: Option<User>,
    pub account_age_days: Option<u64>,
    pub prior_approved_withdrawals: usize,
}

/// Result of evaluating one claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoOutcome {
    Resolved(Resolution),
    /// Left pending for a human.
    Held,
    /// Not evaluated, or already resolved by someone else.
    Skipped,
}

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub resolved: usize,
    pub held: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.resolved + self.held + self.skipped + self.failed
    }

    fn record(&mut self, outcome: &Result<AutoOutcome>) {
        match outcome {
            Ok(AutoOutcome::Resolved(_)) => self.resolved += 1,
            Ok(AutoOutcome::Held) => self.held += 1,
            Ok(AutoOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct AutoPilot {
    coordinator: Arc<ApprovalCoordinator>,
    oracle: Arc<dyn DecisionOracle>,
    settings: watch::Receiver<AutoPilotSettings>,
    config: AutoPilotConfig,
}

impl AutoPilot {
    pub fn new(
        coordinator: Arc<ApprovalCoordinator>,
        oracle: Arc<dyn DecisionOracle>,
        settings: watch::Receiver<AutoPilotSettings>,
        config: AutoPilotConfig,
    ) -> Self {
        Self {
            coordinator,
            oracle,
            settings,
            config,
        }
    }

    pub fn config(&self) -> &AutoPilotConfig {
        &self.config
    }

    fn kind_enabled(&self, kind: ClaimKind) -> bool {
        match kind {
            ClaimKind::Withdrawal => self.config.screen_withdrawals,
            _ => {
                let settings = *self.settings.borrow();
                settings.enabled_for(kind)
            }
        }
    }

    /// Decide and apply one claim. Settings are re-read first, so a kind
    /// switched off mid-sweep is skipped.
    pub async fn evaluate(&self, claim: &Claim) -> Result<AutoOutcome> {
        let kind = claim.kind();
        if !claim.is_pending() || !self.kind_enabled(kind) {
            return Ok(AutoOutcome::Skipped);
        }

        let context = self.context_for(claim).await?;
        let verdict = self.consult(kind, &context).await;

        let decision = match (kind, verdict) {
            (ClaimKind::Withdrawal, Ok(v)) if v.decision == Decision::Reject => {
                Some((Action::Reject, v.reason))
            }
            (ClaimKind::Withdrawal, _) => None,
            (_, Ok(v)) => v.decision.action().map(|a| (a, v.reason)),
            (_, Err(e)) => {
                warn!(claim_id = %claim.id, kind = %kind, error = %e, "oracle unavailable, using fallback");
                let referred = self.referred_user(claim).await?;
                fallback_decision(claim, referred.as_ref())
                    .map(|a| (a, Some(format!("fallback policy: {}", e))))
            }
        };

        let Some((action, note)) = decision else {
            debug!(claim_id = %claim.id, kind = %kind, "claim held for review");
            return Ok(AutoOutcome::Held);
        };

        let ctx = AdminContext {
            admin_id: self.config.admin_id.clone(),
            transaction_id: None,
            note,
        };
        match self
            .coordinator
            .resolve(&ClaimRef::new(kind, &claim.id), action, &ctx)
            .await
        {
            Ok(resolution) => Ok(AutoOutcome::Resolved(resolution)),
            Err(ClaimError::AlreadyProcessed { .. }) => {
                debug!(claim_id = %claim.id, "claim resolved concurrently");
                Ok(AutoOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the oracle under the configured timeout. Only a clean APPROVE or
    /// REJECT counts as an answer.
    async fn consult(&self, kind: ClaimKind, context: &ClaimContext) -> Result<Verdict> {
        let payload = serde_json::to_value(context)
            .map_err(|e| ClaimError::OracleUnavailable(format!("encode context: {}", e)))?;
        match time::timeout(self.config.oracle_timeout, self.oracle.decide(kind, &payload)).await {
            Ok(verdict) if !verdict.is_error() => Ok(verdict),
            Ok(verdict) => Err(ClaimError::OracleUnavailable(
                verdict.reason.unwrap_or_else(|| "oracle returned ERROR".to_string()),
            )),
            Err(_) => Err(ClaimError::OracleUnavailable(format!(
                "no answer within {:?}",
                self.config.oracle_timeout
            ))),
        }
    }

    async fn context_for(&self, claim: &Claim) -> Result<ClaimContext> {
        let store = self.coordinator.store();
        let beneficiary = claim.payload.beneficiary();
        let user = match store.get_user(beneficiary).await {
            Ok(user) => Some(user),
            Err(ClaimError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let account_age_days = user
            .as_ref()
            .map(|u| now_secs().saturating_sub(u.created_at) / SECS_PER_DAY);
        let prior_approved_withdrawals = store
            .list_by_status(ClaimKind::Withdrawal, ClaimStatus::Approved)
            .await?
            .iter()
            .filter(|c| c.payload.beneficiary() == beneficiary)
            .count();

        Ok(ClaimContext {
            claim: claim.clone(),
            user,
            account_age_days,
            prior_approved_withdrawals,
        })
    }

    async fn referred_user(&self, claim: &Claim) -> Result<Option<User>> {
        let ClaimPayload::ReferralBonus { referred_id, .. } = &claim.payload else {
            return Ok(None);
        };
        match self.coordinator.store().get_user(referred_id).await {
            Ok(user) => Ok(Some(user)),
            Err(ClaimError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// One pass over every enabled kind.
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for kind in ClaimKind::ALL {
            if !self.kind_enabled(kind) {
                continue;
            }
            let pending = match self
                .coordinator
                .store()
                .list_by_status(kind, ClaimStatus::Pending)
                .await
            {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "failed to list pending claims");
                    report.failed += 1;
                    continue;
                }
            };
            for claim in &pending {
                let outcome = self.evaluate(claim).await;
                if let Err(e) = &outcome {
                    warn!(claim_id = %claim.id, kind = %kind, error = %e, "auto-resolution failed");
                }
                report.record(&outcome);
            }
        }
        report
    }

    /// Sweep on every poll tick and whenever the settings change, until
    /// `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            screen_withdrawals = self.config.screen_withdrawals,
            "auto-pilot starting"
        );
        let mut settings = self.settings.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }
            let report = self.run_once().await;
            if report.total() > 0 {
                info!(
                    resolved = report.resolved,
                    held = report.held,
                    skipped = report.skipped,
                    failed = report.failed,
                    "auto-pilot sweep"
                );
            }

            tokio::select! {
                _ = time::sleep(self.config.poll_interval) => {}
                Ok(()) = settings.changed() => {
                    debug!("auto-pilot settings changed");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("auto-pilot stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_report_tally() {
        let mut report = SweepReport::default();
        report.record(&Ok(AutoOutcome::Held));
        report.record(&Ok(AutoOutcome::Skipped));
        report.record(&Err(ClaimError::Storage("disk".into())));
        assert_eq!(report.held, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total(), 3);
    }

    #[test]
    fn test_default_config() {
        let config = AutoPilotConfig::default();
        assert_eq!(config.oracle_timeout, Duration::from_secs(5));
        assert!(!config.screen_withdrawals);
        assert_eq!(config.admin_id, "autopilot");
    }
}
