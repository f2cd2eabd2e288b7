//! Claim records and the balance rule table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::amount::{credit, Amount, Delta};
use crate::{now_secs, ClaimError, ClaimId, Result, UserId};

/// Kind of claim, the tag of [`ClaimPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    Withdrawal,
    ReferralBonus,
    TaskSubmission,
}

impl ClaimKind {
    pub const ALL: [ClaimKind; 3] = [
        ClaimKind::Withdrawal,
        ClaimKind::ReferralBonus,
        ClaimKind::TaskSubmission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Withdrawal => "withdrawal",
            Self::ReferralBonus => "referral_bonus",
            Self::TaskSubmission => "task_submission",
        }
    }

    /// Only the canonical spelling is accepted.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "withdrawal" => Some(Self::Withdrawal),
            "referral_bonus" => Some(Self::ReferralBonus),
            "task_submission" => Some(Self::TaskSubmission),
            _ => None,
        }
    }

    /// Human label used by the notification bell.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Withdrawal => "Withdrawal requests",
            Self::ReferralBonus => "Referral bonuses",
            Self::TaskSubmission => "Task submissions",
        }
    }

    /// Admin route the notification links to.
    pub fn route(&self) -> &'static str {
        match self {
            Self::Withdrawal => "/admin/withdrawals",
            Self::ReferralBonus => "/admin/referrals",
            Self::TaskSubmission => "/admin/tasks",
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim lifecycle status. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ClaimStatus {
    pub const ALL: [ClaimStatus; 4] = [
        ClaimStatus::Pending,
        ClaimStatus::Approved,
        ClaimStatus::Rejected,
        ClaimStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Only the canonical lower-case spelling is accepted; `"Pending"` is not.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin decision applied to a pending claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Approve,
    Reject,
}

impl Action {
    pub fn target_status(&self) -> ClaimStatus {
        match self {
            Self::Approve => ClaimStatus::Approved,
            Self::Reject => ClaimStatus::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific claim fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClaimPayload {
    /// Funds were debited from `user_id` when the request was filed.
    Withdrawal {
        user_id: UserId,
        amount: Amount,
        method: String,
        account_name: String,
        account_number: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<String>,
    },
    ReferralBonus {
        referrer_id: UserId,
        referred_id: UserId,
        bonus_amount: Amount,
    },
    TaskSubmission {
        user_id: UserId,
        task_id: String,
        reward: Amount,
    },
}

impl ClaimPayload {
    pub fn kind(&self) -> ClaimKind {
        match self {
            Self::Withdrawal { .. } => ClaimKind::Withdrawal,
            Self::ReferralBonus { .. } => ClaimKind::ReferralBonus,
            Self::TaskSubmission { .. } => ClaimKind::TaskSubmission,
        }
    }

    /// The user whose balance this claim can move.
    pub fn beneficiary(&self) -> &UserId {
        match self {
            Self::Withdrawal { user_id, .. } => user_id,
            Self::ReferralBonus { referrer_id, .. } => referrer_id,
            Self::TaskSubmission { user_id, .. } => user_id,
        }
    }

    /// Monetary value carried by the claim.
    pub fn amount(&self) -> Amount {
        match self {
            Self::Withdrawal { amount, .. } => *amount,
            Self::ReferralBonus { bonus_amount, .. } => *bonus_amount,
            Self::TaskSubmission { reward, .. } => *reward,
        }
    }
}

/// Balance change for `(kind, action)`.
///
/// | kind           | approve          | reject         |
/// |----------------|------------------|----------------|
/// | withdrawal     | 0                | +amount refund |
/// | referral bonus | +bonus_amount    | 0              |
/// | task           | +reward          | 0              |
///
/// Fails with `Validation` when the amount does not fit a signed delta.
pub fn balance_delta(payload: &ClaimPayload, action: Action) -> Result<Delta> {
    match (payload, action) {
        (ClaimPayload::Withdrawal { amount, .. }, Action::Reject) => credit(*amount),
        (ClaimPayload::Withdrawal { .. }, Action::Approve) => Ok(0),
        (ClaimPayload::ReferralBonus { bonus_amount, .. }, Action::Approve) => credit(*bonus_amount),
        (ClaimPayload::TaskSubmission { reward, .. }, Action::Approve) => credit(*reward),
        (_, Action::Reject) => Ok(0),
    }
}

/// A persisted claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub status: ClaimStatus,
    pub version: u64,
    pub created_at: u64,
    #[serde(flatten)]
    pub payload: ClaimPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Claim {
    /// A fresh pending claim created now.
    pub fn new(id: &str, payload: ClaimPayload) -> Self {
        Self {
            id: id.to_string(),
            status: ClaimStatus::Pending,
            version: 0,
            created_at: now_secs(),
            payload,
            resolved_at: None,
            resolved_by: None,
            note: None,
        }
    }

    pub fn withdrawal(id: &str, user_id: &str, amount: Amount) -> Self {
        Self::new(
            id,
            ClaimPayload::Withdrawal {
                user_id: user_id.to_string(),
                amount,
                method: "bank_transfer".to_string(),
                account_name: String::new(),
                account_number: String::new(),
                transaction_id: None,
            },
        )
    }

    pub fn referral(id: &str, referrer_id: &str, referred_id: &str, bonus_amount: Amount) -> Self {
        Self::new(
            id,
            ClaimPayload::ReferralBonus {
                referrer_id: referrer_id.to_string(),
                referred_id: referred_id.to_string(),
                bonus_amount,
            },
        )
    }

    pub fn task(id: &str, user_id: &str, task_id: &str, reward: Amount) -> Self {
        Self::new(
            id,
            ClaimPayload::TaskSubmission {
                user_id: user_id.to_string(),
                task_id: task_id.to_string(),
                reward,
            },
        )
    }

    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn kind(&self) -> ClaimKind {
        self.payload.kind()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ClaimStatus::Pending
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match &self.payload {
            ClaimPayload::Withdrawal { transaction_id, .. } => transaction_id.as_deref(),
            _ => None,
        }
    }

    /// Write the extra fields of a committed transition.
    pub fn apply_patch(&mut self, status: ClaimStatus, patch: &ClaimPatch) {
        self.status = status;
        self.version += 1;
        self.resolved_at = Some(patch.resolved_at);
        if patch.resolved_by.is_some() {
            self.resolved_by = patch.resolved_by.clone();
        }
        if patch.note.is_some() {
            self.note = patch.note.clone();
        }
        if let (ClaimPayload::Withdrawal { transaction_id, .. }, Some(txn)) =
            (&mut self.payload, &patch.transaction_id)
        {
            *transaction_id = Some(txn.clone());
        }
    }
}

/// Kind-qualified claim reference used by admin actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimRef {
    pub kind: ClaimKind,
    pub id: ClaimId,
}

impl ClaimRef {
    pub fn new(kind: ClaimKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

/// Extra fields written alongside a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPatch {
    pub resolved_at: u64,
    pub resolved_by: Option<String>,
    pub note: Option<String>,
    /// Only meaningful for withdrawals.
    pub transaction_id: Option<String>,
}
