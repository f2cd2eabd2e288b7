//! Claimdesk Core
//!
//! Data model, balance rule table, fee helpers and the error taxonomy shared by
//! every Claimdesk crate.

pub mod amount;
pub mod claim;
pub mod fee;

pub use amount::*;
pub use claim::*;
pub use fee::*;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// User identifier as issued by the auth provider.
pub type UserId = String;

/// Claim identifier, unique across all claim kinds.
pub type ClaimId = String;

/// Error taxonomy for every ledger-mutating operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    #[error("claim {id} already processed (status {status})")]
    AlreadyProcessed { id: ClaimId, status: ClaimStatus },
    #[error("version conflict on {entity}: expected {expected}, found {actual}")]
    VersionConflict {
        entity: String,
        expected: u64,
        actual: u64,
    },
    #[error("claim {id} still conflicting after {attempts} attempts")]
    Conflict { id: ClaimId, attempts: u32 },
    #[error("insufficient funds for {user_id}: balance {balance}, delta {delta}")]
    InsufficientFunds {
        user_id: UserId,
        balance: Amount,
        delta: Delta,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ClaimError {
    /// Whether the coordinator should retry the whole attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, ClaimError>;

/// Payment verification state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unverified,
    Verified,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unverified" => Some(Self::Unverified),
            "verified" => Some(Self::Verified),
            _ => None,
        }
    }
}

/// A platform user and their ledger balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub balance: Amount,
    pub payment_status: PaymentStatus,
    pub created_at: u64,
    /// Bumped on every committed balance adjustment.
    #[serde(default)]
    pub version: u64,
}

impl User {
    pub fn new(id: &str, email: &str, balance: Amount) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_string(),
            balance,
            payment_status: PaymentStatus::Unverified,
            created_at: now_secs(),
            version: 0,
        }
    }

    pub fn verified(mut self) -> Self {
        self.payment_status = PaymentStatus::Verified;
        self
    }

    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn balance_record(&self) -> BalanceRecord {
        BalanceRecord {
            balance: self.balance,
            version: self.version,
        }
    }
}

/// Balance together with the version it was read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub balance: Amount,
    pub version: u64,
}

/// Fee record appended when an approval generates platform revenue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueEntry {
    pub admin_fee_amount: Amount,
    pub original_amount: Amount,
    pub source_user_id: UserId,
    pub kind: ClaimKind,
    pub timestamp: u64,
}

/// Per-kind auto-pilot switches. Withdrawals deliberately have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoPilotSettings {
    #[serde(default)]
    pub auto_pilot_referrals: bool,
    #[serde(default)]
    pub auto_pilot_tasks: bool,
}

impl AutoPilotSettings {
    pub fn enabled_for(&self, kind: ClaimKind) -> bool {
        match kind {
            ClaimKind::Withdrawal => false,
            ClaimKind::ReferralBonus => self.auto_pilot_referrals,
            ClaimKind::TaskSubmission => self.auto_pilot_tasks,
        }
    }
}

/// Current unix timestamp in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_parse() {
        assert_eq!(PaymentStatus::parse("verified"), Some(PaymentStatus::Verified));
        assert_eq!(PaymentStatus::parse("unverified"), Some(PaymentStatus::Unverified));
        assert_eq!(PaymentStatus::parse("Verified"), None);
    }

    #[test]
    fn test_autopilot_settings_wire_names() {
        let settings = AutoPilotSettings {
            auto_pilot_referrals: true,
            auto_pilot_tasks: false,
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, r#"{"autoPilotReferrals":true,"autoPilotTasks":false}"#);

        let parsed: AutoPilotSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, AutoPilotSettings::default());
    }

    #[test]
    fn test_withdrawals_never_autopiloted() {
        let settings = AutoPilotSettings {
            auto_pilot_referrals: true,
            auto_pilot_tasks: true,
        };
        assert!(!settings.enabled_for(ClaimKind::Withdrawal));
        assert!(settings.enabled_for(ClaimKind::ReferralBonus));
        assert!(settings.enabled_for(ClaimKind::TaskSubmission));
    }

    #[test]
    fn test_only_version_conflicts_retry() {
        let conflict = ClaimError::VersionConflict {
            entity: "claim c1".into(),
            expected: 0,
            actual: 1,
        };
        assert!(conflict.is_retryable());
        assert!(!ClaimError::NotFound("claim c1".into()).is_retryable());
    }

    #[test]
    fn test_revenue_entry_serde() {
        let entry = RevenueEntry {
            admin_fee_amount: 150,
            original_amount: 3_000,
            source_user_id: "u1".into(),
            kind: ClaimKind::Withdrawal,
            timestamp: 100,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"adminFeeAmount\":150"));
        assert!(json.contains("\"sourceUserId\":\"u1\""));
        let parsed: RevenueEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }
}
