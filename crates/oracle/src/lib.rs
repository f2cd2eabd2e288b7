//! Claimdesk Oracle
//!
//! Contract for the external decision oracle that pre-screens claims, the
//! tolerant parser for its replies, the deterministic fallback policy used
//! whenever the oracle cannot give a clean answer, and a JSON-RPC client that
//! talks to an oracle daemon over a Unix socket.

pub mod fallback;
pub mod parse;
pub mod protocol;
pub mod rpc;

pub use fallback::fallback_decision;
pub use parse::{parse_reply_text, parse_reply_value};
pub use protocol::{RpcError, RpcRequest, RpcResponse};
pub use rpc::{OracleError, RpcOracle};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use claimdesk_core::{Action, ClaimKind};

/// Oracle decision word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    Reject,
    Error,
}

impl Decision {
    /// Case-insensitive match on the decision word.
    pub fn from_word(word: &str) -> Option<Self> {
        match word.trim().to_ascii_uppercase().as_str() {
            "APPROVE" | "APPROVED" => Some(Self::Approve),
            "REJECT" | "REJECTED" => Some(Self::Reject),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// The admin action this decision maps to; `Error` has none.
    pub fn action(&self) -> Option<Action> {
        match self {
            Self::Approve => Some(Action::Approve),
            Self::Reject => Some(Action::Reject),
            Self::Error => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Oracle answer for one claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn approve() -> Self {
        Self {
            decision: Decision::Approve,
            reason: None,
        }
    }

    pub fn reject(reason: &str) -> Self {
        Self {
            decision: Decision::Reject,
            reason: Some(reason.to_string()),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Error,
            reason: Some(reason.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.decision == Decision::Error
    }
}

/// External decision service.
///
/// `decide` never fails: transport problems and unusable replies come back as
/// a [`Decision::Error`] verdict.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, kind: ClaimKind, payload: &Value) -> Verdict;
}

/// Oracle used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineOracle;

#[async_trait]
impl DecisionOracle for OfflineOracle {
    async fn decide(&self, _kind: ClaimKind, _payload: &Value) -> Verdict {
        Verdict::error("no oracle configured")
    }
}
