//! JSON-RPC 2.0 envelope spoken with the oracle daemon.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use claimdesk_core::ClaimKind;

/// Method name for a decision request.
pub const DECIDE_METHOD: &str = "oracle.decide";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(method: &str, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id,
        }
    }

    /// `oracle.decide` with `{kind, payload}` params.
    pub fn decide(kind: ClaimKind, payload: &Value, id: u64) -> Self {
        Self::new(
            DECIDE_METHOD,
            Some(serde_json::json!({
                "kind": kind.as_str(),
                "payload": payload,
            })),
            id,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: u64,
}

/// Server-side builders for the fake daemons in tests.
#[cfg(test)]
impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: u64, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}
