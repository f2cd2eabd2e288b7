//! Oracle client over a Unix socket.
//!
//! One connection per request, one JSON line each way.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use claimdesk_core::ClaimKind;

use crate::parse::parse_reply_value;
use crate::protocol::{RpcRequest, RpcResponse};
use crate::{DecisionOracle, Verdict};

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("oracle not running")]
    NotRunning,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("oracle error: code={code}, message={message}")]
    Remote { code: i32, message: String },
}

pub type Result<T> = std::result::Result<T, OracleError>;

/// JSON-RPC client for an oracle daemon.
pub struct RpcOracle {
    socket_path: String,
    next_id: AtomicU64,
}

impl RpcOracle {
    pub fn new(socket_path: &str) -> Self {
        Self {
            socket_path: socket_path.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send one request and return its `result`.
    #[cfg(unix)]
    pub async fn send(&self, request: &RpcRequest) -> Result<Value> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::UnixStream;

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|_| OracleError::NotRunning)?;
        let (reader, mut writer) = stream.into_split();

        let json = serde_json::to_string(request)
            .map_err(|e| OracleError::ConnectionFailed(e.to_string()))?;
        debug!(method = %request.method, id = request.id, "oracle request");

        writer
            .write_all(format!("{}\n", json).as_bytes())
            .await
            .map_err(|e| OracleError::ConnectionFailed(e.to_string()))?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| OracleError::ConnectionFailed(e.to_string()))?;
        debug!(response = line.trim(), "oracle response");

        let response: RpcResponse = serde_json::from_str(line.trim())
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        if let Some(err) = response.error {
            return Err(OracleError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        response
            .result
            .ok_or_else(|| OracleError::InvalidResponse("no result in response".to_string()))
    }

    #[cfg(not(unix))]
    pub async fn send(&self, _request: &RpcRequest) -> Result<Value> {
        Err(OracleError::ConnectionFailed(
            "unix sockets are not available on this platform".to_string(),
        ))
    }
}

#[async_trait]
impl DecisionOracle for RpcOracle {
    async fn decide(&self, kind: ClaimKind, payload: &Value) -> Verdict {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::decide(kind, payload, id);
        match self.send(&request).await {
            Ok(result) => {
                let verdict = parse_reply_value(&result);
                if verdict.is_error() {
                    warn!(kind = %kind, reason = ?verdict.reason, "unusable oracle reply");
                }
                verdict
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "oracle request failed");
                Verdict::error(e.to_string())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::Decision;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    /// Serve exactly one request, answering with `reply`.
    fn serve_once(path: &std::path::Path, reply: impl Fn(RpcRequest) -> String + Send + 'static) {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let request: RpcRequest = serde_json::from_str(line.trim()).unwrap();
            let out = reply(request);
            writer.write_all(format!("{}\n", out).as_bytes()).await.unwrap();
        });
    }

    #[tokio::test]
    async fn test_not_running_is_error_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = RpcOracle::new(dir.path().join("missing.sock").to_str().unwrap());
        let verdict = oracle.decide(ClaimKind::TaskSubmission, &serde_json::json!({})).await;
        assert!(verdict.is_error());
    }

    #[tokio::test]
    async fn test_structured_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.sock");
        serve_once(&path, |req| {
            assert_eq!(req.method, "oracle.decide");
            let params = req.params.unwrap();
            assert_eq!(params["kind"], "referral_bonus");
            serde_json::to_string(&RpcResponse::success(
                req.id,
                serde_json::json!({"decision": "REJECT", "reason": "self referral"}),
            ))
            .unwrap()
        });

        let oracle = RpcOracle::new(path.to_str().unwrap());
        let verdict = oracle
            .decide(ClaimKind::ReferralBonus, &serde_json::json!({"id": "r1"}))
            .await;
        assert_eq!(verdict, Verdict::reject("self referral"));
    }

    #[tokio::test]
    async fn test_text_result_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.sock");
        serve_once(&path, |req| {
            serde_json::to_string(&RpcResponse::success(
                req.id,
                Value::String("```json\n{\"decision\":\"approve\"}\n```".to_string()),
            ))
            .unwrap()
        });

        let oracle = RpcOracle::new(path.to_str().unwrap());
        let verdict = oracle.decide(ClaimKind::TaskSubmission, &serde_json::json!({})).await;
        assert_eq!(verdict.decision, Decision::Approve);
    }

    #[tokio::test]
    async fn test_remote_error_is_error_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.sock");
        serve_once(&path, |req| {
            serde_json::to_string(&RpcResponse::error(req.id, -32000, "quota".to_string())).unwrap()
        });

        let oracle = RpcOracle::new(path.to_str().unwrap());
        let verdict = oracle.decide(ClaimKind::TaskSubmission, &serde_json::json!({})).await;
        assert!(verdict.is_error());
        assert!(verdict.reason.unwrap().contains("quota"));
    }

    #[tokio::test]
    async fn test_garbage_line_is_error_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.sock");
        serve_once(&path, |_| "not json at all".to_string());

        let oracle = RpcOracle::new(path.to_str().unwrap());
        let verdict = oracle.decide(ClaimKind::TaskSubmission, &serde_json::json!({})).await;
        assert!(verdict.is_error());
    }
}
