//! Transaction relay.
//!
//! # Responsibilities
//! - Accept `TransactionRequest`s tagged with a caller-supplied reference
//! - Forward them as `eth_sendTransaction` through the active adapter
//! - Publish exactly one `TransactionResult` per request, keyed by the same reference
//!
//! # Data Flow
//! ```text
//! submit(request) ──spawn──▶ execute(request)
//!                              → params must be a JSON object
//!                              → active adapter + session from ConnectionManager
//!                              → fill `from` with the session's first account
//!                              → adapter.request(eth_sendTransaction) (optional deadline)
//!                            ◀ TransactionResult { ref, txHash | error }
//!     → Notifier (transaction_result)
//! ```
//!
//! # Design Decisions
//! - Results are unordered; each request runs in its own task
//! - No automatic retries: a wallet rejection is final
//! - The relay never generates references and keeps no history after resolution

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::schema::RelayConfig;
use crate::observability::metrics;
use crate::provider::types::{ErrorKind, WalletError, WalletResult};
use crate::provider::wire;
use crate::session::ConnectionManager;
use crate::ui::{Notification, Notifier};

/// Caller-supplied correlation reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(String);

impl TxRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TxRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TxRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A transaction to hand to the wallet for signing and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    #[serde(rename = "ref")]
    pub tx_ref: TxRef,
    /// Opaque transaction object (`to`, `value`, `data`, ...).
    #[serde(rename = "params", alias = "txParams")]
    pub tx_params: Value,
}

impl TransactionRequest {
    pub fn new(tx_ref: impl Into<TxRef>, tx_params: Value) -> Self {
        Self {
            tx_ref: tx_ref.into(),
            tx_params,
        }
    }
}

/// Outcome of one submission. Exactly one of `tx_hash` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    #[serde(rename = "ref")]
    pub tx_ref: TxRef,
    pub tx_hash: Option<String>,
    pub error: Option<ErrorKind>,
}

impl TransactionResult {
    pub fn submitted(tx_ref: TxRef, tx_hash: String) -> Self {
        Self {
            tx_ref,
            tx_hash: Some(tx_hash),
            error: None,
        }
    }

    pub fn failed(tx_ref: TxRef, error: ErrorKind) -> Self {
        Self {
            tx_ref,
            tx_hash: None,
            error: Some(error),
        }
    }
}

struct RelayInner {
    manager: ConnectionManager,
    notifier: Notifier,
    timeout: Option<Duration>,
    // Reference → number of submissions currently using it.
    in_flight: DashMap<TxRef, usize>,
}

/// Correlating transaction submitter.
#[derive(Clone)]
pub struct TransactionRelay {
    inner: Arc<RelayInner>,
}

impl TransactionRelay {
    pub fn new(manager: ConnectionManager, notifier: Notifier, config: &RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                manager,
                notifier,
                timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
                in_flight: DashMap::new(),
            }),
        }
    }

    /// Submit without waiting. The result is published as a `transaction_result` notification.
    pub fn submit(&self, request: TransactionRequest) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner.execute(request).await;
            inner.notifier.publish(Notification::TransactionResult(result));
        });
    }

    /// Run one submission to completion and return its result without publishing it.
    pub async fn execute(&self, request: TransactionRequest) -> TransactionResult {
        self.inner.execute(request).await
    }

    /// Number of distinct references currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }
}

impl RelayInner {
    async fn execute(&self, request: TransactionRequest) -> TransactionResult {
        let TransactionRequest { tx_ref, tx_params } = request;

        let duplicate = {
            let mut count = self.in_flight.entry(tx_ref.clone()).or_insert(0);
            *count += 1;
            *count > 1
        };
        if duplicate {
            tracing::warn!(tx_ref = %tx_ref, "Duplicate in-flight transaction reference");
        }

        let outcome = self.send(&tx_ref, tx_params).await;

        self.in_flight.remove_if_mut(&tx_ref, |_, count| {
            *count -= 1;
            *count == 0
        });

        match outcome {
            Ok(hash) => {
                tracing::info!(tx_ref = %tx_ref, tx_hash = %hash, "Transaction submitted");
                metrics::record_transaction("submitted");
                TransactionResult::submitted(tx_ref, hash)
            }
            Err(e) => {
                tracing::warn!(tx_ref = %tx_ref, error = %e, "Transaction failed");
                metrics::record_transaction(e.kind().as_str());
                TransactionResult::failed(tx_ref, e.kind())
            }
        }
    }

    async fn send(&self, tx_ref: &TxRef, params: Value) -> WalletResult<String> {
        let Value::Object(mut tx) = params else {
            return Err(WalletError::MalformedRequest(format!(
                "transaction params must be an object, got {params}"
            )));
        };

        let (adapter, session) = self
            .manager
            .active()
            .ok_or_else(|| WalletError::ProviderUnavailable("no active wallet session".into()))?;

        if tx.get("from").map_or(true, Value::is_null) {
            let from = session
                .primary_account()
                .ok_or_else(|| WalletError::ProviderUnavailable("session has no account".into()))?;
            tx.insert("from".to_string(), json!(from));
        }

        tracing::debug!(tx_ref = %tx_ref, backend = %adapter.kind(), "Relaying transaction");
        let call = adapter.request(wire::ETH_SEND_TRANSACTION, json!([Value::Object(tx)]));
        let response = match self.timeout {
            Some(limit) => timeout(limit, call).await.map_err(|_| {
                WalletError::Transport(format!("no wallet response within {} seconds", limit.as_secs()))
            })??,
            None => call.await?,
        };

        match response {
            Value::String(hash) => Ok(hash),
            other => Err(WalletError::Provider {
                code: 0,
                message: format!("expected a transaction hash, got {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_both_param_names() {
        let a: TransactionRequest = serde_json::from_value(json!({"ref": "a", "params": {}})).unwrap();
        let b: TransactionRequest = serde_json::from_value(json!({"ref": "a", "txParams": {}})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.tx_ref.as_str(), "a");
    }

    #[test]
    fn test_result_shape() {
        let failed = TransactionResult::failed(TxRef::from("tx2"), ErrorKind::UserRejected);
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"ref": "tx2", "txHash": null, "error": "user_rejected"})
        );
    }
}
