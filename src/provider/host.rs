//! Host wallet access for the injected backend.
//!
//! # Responsibilities
//! - Define the [`HostWallet`] seam an injected wallet is reached through
//! - Provide a JSON-RPC implementation for wallets that expose a local
//!   endpoint (desktop wallets, unlocked development nodes)
//! - Map RPC error responses and timeouts to `WalletError`
//!
//! Reads are bounded by `request_timeout_secs`. Account and transaction
//! prompts wait on a human and are left to the caller's deadline.

use alloy::rpc::client::{ClientBuilder, RpcClient};
use alloy::transports::RpcError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::observability::metrics;
use crate::provider::types::{WalletError, WalletResult};
use crate::provider::wire;

/// Methods that wait for the user to approve a prompt. The caller owns their deadline.
const INTERACTIVE_METHODS: [&str; 3] = [
    wire::ETH_REQUEST_ACCOUNTS,
    wire::ETH_SEND_TRANSACTION,
    wire::WALLET_ADD_ETHEREUM_CHAIN,
];

/// Raw event pushed by a host wallet, e.g. `accountsChanged` with an address array.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEvent {
    pub name: String,
    pub payload: Value,
}

impl HostEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// A wallet that is already present in the execution environment.
#[async_trait]
pub trait HostWallet: Send + Sync {
    /// Forward a JSON-RPC request to the wallet.
    async fn request(&self, method: &str, params: Value) -> WalletResult<Value>;

    /// Push channel for wallet events, if the wallet has one.
    fn events(&self) -> Option<broadcast::Receiver<HostEvent>> {
        None
    }
}

/// Host wallet reached over HTTP JSON-RPC. Has no push channel.
pub struct RpcHostWallet {
    client: RpcClient,
    url: url::Url,
    timeout_duration: Duration,
}

impl RpcHostWallet {
    pub fn new(rpc_url: &str, timeout_secs: u64) -> WalletResult<Self> {
        let url: url::Url = rpc_url.parse().map_err(|e| {
            WalletError::ProviderUnavailable(format!("Invalid host wallet URL '{}': {}", rpc_url, e))
        })?;

        let client = ClientBuilder::default().http(url.clone());
        tracing::info!(rpc_url = %url, "Host wallet client initialized");

        Ok(Self {
            client,
            url,
            timeout_duration: Duration::from_secs(timeout_secs),
        })
    }

    fn deadline(&self, method: &str) -> Option<Duration> {
        (!INTERACTIVE_METHODS.contains(&method)).then_some(self.timeout_duration)
    }
}

#[async_trait]
impl HostWallet for RpcHostWallet {
    async fn request(&self, method: &str, params: Value) -> WalletResult<Value> {
        let call = self.client.request::<Value, Value>(method.to_owned(), params);

        let response = match self.deadline(method) {
            Some(limit) => match timeout(limit, async move { call.await }).await {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!(url = %self.url, method, "Host wallet RPC timeout");
                    metrics::record_rpc_request(method, false);
                    return Err(WalletError::Transport(format!(
                        "{} timed out after {} seconds",
                        method,
                        limit.as_secs()
                    )));
                }
            },
            None => call.await,
        };

        let outcome = match response {
            Ok(value) => Ok(value),
            Err(RpcError::ErrorResp(payload)) => {
                Err(WalletError::from_rpc(payload.code, payload.message.to_string()))
            }
            Err(e) => {
                tracing::warn!(url = %self.url, method, error = %e, "Host wallet RPC failed");
                Err(WalletError::Transport(e.to_string()))
            }
        };

        metrics::record_rpc_request(method, outcome.is_ok());
        outcome
    }
}

impl std::fmt::Debug for RpcHostWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcHostWallet")
            .field("url", &self.url.as_str())
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_unavailable() {
        let err = RpcHostWallet::new("not a url", 5).unwrap_err();
        assert_eq!(err.kind(), crate::provider::ErrorKind::ProviderUnavailable);
    }

    #[test]
    fn test_prompting_methods_have_no_deadline() {
        let host = RpcHostWallet::new("http://127.0.0.1:8545", 5).unwrap();
        assert_eq!(host.deadline("eth_accounts"), Some(Duration::from_secs(5)));
        assert_eq!(host.deadline("eth_getBalance"), Some(Duration::from_secs(5)));
        assert_eq!(host.deadline("eth_requestAccounts"), None);
        assert_eq!(host.deadline("eth_sendTransaction"), None);
        assert_eq!(host.deadline("wallet_addEthereumChain"), None);
    }

    #[tokio::test]
    async fn test_slow_host_times_out_reads() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let host = RpcHostWallet::new(&format!("http://{addr}"), 1).unwrap();

        let err = host.request("eth_accounts", serde_json::json!([])).await.unwrap_err();
        assert_eq!(err.kind(), crate::provider::ErrorKind::TransportError);

        // A prompt is still waiting after the read deadline has passed.
        let prompt = host.request("eth_requestAccounts", serde_json::json!([]));
        let waited = tokio::time::timeout(Duration::from_millis(1500), prompt).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // Port 9 (discard) is not expected to serve JSON-RPC.
        let host = RpcHostWallet::new("http://127.0.0.1:9", 2).unwrap();
        let err = host.request("eth_accounts", serde_json::json!([])).await.unwrap_err();
        assert_eq!(err.kind(), crate::provider::ErrorKind::TransportError);
    }
}
