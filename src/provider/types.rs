//! Wallet-facing types and error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which adapter implementation backs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// A host wallet already present in the environment.
    Injected,
    /// A wallet reached through a bridge relay after a pairing handshake.
    Remote,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Injected => "injected",
            BackendKind::Remote => "remote",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error classification delivered to the UI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProviderUnavailable,
    UserRejected,
    NetworkMismatch,
    TransportError,
    SessionExpired,
    MalformedRequest,
    ProviderError,
}

impl ErrorKind {
    /// Map an EIP-1193 / JSON-RPC error code to a kind.
    pub fn from_rpc_code(code: i64) -> Self {
        match code {
            4001 | 4100 => ErrorKind::UserRejected,
            4900 | 4901 => ErrorKind::TransportError,
            4902 => ErrorKind::NetworkMismatch,
            -32600 | -32602 => ErrorKind::MalformedRequest,
            _ => ErrorKind::ProviderError,
        }
    }

    /// Recoverable kinds degrade the connection instead of being reported as faults.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::SessionExpired | ErrorKind::ProviderUnavailable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::UserRejected => "user_rejected",
            ErrorKind::NetworkMismatch => "network_mismatch",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::SessionExpired => "session_expired",
            ErrorKind::MalformedRequest => "malformed_request",
            ErrorKind::ProviderError => "provider_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while talking to a wallet backend.
#[derive(Debug, Clone, Error)]
pub enum WalletError {
    /// No wallet is present or no session is active.
    #[error("Wallet provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The user declined a permission prompt or a transaction.
    #[error("Rejected by user: {0}")]
    UserRejected(String),

    /// The wallet is on an unexpected chain for the operation.
    #[error("Network mismatch: {0}")]
    NetworkMismatch(String),

    /// The bridge relay or RPC endpoint is unreachable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A persisted session could not be resumed.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Caller-supplied parameters were invalid.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Any other JSON-RPC error response.
    #[error("Provider error {code}: {message}")]
    Provider { code: i64, message: String },
}

impl WalletError {
    /// Build an error from a JSON-RPC error response.
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorKind::from_rpc_code(code) {
            ErrorKind::UserRejected => WalletError::UserRejected(message),
            ErrorKind::TransportError => WalletError::Transport(message),
            ErrorKind::NetworkMismatch => WalletError::NetworkMismatch(message),
            ErrorKind::MalformedRequest => WalletError::MalformedRequest(message),
            _ => WalletError::Provider { code, message },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            WalletError::UserRejected(_) => ErrorKind::UserRejected,
            WalletError::NetworkMismatch(_) => ErrorKind::NetworkMismatch,
            WalletError::Transport(_) => ErrorKind::TransportError,
            WalletError::SessionExpired(_) => ErrorKind::SessionExpired,
            WalletError::MalformedRequest(_) => ErrorKind::MalformedRequest,
            WalletError::Provider { .. } => ErrorKind::ProviderError,
        }
    }
}

/// Result type for wallet operations.
pub type WalletResult<T> = Result<T, WalletError>;

/// Parameters for `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainParams {
    /// Hex-encoded chain id, e.g. `0x64`.
    pub chain_id: String,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub block_explorer_urls: Vec<String>,
    pub native_currency: NativeCurrency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl ChainParams {
    /// The xDai (Gnosis) chain as most wallets expect it.
    pub fn xdai() -> Self {
        Self {
            chain_id: "0x64".to_string(),
            chain_name: "xDai Chain".to_string(),
            rpc_urls: vec!["https://rpc.xdaichain.com".to_string()],
            block_explorer_urls: vec!["https://blockscout.com/xdai/mainnet".to_string()],
            native_currency: NativeCurrency {
                name: "xDAI".to_string(),
                symbol: "xDAI".to_string(),
                decimals: 18,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_code_mapping() {
        assert_eq!(WalletError::from_rpc(4001, "denied").kind(), ErrorKind::UserRejected);
        assert_eq!(WalletError::from_rpc(4902, "unknown chain").kind(), ErrorKind::NetworkMismatch);
        assert_eq!(WalletError::from_rpc(-32602, "bad params").kind(), ErrorKind::MalformedRequest);
        assert_eq!(WalletError::from_rpc(4900, "disconnected").kind(), ErrorKind::TransportError);

        let err = WalletError::from_rpc(-32000, "insufficient funds");
        assert_eq!(err.kind(), ErrorKind::ProviderError);
        assert!(err.to_string().contains("-32000"));
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(ErrorKind::SessionExpired.is_recoverable());
        assert!(ErrorKind::ProviderUnavailable.is_recoverable());
        assert!(!ErrorKind::TransportError.is_recoverable());
    }

    #[test]
    fn test_error_kind_serde() {
        let json = serde_json::to_string(&ErrorKind::UserRejected).unwrap();
        assert_eq!(json, "\"user_rejected\"");
    }

    #[test]
    fn test_xdai_params_wire_shape() {
        let json = serde_json::to_value(ChainParams::xdai()).unwrap();
        assert_eq!(json["chainId"], "0x64");
        assert_eq!(json["rpcUrls"][0], "https://rpc.xdaichain.com");
        assert_eq!(json["nativeCurrency"]["decimals"], 18);
    }
}
