//! Wire-level method names, event names and response parsing.
//!
//! Method and event names must match real wallet software exactly.

use alloy::primitives::{Address, U256};
use serde_json::Value;
use std::str::FromStr;

use crate::provider::types::{WalletError, WalletResult};

pub const ETH_ACCOUNTS: &str = "eth_accounts";
pub const ETH_REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
pub const ETH_SEND_TRANSACTION: &str = "eth_sendTransaction";
pub const ETH_GET_BALANCE: &str = "eth_getBalance";
pub const NET_VERSION: &str = "net_version";
pub const WALLET_ADD_ETHEREUM_CHAIN: &str = "wallet_addEthereumChain";

pub const EVENT_ACCOUNTS_CHANGED: &str = "accountsChanged";
pub const EVENT_CHAIN_CHANGED: &str = "chainChanged";
pub const EVENT_DISCONNECT: &str = "disconnect";
pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_SESSION_UPDATE: &str = "session_update";

/// Parse an account list (`["0x..", ...]`).
pub fn parse_accounts(value: &Value) -> WalletResult<Vec<Address>> {
    let items = value.as_array().ok_or_else(|| {
        WalletError::Provider {
            code: 0,
            message: format!("expected account array, got {value}"),
        }
    })?;

    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(|s| Address::from_str(s).ok())
                .ok_or_else(|| WalletError::Provider {
                    code: 0,
                    message: format!("invalid account entry {item}"),
                })
        })
        .collect()
}

/// Parse a chain or network id.
///
/// Accepts JSON numbers, decimal strings (`net_version`) and hex strings
/// (`chainChanged`, `eth_chainId`).
pub fn parse_chain_id(value: &Value) -> WalletResult<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse::<u64>().ok(),
        },
        _ => None,
    };

    parsed.ok_or_else(|| WalletError::Provider {
        code: 0,
        message: format!("invalid chain id {value}"),
    })
}

/// Parse a hex (or decimal) quantity such as an `eth_getBalance` result.
pub fn parse_quantity(value: &Value) -> WalletResult<U256> {
    value
        .as_str()
        .and_then(|s| U256::from_str(s).ok())
        .ok_or_else(|| WalletError::Provider {
            code: 0,
            message: format!("invalid quantity {value}"),
        })
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_accounts() {
        let accounts = parse_accounts(&json!([
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        ]))
        .unwrap();
        assert_eq!(accounts.len(), 2);

        assert!(parse_accounts(&json!([])).unwrap().is_empty());
        assert!(parse_accounts(&json!("0x1")).is_err());
        assert!(parse_accounts(&json!(["not-an-address"])).is_err());
    }

    #[test]
    fn test_parse_chain_id_formats() {
        assert_eq!(parse_chain_id(&json!("100")).unwrap(), 100);
        assert_eq!(parse_chain_id(&json!("0x64")).unwrap(), 100);
        assert_eq!(parse_chain_id(&json!(1)).unwrap(), 1);
        assert!(parse_chain_id(&json!("mainnet")).is_err());
        assert!(parse_chain_id(&Value::Null).is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0xde0b6b3a7640000")).unwrap(), U256::from(10u64).pow(U256::from(18)));
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), U256::ZERO);
        assert!(parse_quantity(&json!(12)).is_err());
    }
}
