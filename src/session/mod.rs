//! Session ownership and lifecycle.
//!
//! # State Machine
//! ```text
//! Disconnected → Connecting → Connected → Disconnected
//!                              Connected → Reconnecting → Connected      (remote transport drop)
//!                                          Reconnecting → Disconnected   (gave up)
//! ```
//!
//! # Data Flow
//! ```text
//! connect(preferred)
//!     → select_backend (injected if present and preferred, else remote)
//!     → adapter.connect() (permission prompt / pairing handshake)
//!     → Session stored, tracker started, lifecycle events subscribed
//!
//! provider disconnect / session_update(approved=false) / disconnect()
//!     → subscriptions cancelled, tracker halted (null WalletState)
//!     → persisted record cleared → Disconnected
//! ```
//!
//! # Design Decisions
//! - ConnectionManager is the only mutator of the Session
//! - Exactly one adapter is active; activating another tears the first down
//! - Persisted sessions that fail to resume degrade to Disconnected, never panic

pub mod manager;
pub mod store;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::types::BackendKind;

pub use manager::{Backends, ConnectionManager};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError};

/// The live wallet session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub backend: BackendKind,
    pub connected: bool,
    pub accounts: Vec<Address>,
    pub chain_id: u64,
    /// Opaque peer metadata reported by a remote wallet.
    #[serde(default)]
    pub peer_meta: Option<Value>,
}

impl Session {
    pub fn new(backend: BackendKind, accounts: Vec<Address>, chain_id: u64) -> Self {
        Self {
            backend,
            connected: !accounts.is_empty(),
            accounts,
            chain_id,
            peer_meta: None,
        }
    }

    /// Primary account, used as the default transaction sender.
    pub fn primary_account(&self) -> Option<Address> {
        self.accounts.first().copied()
    }
}

/// Connection state published to the UI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionStatus {
    /// Gauge value for metrics.
    pub fn as_gauge(self) -> f64 {
        match self {
            ConnectionStatus::Disconnected => 0.0,
            ConnectionStatus::Connecting => 1.0,
            ConnectionStatus::Connected => 2.0,
            ConnectionStatus::Reconnecting => 3.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_session_is_not_connected() {
        let session = Session::new(BackendKind::Injected, vec![], 1);
        assert!(!session.connected);
        assert!(session.primary_account().is_none());
    }

    #[test]
    fn test_primary_account() {
        let session = Session::new(BackendKind::Remote, vec![Address::ZERO, Address::repeat_byte(1)], 100);
        assert!(session.connected);
        assert_eq!(session.primary_account(), Some(Address::ZERO));
    }
}
