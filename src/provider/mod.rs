//! Wallet provider adapters.
//!
//! # Data Flow
//! ```text
//! ConnectionManager / WalletStateTracker / TransactionRelay
//!     → ProviderAdapter (connect, disconnect, request, subscribe)
//!         → InjectedAdapter → HostWallet (local JSON-RPC or in-process wallet)
//!         → RemoteSessionAdapter → RelayConnector (bridge relay WebSocket)
//!     ← ProviderEvent fan-out (accountsChanged, chainChanged, disconnect, session_update)
//! ```
//!
//! # Design Decisions
//! - Both backends satisfy one trait; callers never branch on backend kind
//! - Permission rejection is an empty-accounts session, not an error
//! - Every RPC failure surfaces as a `WalletError` carrying an `ErrorKind`

pub mod events;
pub mod host;
pub mod injected;
pub mod relay;
pub mod remote;
pub mod types;
pub mod wire;

use async_trait::async_trait;
use serde_json::Value;

use crate::session::Session;

pub use events::{EventHandler, EventHub, EventKind, ProviderEvent, Subscription};
pub use host::{HostEvent, HostWallet, RpcHostWallet};
pub use injected::InjectedAdapter;
pub use relay::{RelayConnector, WsRelayConnector};
pub use remote::RemoteSessionAdapter;
pub use types::{BackendKind, ChainParams, ErrorKind, WalletError, WalletResult};

/// Uniform contract over both wallet backends.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Backend this adapter drives.
    fn kind(&self) -> BackendKind;

    /// Whether account/chain changes arrive as push events. Without them the
    /// tracker falls back to polling.
    fn has_push_events(&self) -> bool;

    /// Establish a session: permission prompt or pairing handshake.
    async fn connect(&self) -> WalletResult<Session>;

    /// Tear the session down and clear its persisted record.
    async fn disconnect(&self) -> WalletResult<()>;

    /// Forward a JSON-RPC call.
    async fn request(&self, method: &str, params: Value) -> WalletResult<Value>;

    /// Register a handler for one event kind.
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription;

    /// Silently resume from persisted state. `Ok(None)` when nothing is persisted.
    async fn resume(&self) -> WalletResult<Option<Session>>;

    /// Re-establish the transport of the current session.
    async fn reconnect(&self) -> WalletResult<Session>;
}
