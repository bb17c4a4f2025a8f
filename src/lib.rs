//! Wallet connectivity and transaction relay core.
//!
//! # Architecture Overview
//!
//! ```text
//!        UI (browser)
//!          │  ▲
//!  Command │  │ Notification          JSON over /ws
//!          ▼  │
//!   ┌──────────────┐   connect/disconnect    ┌───────────────────┐
//!   │  Dispatcher  │────────────────────────▶│ ConnectionManager │── Session (sole owner)
//!   └──────────────┘                         └─────────┬─────────┘
//!          │ submit(ref)                               │ start/halt
//!          ▼                                           ▼
//!   ┌──────────────────┐                    ┌────────────────────┐
//!   │ TransactionRelay │                    │ WalletStateTracker │── dedup → wallet_state
//!   └────────┬─────────┘                    └─────────┬──────────┘
//!            │ eth_sendTransaction                    │ events / polling
//!            ▼                                        ▼
//!   ┌────────────────────────────────────────────────────────────┐
//!   │ ProviderAdapter: InjectedAdapter | RemoteSessionAdapter    │
//!   └────────────────────────────────────────────────────────────┘
//!            │ HostWallet (JSON-RPC)        │ RelayConnector (bridge WebSocket)
//! ```

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod provider;
pub mod relay;
pub mod resilience;
pub mod session;
pub mod tracker;
pub mod ui;

pub use config::SentryConfig;
pub use lifecycle::{Shutdown, WalletSentry};
pub use provider::{BackendKind, ErrorKind, ProviderAdapter, WalletError, WalletResult};
pub use relay::{TransactionRelay, TransactionRequest, TransactionResult, TxRef};
pub use session::{ConnectionManager, ConnectionStatus, Session};
pub use tracker::{WalletState, WalletStateTracker};
pub use ui::{Command, Notification, NotificationReceiver, Notifier};
