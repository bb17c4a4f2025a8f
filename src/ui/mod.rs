//! UI boundary.
//!
//! # Data Flow
//! ```text
//! UI ── Command (JSON over /ws) ──▶ Dispatcher ──▶ ConnectionManager / TransactionRelay
//! UI ◀── Notification (JSON over /ws) ── Notifier ◀── manager, tracker, relay
//! ```
//!
//! # Design Decisions
//! - Messages are internally tagged by `type`, snake_case, so a browser client can switch on one field
//! - The core never renders anything; it only publishes notifications
//! - Status and wallet-state updates go through a bounded broadcast; a slow
//!   client lags and skips stale ones instead of blocking the core
//! - Replies to a specific request (transaction, balance, chain results) and
//!   pairing URIs are queued per subscriber and never skipped

pub mod dispatcher;
pub mod server;

use alloy::primitives::Address;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;

use crate::provider::types::{BackendKind, ChainParams, ErrorKind};
use crate::relay::{TransactionRequest, TransactionResult};
use crate::session::ConnectionStatus;
use crate::tracker::WalletState;

pub use dispatcher::Dispatcher;
pub use server::UiServer;

/// Inbound message from the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Connect {
        #[serde(default)]
        backend: Option<BackendKind>,
    },
    Disconnect,
    SubmitTransaction(TransactionRequest),
    RefreshBalance {
        address: Address,
    },
    AddChain {
        params: ChainParams,
    },
}

/// Outbound message to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Notification {
    ConnectionStatus {
        status: ConnectionStatus,
        backend: Option<BackendKind>,
    },
    /// Render as a QR code or deep link.
    PairingUri {
        uri: String,
    },
    WalletState(WalletState),
    WalletError {
        error: ErrorKind,
        message: String,
    },
    TransactionResult(TransactionResult),
    BalanceResult {
        address: Address,
        balance_wei: Option<String>,
        error: Option<ErrorKind>,
    },
    ChainResult {
        chain_id: String,
        error: Option<ErrorKind>,
    },
}

impl Notification {
    /// Whether every subscriber must see this notification even when lagging.
    pub fn must_deliver(&self) -> bool {
        matches!(
            self,
            Notification::PairingUri { .. }
                | Notification::TransactionResult(_)
                | Notification::BalanceResult { .. }
                | Notification::ChainResult { .. }
        )
    }
}

type Outboxes = DashMap<u64, mpsc::UnboundedSender<Notification>>;

/// Fan-out of notifications to every connected UI client.
#[derive(Debug, Clone)]
pub struct Notifier {
    updates: broadcast::Sender<Notification>,
    outboxes: Arc<Outboxes>,
    next_id: Arc<AtomicU64>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            updates,
            outboxes: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn publish(&self, notification: Notification) {
        if notification.must_deliver() {
            if self.outboxes.is_empty() {
                tracing::trace!("Notification dropped, no UI client listening");
            }
            // A closed outbox belongs to a receiver being dropped; it unregisters itself.
            for outbox in self.outboxes.iter() {
                let _ = outbox.value().send(notification.clone());
            }
        } else if self.updates.send(notification).is_err() {
            tracing::trace!("Notification dropped, no UI client listening");
        }
    }

    /// Receive everything published from now on.
    pub fn subscribe(&self) -> NotificationReceiver {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, outbox) = mpsc::unbounded_channel();
        // Both halves registered before returning so nothing published afterwards is missed.
        let updates = self.updates.subscribe();
        self.outboxes.insert(id, tx);
        NotificationReceiver {
            id,
            outbox,
            updates,
            outboxes: Arc::downgrade(&self.outboxes),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.outboxes.len()
    }
}

/// One subscriber's view of the notification stream.
#[derive(Debug)]
pub struct NotificationReceiver {
    id: u64,
    outbox: mpsc::UnboundedReceiver<Notification>,
    updates: broadcast::Receiver<Notification>,
    outboxes: Weak<Outboxes>,
}

impl NotificationReceiver {
    /// Next notification. `Lagged` only ever reports skipped status or state updates.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Result<Notification, RecvError> {
        tokio::select! {
            biased;
            Some(notification) = self.outbox.recv() => Ok(notification),
            update = self.updates.recv() => update,
        }
    }
}

impl Drop for NotificationReceiver {
    fn drop(&mut self) {
        if let Some(outboxes) = self.outboxes.upgrade() {
            outboxes.remove(&self.id);
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}
