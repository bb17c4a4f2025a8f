//! Provider event fan-out.
//!
//! # Responsibilities
//! - Normalize backend events into [`ProviderEvent`]
//! - Register any number of handlers per [`EventKind`]
//! - Hand out [`Subscription`] handles that unregister on cancel or drop

use alloy::primitives::Address;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::provider::wire;

/// Kinds of events an adapter can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AccountsChanged,
    ChainChanged,
    Disconnected,
    SessionUpdated,
    /// The relay transport dropped while a session was live.
    TransportLost,
    /// A pairing URI is ready to be shown to the user.
    DisplayUri,
}

impl EventKind {
    /// Resolve a wire event name. `connect` carries nothing the core tracks.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            wire::EVENT_ACCOUNTS_CHANGED => Some(EventKind::AccountsChanged),
            wire::EVENT_CHAIN_CHANGED => Some(EventKind::ChainChanged),
            wire::EVENT_DISCONNECT => Some(EventKind::Disconnected),
            wire::EVENT_SESSION_UPDATE => Some(EventKind::SessionUpdated),
            _ => None,
        }
    }
}

/// A normalized event raised by either backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnected { reason: Option<String> },
    SessionUpdated { accounts: Vec<Address>, chain_id: u64 },
    TransportLost(String),
    DisplayUri(String),
}

impl ProviderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProviderEvent::AccountsChanged(_) => EventKind::AccountsChanged,
            ProviderEvent::ChainChanged(_) => EventKind::ChainChanged,
            ProviderEvent::Disconnected { .. } => EventKind::Disconnected,
            ProviderEvent::SessionUpdated { .. } => EventKind::SessionUpdated,
            ProviderEvent::TransportLost(_) => EventKind::TransportLost,
            ProviderEvent::DisplayUri(_) => EventKind::DisplayUri,
        }
    }
}

/// Callback invoked for every matching event.
pub type EventHandler = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

type HandlerMap = DashMap<u64, (EventKind, EventHandler)>;

/// Registry of event handlers shared by an adapter and its background tasks.
#[derive(Clone, Default)]
pub struct EventHub {
    next_id: Arc<AtomicU64>,
    handlers: Arc<HandlerMap>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. It stays registered while the returned handle lives.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.insert(id, (kind, handler));
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Deliver an event to every handler registered for its kind, in registration order.
    pub fn emit(&self, event: &ProviderEvent) {
        let kind = event.kind();
        // Collected first so handlers may subscribe or cancel without holding a shard lock.
        let mut targets: Vec<(u64, EventHandler)> = self
            .handlers
            .iter()
            .filter(|entry| entry.value().0 == kind)
            .map(|entry| (*entry.key(), entry.value().1.clone()))
            .collect();
        targets.sort_by_key(|(id, _)| *id);

        tracing::trace!(?kind, handlers = targets.len(), "Dispatching provider event");
        for (_, handler) in targets {
            handler(event);
        }
    }

    /// Number of live handlers for a kind.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.iter().filter(|entry| entry.value().0 == kind).count()
    }
}

/// Cancellation handle for a registered handler.
#[must_use = "dropping a Subscription unregisters its handler"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    handlers: Weak<HandlerMap>,
}

impl Subscription {
    /// Unregister the handler now.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.remove(&self.id);
        }
    }
}
