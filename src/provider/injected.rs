//! Injected wallet adapter.
//!
//! # Responsibilities
//! - Request account permission from the host wallet (`eth_requestAccounts`)
//! - Translate host push events into [`ProviderEvent`]s
//! - Persist a marker record so a later start can resume without a prompt
//!
//! Disconnection is implicit: the host wallet stays available, only local
//! state and the persisted record are dropped.

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::provider::events::{EventHandler, EventHub, EventKind, ProviderEvent, Subscription};
use crate::provider::host::{HostEvent, HostWallet};
use crate::provider::types::{BackendKind, ErrorKind, WalletError, WalletResult};
use crate::provider::{wire, ProviderAdapter};
use crate::session::{Session, SessionStore};

/// Persisted marker for a previously granted injected session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InjectedRecord {
    accounts: Vec<Address>,
    chain_id: u64,
    saved_at: u64,
}

/// Adapter over a [`HostWallet`].
pub struct InjectedAdapter {
    host: Arc<dyn HostWallet>,
    store: Arc<dyn SessionStore>,
    hub: EventHub,
    push_events: bool,
    ttl_secs: u64,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl InjectedAdapter {
    /// `ttl_secs` bounds how old a persisted record may be; 0 disables the check.
    pub fn new(host: Arc<dyn HostWallet>, store: Arc<dyn SessionStore>, ttl_secs: u64) -> Self {
        let push_events = host.events().is_some();
        Self {
            host,
            store,
            hub: EventHub::new(),
            push_events,
            ttl_secs,
            forwarder: Mutex::new(None),
        }
    }

    /// Start translating host events. Idempotent.
    fn ensure_forwarding(&self) {
        let mut forwarder = self.forwarder.lock().unwrap_or_else(|e| e.into_inner());
        if forwarder.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Some(mut events) = self.host.events() else {
            return;
        };

        let hub = self.hub.clone();
        *forwarder = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => forward_host_event(&hub, event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Host wallet events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Host wallet event stream closed");
        }));
    }

    fn stop_forwarding(&self) {
        let mut forwarder = self.forwarder.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = forwarder.take() {
            task.abort();
        }
    }

    async fn chain_id(&self) -> WalletResult<u64> {
        let version = self.host.request(wire::NET_VERSION, json!([])).await?;
        wire::parse_chain_id(&version)
    }

    async fn granted_accounts(&self) -> WalletResult<Vec<Address>> {
        let accounts = self.host.request(wire::ETH_ACCOUNTS, json!([])).await?;
        wire::parse_accounts(&accounts)
    }

    fn persist(&self, session: &Session) {
        let record = InjectedRecord {
            accounts: session.accounts.clone(),
            chain_id: session.chain_id,
            saved_at: wire::unix_now(),
        };
        let saved = serde_json::to_value(&record)
            .map_err(|e| e.to_string())
            .and_then(|value| self.store.save(BackendKind::Injected, value).map_err(|e| e.to_string()));
        if let Err(e) = saved {
            tracing::warn!(error = %e, "Failed to persist injected session");
        }
    }
}

/// Normalize one raw host event and fan it out.
fn forward_host_event(hub: &EventHub, event: HostEvent) {
    let Some(kind) = EventKind::from_wire(&event.name) else {
        tracing::debug!(event = %event.name, "Ignoring host wallet event");
        return;
    };

    let normalized = match kind {
        EventKind::AccountsChanged => wire::parse_accounts(&event.payload).map(ProviderEvent::AccountsChanged),
        EventKind::ChainChanged => wire::parse_chain_id(&event.payload).map(ProviderEvent::ChainChanged),
        EventKind::Disconnected => Ok(ProviderEvent::Disconnected {
            reason: event.payload.get("message").and_then(Value::as_str).map(str::to_owned),
        }),
        EventKind::SessionUpdated => {
            let accounts = wire::parse_accounts(&event.payload["accounts"]);
            let chain_id = wire::parse_chain_id(&event.payload["chainId"]);
            accounts.and_then(|accounts| chain_id.map(|chain_id| ProviderEvent::SessionUpdated { accounts, chain_id }))
        }
        EventKind::TransportLost | EventKind::DisplayUri => return,
    };

    match normalized {
        Ok(event) => hub.emit(&event),
        Err(e) => tracing::warn!(event = %event.name, error = %e, "Malformed host wallet event"),
    }
}

#[async_trait]
impl ProviderAdapter for InjectedAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Injected
    }

    fn has_push_events(&self) -> bool {
        self.push_events
    }

    async fn connect(&self) -> WalletResult<Session> {
        self.ensure_forwarding();

        let accounts = match self.host.request(wire::ETH_REQUEST_ACCOUNTS, json!([])).await {
            Ok(value) => wire::parse_accounts(&value)?,
            Err(e) if e.kind() == ErrorKind::UserRejected => {
                tracing::info!(error = %e, "Account permission declined");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let chain_id = self.chain_id().await?;
        let session = Session::new(BackendKind::Injected, accounts, chain_id);

        if session.connected {
            self.persist(&session);
            tracing::info!(accounts = session.accounts.len(), chain_id, "Injected wallet connected");
        }
        Ok(session)
    }

    async fn disconnect(&self) -> WalletResult<()> {
        self.stop_forwarding();
        self.store
            .clear(BackendKind::Injected)
            .map_err(|e| WalletError::ProviderUnavailable(format!("failed to clear session record: {e}")))?;
        tracing::debug!("Injected wallet session released");
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> WalletResult<Value> {
        tracing::debug!(method, "Injected wallet request");
        self.host.request(method, params).await
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        self.hub.subscribe(kind, handler)
    }

    async fn resume(&self) -> WalletResult<Option<Session>> {
        let Some(raw) = self
            .store
            .load(BackendKind::Injected)
            .map_err(|e| WalletError::SessionExpired(e.to_string()))?
        else {
            return Ok(None);
        };

        let record: InjectedRecord = serde_json::from_value(raw)
            .map_err(|e| WalletError::SessionExpired(format!("unreadable injected record: {e}")))?;
        if self.ttl_secs > 0 && wire::unix_now().saturating_sub(record.saved_at) > self.ttl_secs {
            return Err(WalletError::SessionExpired("injected record is older than the session ttl".into()));
        }

        // Checks existing permission without prompting the user.
        let accounts = self.granted_accounts().await?;
        if accounts.is_empty() {
            return Err(WalletError::SessionExpired("host wallet no longer grants any account".into()));
        }

        self.ensure_forwarding();
        let session = Session::new(BackendKind::Injected, accounts, self.chain_id().await?);
        self.persist(&session);
        Ok(Some(session))
    }

    async fn reconnect(&self) -> WalletResult<Session> {
        self.ensure_forwarding();
        let accounts = self.granted_accounts().await?;
        Ok(Session::new(BackendKind::Injected, accounts, self.chain_id().await?))
    }
}

impl Drop for InjectedAdapter {
    fn drop(&mut self) {
        self.stop_forwarding();
    }
}
