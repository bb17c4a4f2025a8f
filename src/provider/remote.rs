//! Remote session adapter over a bridge relay.
//!
//! # Responsibilities
//! - Pairing handshake (`wc_sessionRequest`) announced through a pairing URI
//! - JSON-RPC request/response correlation over relay topics
//! - Peer-initiated session updates and teardown (`wc_sessionUpdate`)
//! - Persisted session record for silent resume, transport re-establishment
//!
//! # Data Flow
//! ```text
//! connect():
//!     open relay link → sub(client_id)
//!     → DisplayUri(wc:{topic}@1?bridge=..) → pub(topic, wc_sessionRequest)
//!     ← pub(client_id, {approved, accounts, chainId, peerId, peerMeta})
//!     → record persisted
//!
//! request(method, params):
//!     pub(peer_id, {id, method, params}) ← pub(client_id, {id, result | error})
//!
//! disconnect():
//!     pub(peer_id, wc_sessionUpdate{approved: false}) → record cleared
//!     → link retired until requests already sent have their responses
//! ```

use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::schema::RemoteConfig;
use crate::observability::metrics;
use crate::provider::events::{EventHandler, EventHub, EventKind, ProviderEvent, Subscription};
use crate::provider::relay::{FrameKind, RelayConnector, RelayFrame};
use crate::provider::types::{BackendKind, ErrorKind, WalletError, WalletResult};
use crate::provider::{wire, ProviderAdapter};
use crate::session::{Session, SessionStore};

const SESSION_REQUEST: &str = "wc_sessionRequest";
const SESSION_UPDATE: &str = "wc_sessionUpdate";

/// Persisted remote session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteRecord {
    bridge: String,
    client_id: String,
    peer_id: String,
    handshake_topic: String,
    accounts: Vec<Address>,
    chain_id: u64,
    #[serde(default)]
    peer_meta: Option<Value>,
    saved_at: u64,
}

impl RemoteRecord {
    fn session(&self) -> Session {
        Session {
            backend: BackendKind::Remote,
            connected: true,
            accounts: self.accounts.clone(),
            chain_id: self.chain_id,
            peer_meta: self.peer_meta.clone(),
        }
    }
}

struct Link {
    outbound: mpsc::UnboundedSender<RelayFrame>,
    generation: u64,
}

#[derive(Default)]
struct RemoteState {
    link: Option<Link>,
    // Link of a closed session, kept open until its in-flight requests resolve.
    retired: Option<Link>,
    session: Option<RemoteRecord>,
    generation: u64,
}

/// A request awaiting its response on the link with `generation`.
struct Pending {
    generation: u64,
    tx: oneshot::Sender<WalletResult<Value>>,
}

type PendingMap = DashMap<u64, Pending>;

/// State shared with the relay reader task.
struct Shared {
    hub: EventHub,
    pending: PendingMap,
    state: Mutex<RemoteState>,
    store: Arc<dyn SessionStore>,
    last_id: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Millisecond timestamp scaled by 1000 plus jitter, strictly increasing.
    fn next_id(&self) -> u64 {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let candidate = millis.saturating_mul(1000) + fastrand::u64(..1000);
        let previous = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| Some(candidate.max(prev + 1)))
            .unwrap_or_default();
        candidate.max(previous + 1)
    }

    fn has_pending(&self, generation: u64) -> bool {
        self.pending.iter().any(|entry| entry.value().generation == generation)
    }

    /// Fail every request sent over the link with `generation`.
    fn fail_pending(&self, generation: u64, error: WalletError) {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| entry.value().generation == generation)
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.tx.send(Err(error.clone()));
            }
        }
    }

    /// Close the retired link once nothing is waiting on it.
    fn release_drained(&self) {
        let retired = {
            let mut state = self.state();
            match &state.retired {
                Some(link) if !self.has_pending(link.generation) => state.retired.take(),
                _ => None,
            }
        };
        if let Some(link) = retired {
            tracing::debug!(generation = link.generation, "Retired relay link drained");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().link.as_ref().map(|link| link.generation) == Some(generation)
    }

    fn save_record(&self, record: &RemoteRecord) {
        let saved = serde_json::to_value(record)
            .map_err(|e| e.to_string())
            .and_then(|value| self.store.save(BackendKind::Remote, value).map_err(|e| e.to_string()));
        if let Err(e) = saved {
            tracing::warn!(error = %e, "Failed to persist remote session");
        }
    }

    fn clear_record(&self) {
        if let Err(e) = self.store.clear(BackendKind::Remote) {
            tracing::warn!(error = %e, "Failed to clear remote session record");
        }
    }

    fn handle_frame(&self, generation: u64, frame: RelayFrame) {
        if frame.kind != FrameKind::Pub {
            return;
        }
        let payload: Value = match serde_json::from_str(&frame.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(topic = %frame.topic, error = %e, "Ignoring undecodable relay payload");
                return;
            }
        };

        if let Some(method) = payload.get("method").and_then(Value::as_str) {
            if self.is_current(generation) {
                self.handle_peer_call(generation, method, &payload["params"]);
            } else {
                tracing::debug!(method, generation, "Ignoring peer call on a retired link");
            }
            return;
        }

        let Some(id) = payload.get("id").and_then(Value::as_u64) else {
            tracing::debug!("Relay payload without id or method");
            return;
        };
        let result = match payload.get("error") {
            Some(error) => Err(WalletError::from_rpc(
                error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                error.get("message").and_then(Value::as_str).unwrap_or("unknown error"),
            )),
            None => Ok(payload.get("result").cloned().unwrap_or(Value::Null)),
        };

        match self.pending.remove(&id) {
            Some((_, pending)) => {
                let _ = pending.tx.send(result);
                self.release_drained();
            }
            None => tracing::debug!(id, "Response for unknown or abandoned request"),
        }
    }

    fn handle_peer_call(&self, generation: u64, method: &str, params: &Value) {
        if method != SESSION_UPDATE {
            tracing::debug!(method, "Ignoring peer call");
            return;
        }

        let update = &params[0];
        if !update.get("approved").and_then(Value::as_bool).unwrap_or(false) {
            let ended = {
                let mut state = self.state();
                state.link = None;
                state.session.take().is_some()
            };
            self.fail_pending(generation, WalletError::SessionExpired("session ended by wallet".into()));
            self.clear_record();
            if ended {
                tracing::info!("Remote wallet ended the session");
                self.hub.emit(&ProviderEvent::Disconnected {
                    reason: Some("session ended by wallet".into()),
                });
            }
            return;
        }

        let accounts = match wire::parse_accounts(&update["accounts"]) {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed session update");
                return;
            }
        };
        let updated = {
            let mut state = self.state();
            let Some(record) = state.session.as_mut() else {
                return;
            };
            record.accounts = accounts;
            if let Ok(chain_id) = wire::parse_chain_id(&update["chainId"]) {
                record.chain_id = chain_id;
            }
            record.saved_at = wire::unix_now();
            record.clone()
        };

        self.save_record(&updated);
        self.hub.emit(&ProviderEvent::SessionUpdated {
            accounts: updated.accounts,
            chain_id: updated.chain_id,
        });
    }

    fn link_closed(&self, generation: u64) {
        let live_session = {
            let mut state = self.state();
            if state.link.as_ref().map(|link| link.generation) == Some(generation) {
                state.link = None;
                state.session.is_some()
            } else {
                if state.retired.as_ref().map(|link| link.generation) == Some(generation) {
                    state.retired = None;
                }
                false
            }
        };

        self.fail_pending(generation, WalletError::Transport("relay link dropped".into()));
        if live_session {
            tracing::warn!(generation, "Relay transport lost");
            self.hub.emit(&ProviderEvent::TransportLost("relay link dropped".into()));
        }
    }
}

/// Removes an abandoned pending entry when the awaiting future is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.shared.pending.remove(&self.id).is_some() {
            self.shared.release_drained();
        }
    }
}

/// Adapter for wallets paired through a bridge relay.
pub struct RemoteSessionAdapter {
    connector: Arc<dyn RelayConnector>,
    shared: Arc<Shared>,
    client_meta: Value,
    chain_id: Option<u64>,
    handshake_timeout: Option<Duration>,
    ttl_secs: u64,
}

impl RemoteSessionAdapter {
    pub fn new(
        connector: Arc<dyn RelayConnector>,
        store: Arc<dyn SessionStore>,
        config: &RemoteConfig,
        ttl_secs: u64,
    ) -> Self {
        let client_meta = serde_json::to_value(&config.client_meta).unwrap_or(Value::Null);
        Self {
            connector,
            shared: Arc::new(Shared {
                hub: EventHub::new(),
                pending: DashMap::new(),
                state: Mutex::new(RemoteState::default()),
                store,
                last_id: AtomicU64::new(0),
            }),
            client_meta,
            chain_id: config.chain_id,
            handshake_timeout: (config.handshake_timeout_secs > 0)
                .then(|| Duration::from_secs(config.handshake_timeout_secs)),
            ttl_secs,
        }
    }

    /// Open a relay link listening on `client_id`. Replaces any previous link.
    async fn open_link(&self, client_id: &str) -> WalletResult<()> {
        let channel = self.connector.open().await?;
        channel
            .outbound
            .send(RelayFrame::subscribe(client_id))
            .map_err(|_| WalletError::Transport("relay closed during subscribe".into()))?;

        let generation = {
            let mut state = self.shared.state();
            state.generation += 1;
            state.link = Some(Link {
                outbound: channel.outbound,
                generation: state.generation,
            });
            state.generation
        };

        let shared = self.shared.clone();
        let mut inbound = channel.inbound;
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                shared.handle_frame(generation, frame);
            }
            shared.link_closed(generation);
        });
        Ok(())
    }

    fn close_link(&self) {
        let link = {
            let mut state = self.shared.state();
            state.session = None;
            state.link.take()
        };
        if let Some(link) = link {
            self.shared
                .fail_pending(link.generation, WalletError::Transport("relay link closed".into()));
        }
    }

    /// Publish a JSON-RPC call to `topic` and await the correlated response.
    async fn call(&self, topic: &str, method: &str, params: Value) -> WalletResult<Value> {
        let id = self.shared.next_id();
        let (tx, rx) = oneshot::channel();
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        let payload = json!({
            "id": id,
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        {
            let state = self.shared.state();
            let link = state
                .link
                .as_ref()
                .ok_or_else(|| WalletError::Transport("no relay link".into()))?;
            // Registered before publishing so a fast response cannot be missed.
            self.shared.pending.insert(
                id,
                Pending {
                    generation: link.generation,
                    tx,
                },
            );
            link.outbound
                .send(RelayFrame::publish(topic, payload.to_string(), false))
                .map_err(|_| WalletError::Transport("relay link closed".into()))?;
        }

        rx.await
            .unwrap_or_else(|_| Err(WalletError::Transport("relay closed before a response arrived".into())))
    }

    async fn handshake(&self, topic: &str, client_id: &str) -> WalletResult<Value> {
        let params = json!([{
            "peerId": client_id,
            "peerMeta": self.client_meta,
            "chainId": self.chain_id,
        }]);
        let pairing = self.call(topic, SESSION_REQUEST, params);

        match self.handshake_timeout {
            Some(limit) => timeout(limit, pairing).await.unwrap_or_else(|_| {
                Err(WalletError::SessionExpired(format!(
                    "pairing not approved within {} seconds",
                    limit.as_secs()
                )))
            }),
            None => pairing.await,
        }
    }
}

/// URI a wallet scans to join the handshake topic.
pub fn pairing_uri(topic: &str, bridge: &str) -> String {
    let bridge: String = url::form_urlencoded::byte_serialize(bridge.as_bytes()).collect();
    format!("wc:{topic}@1?bridge={bridge}")
}

#[async_trait]
impl ProviderAdapter for RemoteSessionAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn has_push_events(&self) -> bool {
        true
    }

    async fn connect(&self) -> WalletResult<Session> {
        {
            let state = self.shared.state();
            if let (Some(record), Some(_)) = (state.session.as_ref(), state.link.as_ref()) {
                return Ok(record.session());
            }
        }

        let client_id = Uuid::new_v4().to_string();
        let topic = Uuid::new_v4().to_string();
        self.open_link(&client_id).await?;

        let uri = pairing_uri(&topic, self.connector.bridge_url());
        tracing::info!(topic = %topic, "Awaiting remote wallet pairing");
        self.shared.hub.emit(&ProviderEvent::DisplayUri(uri));

        let fallback_chain = self.chain_id.unwrap_or_default();
        let response = match self.handshake(&topic, &client_id).await {
            Ok(response) => response,
            Err(e) if e.kind() == ErrorKind::UserRejected => {
                tracing::info!(error = %e, "Pairing rejected by wallet");
                self.close_link();
                return Ok(Session::new(BackendKind::Remote, Vec::new(), fallback_chain));
            }
            Err(e) => {
                self.close_link();
                return Err(e);
            }
        };

        if !response.get("approved").and_then(Value::as_bool).unwrap_or(false) {
            tracing::info!("Pairing declined by wallet");
            self.close_link();
            return Ok(Session::new(BackendKind::Remote, Vec::new(), fallback_chain));
        }

        let parsed = wire::parse_accounts(&response["accounts"]).and_then(|accounts| {
            let chain_id = wire::parse_chain_id(&response["chainId"])?;
            let peer_id = response
                .get("peerId")
                .and_then(Value::as_str)
                .ok_or_else(|| WalletError::Provider {
                    code: 0,
                    message: "pairing response without peerId".into(),
                })?;
            Ok((accounts, chain_id, peer_id.to_string()))
        });
        let (accounts, chain_id, peer_id) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                self.close_link();
                return Err(e);
            }
        };

        let record = RemoteRecord {
            bridge: self.connector.bridge_url().to_string(),
            client_id,
            peer_id,
            handshake_topic: topic,
            accounts,
            chain_id,
            peer_meta: response.get("peerMeta").cloned(),
            saved_at: wire::unix_now(),
        };
        if record.accounts.is_empty() {
            self.close_link();
            return Ok(Session::new(BackendKind::Remote, Vec::new(), chain_id));
        }

        self.shared.save_record(&record);
        self.shared.state().session = Some(record.clone());
        tracing::info!(peer = %record.peer_id, chain_id, "Remote wallet paired");
        Ok(record.session())
    }

    /// Ends the session at once. Requests already sent keep the link open
    /// until their responses arrive; they are not cancelled.
    async fn disconnect(&self) -> WalletResult<()> {
        let (link, record) = {
            let mut state = self.shared.state();
            (state.link.take(), state.session.take())
        };

        if let (Some(link), Some(record)) = (&link, &record) {
            let payload = json!({
                "id": self.shared.next_id(),
                "jsonrpc": "2.0",
                "method": SESSION_UPDATE,
                "params": [{"approved": false, "chainId": null, "networkId": null, "accounts": null}],
            });
            // Best effort: the peer may already be gone.
            let _ = link
                .outbound
                .send(RelayFrame::publish(&record.peer_id, payload.to_string(), false));
        }
        match (link, record) {
            (Some(link), Some(_)) => {
                let mut state = self.shared.state();
                if self.shared.has_pending(link.generation) {
                    tracing::debug!(generation = link.generation, "Relay link kept open for in-flight requests");
                    state.retired = Some(link);
                }
            }
            // Still pairing: nothing was submitted yet, abandon the handshake.
            (Some(link), None) => {
                self.shared
                    .fail_pending(link.generation, WalletError::SessionExpired("session closed".into()));
            }
            (None, _) => {}
        }

        self.shared
            .store
            .clear(BackendKind::Remote)
            .map_err(|e| WalletError::SessionExpired(format!("failed to clear session record: {e}")))?;
        tracing::info!("Remote session closed");
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> WalletResult<Value> {
        let peer_id = self
            .shared
            .state()
            .session
            .as_ref()
            .map(|record| record.peer_id.clone())
            .ok_or_else(|| WalletError::ProviderUnavailable("no remote session".into()))?;

        tracing::debug!(method, peer = %peer_id, "Remote wallet request");
        let outcome = self.call(&peer_id, method, params).await;
        metrics::record_rpc_request(method, outcome.is_ok());
        outcome
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        self.shared.hub.subscribe(kind, handler)
    }

    async fn resume(&self) -> WalletResult<Option<Session>> {
        let Some(raw) = self
            .shared
            .store
            .load(BackendKind::Remote)
            .map_err(|e| WalletError::SessionExpired(e.to_string()))?
        else {
            return Ok(None);
        };

        let record: RemoteRecord = serde_json::from_value(raw)
            .map_err(|e| WalletError::SessionExpired(format!("unreadable remote record: {e}")))?;
        if record.accounts.is_empty() {
            return Err(WalletError::SessionExpired("remote record has no accounts".into()));
        }
        if self.ttl_secs > 0 && wire::unix_now().saturating_sub(record.saved_at) > self.ttl_secs {
            return Err(WalletError::SessionExpired("remote record is older than the session ttl".into()));
        }
        if record.bridge != self.connector.bridge_url() {
            return Err(WalletError::SessionExpired(format!(
                "record was paired through bridge {}",
                record.bridge
            )));
        }

        self.open_link(&record.client_id).await?;
        self.shared.state().session = Some(record.clone());
        tracing::info!(peer = %record.peer_id, "Remote session resumed");
        Ok(Some(record.session()))
    }

    async fn reconnect(&self) -> WalletResult<Session> {
        let record = self
            .shared
            .state()
            .session
            .clone()
            .ok_or_else(|| WalletError::SessionExpired("no session to reconnect".into()))?;

        self.open_link(&record.client_id).await?;
        tracing::info!(peer = %record.peer_id, "Relay link re-established");
        Ok(record.session())
    }
}
