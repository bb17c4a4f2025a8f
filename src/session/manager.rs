//! Connection manager: owns the active adapter and the live Session.

use alloy::primitives::{Address, U256};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};

use crate::config::schema::ReconnectConfig;
use crate::observability::metrics;
use crate::provider::types::{BackendKind, ChainParams, WalletError, WalletResult};
use crate::provider::{wire, EventKind, ProviderAdapter, ProviderEvent, Subscription};
use crate::resilience::backoff::ReconnectSchedule;
use crate::session::{ConnectionStatus, Session, SessionStore};
use crate::tracker::WalletStateTracker;
use crate::ui::{Notification, Notifier};

const LIFECYCLE_EVENTS: [EventKind; 6] = [
    EventKind::AccountsChanged,
    EventKind::ChainChanged,
    EventKind::SessionUpdated,
    EventKind::Disconnected,
    EventKind::TransportLost,
    EventKind::DisplayUri,
];

/// Adapters available to the manager.
#[derive(Clone, Default)]
pub struct Backends {
    pub injected: Option<Arc<dyn ProviderAdapter>>,
    pub remote: Option<Arc<dyn ProviderAdapter>>,
    /// Backend chosen when a connect names none.
    pub preferred: Option<BackendKind>,
}

/// An adapter the manager listens to, before or after its session is established.
struct Attached {
    adapter: Arc<dyn ProviderAdapter>,
    // Held only to keep the lifecycle handlers registered.
    _subscriptions: Vec<Subscription>,
}

struct Active {
    attached: Attached,
    session: Session,
}

#[derive(Default)]
struct ManagerState {
    // Bumped by every connect, restore and teardown; stale work compares against it.
    epoch: u64,
    connecting: Option<Attached>,
    active: Option<Active>,
}

struct ManagerInner {
    backends: Backends,
    store: Arc<dyn SessionStore>,
    tracker: WalletStateTracker,
    notifier: Notifier,
    reconnect: ReconnectConfig,
    state: Mutex<ManagerState>,
    status: watch::Sender<ConnectionStatus>,
}

/// Selects and owns exactly one active wallet adapter.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        backends: Backends,
        store: Arc<dyn SessionStore>,
        tracker: WalletStateTracker,
        notifier: Notifier,
        reconnect: ReconnectConfig,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(ManagerInner {
                backends,
                store,
                tracker,
                notifier,
                reconnect,
                state: Mutex::new(ManagerState::default()),
                status,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Snapshot of the live session.
    pub fn session(&self) -> Option<Session> {
        self.lock().active.as_ref().map(|active| active.session.clone())
    }

    /// Backend of the live or pending session.
    pub fn backend(&self) -> Option<BackendKind> {
        let state = self.lock();
        state
            .active
            .as_ref()
            .map(|active| &active.attached)
            .or(state.connecting.as_ref())
            .map(|attached| attached.adapter.kind())
    }

    /// Active adapter together with a session snapshot.
    pub fn active(&self) -> Option<(Arc<dyn ProviderAdapter>, Session)> {
        self.lock()
            .active
            .as_ref()
            .map(|active| (active.attached.adapter.clone(), active.session.clone()))
    }

    pub fn tracker(&self) -> &WalletStateTracker {
        &self.inner.tracker
    }

    /// Injected when present and preferred (or nothing is preferred), otherwise remote.
    pub fn select_backend(&self, preferred: Option<BackendKind>) -> WalletResult<Arc<dyn ProviderAdapter>> {
        let backends = &self.inner.backends;
        let preferred = preferred.or(backends.preferred);

        if preferred != Some(BackendKind::Remote) {
            if let Some(injected) = &backends.injected {
                return Ok(injected.clone());
            }
        }
        backends
            .remote
            .clone()
            .ok_or_else(|| WalletError::ProviderUnavailable(match preferred {
                Some(BackendKind::Remote) => "remote backend is not configured".to_string(),
                _ => "no wallet backend available".to_string(),
            }))
    }

    /// Establish a session on the selected backend.
    ///
    /// A live remote session makes this a no-op; a live injected session is
    /// re-prompted. Switching backends tears the current one down first. A
    /// rejected prompt resolves to an empty-accounts session.
    pub async fn connect(&self, preferred: Option<BackendKind>) -> WalletResult<Session> {
        let adapter = self.select_backend(preferred)?;
        let kind = adapter.kind();

        let (previous, abandoned) = {
            let mut state = self.lock();
            if let Some(active) = &state.active {
                if kind == BackendKind::Remote && active.attached.adapter.kind() == BackendKind::Remote {
                    tracing::debug!("Remote session already live");
                    return Ok(active.session.clone());
                }
            }
            (state.active.take(), state.connecting.take())
        };

        if let Some(abandoned) = abandoned {
            tracing::info!(backend = %abandoned.adapter.kind(), "Abandoning pending connection");
            self.release(&abandoned.adapter).await;
        }
        if let Some(previous) = previous {
            if previous.attached.adapter.kind() != kind {
                tracing::info!(from = %previous.attached.adapter.kind(), to = %kind, "Switching wallet backend");
                self.inner.tracker.halt();
                self.release(&previous.attached.adapter).await;
                self.set_status(ConnectionStatus::Disconnected, None);
            }
        }

        let epoch = self.attach(adapter.clone());
        self.set_status(ConnectionStatus::Connecting, Some(kind));
        tracing::info!(backend = %kind, "Connecting wallet");

        let outcome = adapter.connect().await;

        if !self.is_current(epoch) {
            tracing::info!(backend = %kind, "Connection attempt superseded");
            if matches!(&outcome, Ok(session) if session.connected) && self.backend().is_none() {
                self.release(&adapter).await;
            }
            return Err(WalletError::SessionExpired("connection attempt superseded".into()));
        }

        match outcome {
            Ok(session) if session.connected => {
                self.activate(epoch, session.clone());
                Ok(session)
            }
            Ok(session) => {
                tracing::info!(backend = %kind, "Wallet granted no account");
                self.teardown(epoch, None).await;
                Ok(session)
            }
            Err(e) => {
                self.teardown(epoch, Some(e.clone())).await;
                Err(e)
            }
        }
    }

    /// Explicit teardown. Clears every persisted record.
    pub async fn disconnect(&self) -> WalletResult<()> {
        let (active, connecting) = {
            let mut state = self.lock();
            state.epoch += 1;
            (state.active.take(), state.connecting.take())
        };

        self.inner.tracker.halt();
        for attached in active.map(|active| active.attached).into_iter().chain(connecting) {
            self.release(&attached.adapter).await;
        }
        for kind in [BackendKind::Injected, BackendKind::Remote] {
            if let Err(e) = self.inner.store.clear(kind) {
                tracing::error!(backend = %kind, error = %e, "Failed to clear persisted session");
            }
        }

        self.set_status(ConnectionStatus::Disconnected, None);
        tracing::info!("Wallet disconnected");
        Ok(())
    }

    /// Silently resume a persisted session, remote first.
    ///
    /// Never fails: an unusable record is cleared and the manager stays Disconnected.
    pub async fn restore(&self) -> Option<Session> {
        let candidates = [self.inner.backends.remote.clone(), self.inner.backends.injected.clone()];
        for adapter in candidates.into_iter().flatten() {
            if let Some(session) = self.session() {
                return Some(session);
            }

            let kind = adapter.kind();
            let epoch = self.attach(adapter.clone());
            match adapter.resume().await {
                Ok(Some(session)) if session.connected && self.is_current(epoch) => {
                    tracing::info!(backend = %kind, accounts = session.accounts.len(), "Persisted session resumed");
                    self.activate(epoch, session.clone());
                    return Some(session);
                }
                Ok(_) => self.detach(epoch),
                Err(e) => {
                    tracing::warn!(backend = %kind, error = %e, "Discarding persisted session");
                    self.detach(epoch);
                    if let Err(e) = self.inner.store.clear(kind) {
                        tracing::error!(backend = %kind, error = %e, "Failed to clear persisted session");
                    }
                }
            }
        }

        self.set_status(ConnectionStatus::Disconnected, None);
        None
    }

    /// Ask the wallet to add (and usually switch to) a chain.
    pub async fn add_chain(&self, params: ChainParams) -> WalletResult<()> {
        let (adapter, _) = self.require_active()?;
        tracing::info!(chain_id = %params.chain_id, chain = %params.chain_name, "Requesting chain addition");
        adapter
            .request(wire::WALLET_ADD_ETHEREUM_CHAIN, json!([params]))
            .await?;
        Ok(())
    }

    /// Current balance of `address`, independent of wallet state tracking.
    pub async fn refresh_balance(&self, address: Address) -> WalletResult<U256> {
        let (adapter, _) = self.require_active()?;
        let balance = adapter
            .request(wire::ETH_GET_BALANCE, json!([address, "latest"]))
            .await?;
        wire::parse_quantity(&balance)
    }

    fn require_active(&self) -> WalletResult<(Arc<dyn ProviderAdapter>, Session)> {
        self.active()
            .ok_or_else(|| WalletError::ProviderUnavailable("no active wallet session".into()))
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    /// Register lifecycle handlers on `adapter` and mark it as connecting.
    fn attach(&self, adapter: Arc<dyn ProviderAdapter>) -> u64 {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = LIFECYCLE_EVENTS
            .iter()
            .map(|kind| {
                let tx = tx.clone();
                adapter.subscribe(
                    *kind,
                    Arc::new(move |event: &ProviderEvent| {
                        let _ = tx.send(event.clone());
                    }),
                )
            })
            .collect();

        let epoch = {
            let mut state = self.lock();
            state.epoch += 1;
            state.connecting = Some(Attached {
                adapter,
                _subscriptions: subscriptions,
            });
            state.epoch
        };

        tokio::spawn(lifecycle(Arc::downgrade(&self.inner), epoch, rx));
        epoch
    }

    fn detach(&self, epoch: u64) {
        let mut state = self.lock();
        if state.epoch == epoch {
            state.connecting = None;
        }
    }

    fn activate(&self, epoch: u64, session: Session) {
        let adapter = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return;
            }
            let Some(attached) = state.connecting.take() else {
                return;
            };
            let adapter = attached.adapter.clone();
            state.active = Some(Active {
                attached,
                session: session.clone(),
            });
            adapter
        };

        self.inner.tracker.start(adapter.clone(), &session);
        self.set_status(ConnectionStatus::Connected, Some(adapter.kind()));
        tracing::info!(backend = %adapter.kind(), chain_id = session.chain_id, "Wallet connected");
    }

    /// Tear down whatever belongs to `epoch`. `cause` is reported to the UI.
    async fn teardown(&self, epoch: u64, cause: Option<WalletError>) {
        let (active, connecting) = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return;
            }
            state.epoch += 1;
            (state.active.take(), state.connecting.take())
        };

        self.inner.tracker.halt();
        for attached in active.map(|active| active.attached).into_iter().chain(connecting) {
            self.release(&attached.adapter).await;
        }

        if let Some(error) = cause {
            if error.kind().is_recoverable() {
                tracing::warn!(error = %error, "Wallet session lost");
            } else {
                tracing::error!(error = %error, "Wallet session failed");
            }
            self.inner.notifier.publish(Notification::WalletError {
                error: error.kind(),
                message: error.to_string(),
            });
        }
        self.set_status(ConnectionStatus::Disconnected, None);
    }

    async fn release(&self, adapter: &Arc<dyn ProviderAdapter>) {
        if let Err(e) = adapter.disconnect().await {
            tracing::error!(backend = %adapter.kind(), error = %e, "Adapter teardown failed");
        }
    }

    fn set_status(&self, status: ConnectionStatus, backend: Option<BackendKind>) {
        let changed = self.inner.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if !changed {
            return;
        }

        tracing::debug!(?status, backend = ?backend, "Connection status changed");
        metrics::record_connection_status(status);
        self.inner
            .notifier
            .publish(Notification::ConnectionStatus { status, backend });
    }

    /// Apply a provider-reported change to the session.
    fn update_session(&self, epoch: u64, apply: impl FnOnce(&mut Session)) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            return true;
        }
        let Some(active) = state.active.as_mut() else {
            return true;
        };
        apply(&mut active.session);
        active.session.connected = !active.session.accounts.is_empty();
        tracing::debug!(accounts = active.session.accounts.len(), chain_id = active.session.chain_id, "Session updated");
        active.session.connected
    }

    async fn handle_event(&self, epoch: u64, event: ProviderEvent) {
        let still_connected = match event {
            ProviderEvent::DisplayUri(uri) => {
                if self.is_current(epoch) {
                    self.inner.notifier.publish(Notification::PairingUri { uri });
                }
                true
            }
            ProviderEvent::AccountsChanged(accounts) => self.update_session(epoch, |s| s.accounts = accounts),
            ProviderEvent::ChainChanged(chain_id) => self.update_session(epoch, |s| s.chain_id = chain_id),
            ProviderEvent::SessionUpdated { accounts, chain_id } => self.update_session(epoch, |s| {
                s.accounts = accounts;
                s.chain_id = chain_id;
            }),
            ProviderEvent::Disconnected { reason } => {
                tracing::info!(reason = reason.as_deref().unwrap_or("none"), "Wallet ended the session");
                false
            }
            ProviderEvent::TransportLost(reason) => {
                self.recover(epoch, reason).await;
                true
            }
        };

        if !still_connected {
            self.teardown(epoch, None).await;
        }
    }

    /// Re-establish a dropped remote transport with bounded backoff.
    async fn recover(&self, epoch: u64, reason: String) {
        let adapter = {
            let state = self.lock();
            match (&state.active, state.epoch == epoch) {
                (Some(active), true) => active.attached.adapter.clone(),
                _ => return,
            }
        };

        tracing::warn!(reason = %reason, "Wallet transport lost, reconnecting");
        self.set_status(ConnectionStatus::Reconnecting, Some(adapter.kind()));

        let mut schedule = ReconnectSchedule::new(&self.inner.reconnect);
        for (attempt, delay) in schedule.by_ref() {
            tokio::time::sleep(delay).await;
            if !self.is_current(epoch) {
                return;
            }
            match adapter.reconnect().await {
                Ok(session) => {
                    let restored = self.update_session(epoch, |s| {
                        s.accounts = session.accounts;
                        s.chain_id = session.chain_id;
                    });
                    if !restored {
                        self.teardown(epoch, None).await;
                    } else if self.is_current(epoch) {
                        tracing::info!(attempt, "Wallet transport re-established");
                        self.set_status(ConnectionStatus::Connected, Some(adapter.kind()));
                    }
                    return;
                }
                Err(e) => tracing::warn!(attempt, error = %e, "Reconnect attempt failed"),
            }
        }

        let cause = WalletError::Transport(format!(
            "transport not re-established after {} attempts",
            schedule.attempts()
        ));
        self.teardown(epoch, Some(cause)).await;
    }
}

/// Processes one attachment's lifecycle events in arrival order.
async fn lifecycle(inner: Weak<ManagerInner>, epoch: u64, mut events: mpsc::UnboundedReceiver<ProviderEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        ConnectionManager { inner }.handle_event(epoch, event).await;
    }
    tracing::trace!(epoch, "Lifecycle listener finished");
}
