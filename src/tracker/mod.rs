//! Wallet state tracking.
//!
//! # Responsibilities
//! - Derive a normalized `WalletState` from adapter push events or polling
//! - Suppress emissions whose address and chain id match the previous one
//! - Emit a null state once when the wallet disconnects
//!
//! # Data Flow
//! ```text
//! push events ──▶ mpsc ──┐
//!                        ├──▶ single tracker task (arrival order)
//! poll ticks ────────────┘        → resolve {address, chain_id}   (one async composition)
//!                                 → dedup against last emission
//!                                 → eth_getBalance (only when emitting)
//!                                 → Notifier: wallet_state | wallet_error
//! ```
//!
//! # Design Decisions
//! - Failures are emitted as one `ErrorKind`, never papered over with default fields
//! - Dedup memory survives restarts so a re-connect to the same wallet is silent
//! - Every emission is checked against the run generation, so a halted run stays silent

use alloy::primitives::Address;
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::observability::metrics;
use crate::provider::types::{ErrorKind, WalletError, WalletResult};
use crate::provider::{wire, EventKind, ProviderAdapter, ProviderEvent, Subscription};
use crate::session::Session;
use crate::ui::{Notification, Notifier};

/// Normalized snapshot of the connected wallet.
///
/// Equality only considers `address` and `chain_id`; balance movements alone
/// are not state changes.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub address: Option<Address>,
    /// Decimal wei amount.
    pub balance_wei: String,
    pub chain_id: u64,
}

impl PartialEq for WalletState {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.chain_id == other.chain_id
    }
}

impl WalletState {
    /// State announced after a disconnect.
    pub fn disconnected() -> Self {
        Self {
            address: None,
            balance_wei: "0".to_string(),
            chain_id: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Identity {
    address: Option<Address>,
    chain_id: u64,
}

impl Identity {
    const DISCONNECTED: Identity = Identity {
        address: None,
        chain_id: 0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emission {
    State(Identity),
    Error(ErrorKind),
}

/// Remembers the last emission and admits only changes.
#[derive(Debug, Default)]
struct Deduplicator {
    last: Option<Emission>,
}

impl Deduplicator {
    fn would_emit(&self, next: &Emission) -> bool {
        self.last.as_ref() != Some(next)
    }

    fn admit(&mut self, next: Emission) -> bool {
        if !self.would_emit(&next) {
            return false;
        }
        self.last = Some(next);
        true
    }
}

/// What triggered an observation.
enum Source {
    Known(Identity),
    Accounts(Vec<Address>),
    Chain(u64),
    Poll,
}

#[derive(Default)]
struct TrackerState {
    dedup: Deduplicator,
    generation: u64,
    task: Option<JoinHandle<()>>,
    subscriptions: Vec<Subscription>,
}

struct TrackerInner {
    notifier: Notifier,
    poll_interval: Duration,
    state: Mutex<TrackerState>,
    latest: ArcSwapOption<WalletState>,
}

/// Observes the active adapter and publishes deduplicated wallet states.
#[derive(Clone)]
pub struct WalletStateTracker {
    inner: Arc<TrackerInner>,
}

impl WalletStateTracker {
    pub fn new(notifier: Notifier, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                notifier,
                poll_interval,
                state: Mutex::new(TrackerState::default()),
                latest: ArcSwapOption::empty(),
            }),
        }
    }

    /// Begin tracking `adapter`, replacing any previous run.
    ///
    /// The first observation uses the session's accounts and chain so no extra
    /// identity round trip is needed.
    pub fn start(&self, adapter: Arc<dyn ProviderAdapter>, session: &Session) {
        let push = adapter.has_push_events();
        let mut state = self.inner.lock();
        state.generation += 1;
        let generation = state.generation;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.subscriptions.clear();

        let events = if push {
            let (tx, rx) = mpsc::unbounded_channel();
            for kind in [
                EventKind::AccountsChanged,
                EventKind::ChainChanged,
                EventKind::SessionUpdated,
                EventKind::Disconnected,
            ] {
                let tx = tx.clone();
                state.subscriptions.push(adapter.subscribe(
                    kind,
                    Arc::new(move |event: &ProviderEvent| {
                        let _ = tx.send(event.clone());
                    }),
                ));
            }
            Some(rx)
        } else {
            None
        };

        let initial = Identity {
            address: session.primary_account(),
            chain_id: session.chain_id,
        };
        tracing::debug!(generation, push, backend = %adapter.kind(), "Wallet tracking started");
        let inner = self.inner.clone();
        state.task = Some(tokio::spawn(async move {
            inner.run(adapter, events, initial, generation).await;
        }));
    }

    /// Stop tracking. Emits the null state once if a run was active.
    pub fn halt(&self) {
        let was_tracking = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.subscriptions.clear();
            match state.task.take() {
                Some(task) => {
                    let running = !task.is_finished();
                    task.abort();
                    running
                }
                None => false,
            }
        };

        if was_tracking {
            tracing::debug!("Wallet tracking halted");
            self.inner.publish_disconnected(None);
        }
    }

    /// Last emitted state, `None` while disconnected.
    pub fn current(&self) -> Option<WalletState> {
        self.inner.latest.load_full().map(|state| (*state).clone())
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.lock().task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl TrackerInner {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        mut events: Option<mpsc::UnboundedReceiver<ProviderEvent>>,
        initial: Identity,
        generation: u64,
    ) {
        self.observe(adapter.as_ref(), Source::Known(initial), generation).await;

        let mut ticker = events.is_none().then(|| {
            let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let source = tokio::select! {
                event = next_event(&mut events) => match event {
                    Some(ProviderEvent::AccountsChanged(accounts)) => Source::Accounts(accounts),
                    Some(ProviderEvent::ChainChanged(chain_id)) => Source::Chain(chain_id),
                    Some(ProviderEvent::SessionUpdated { accounts, chain_id }) => Source::Known(Identity {
                        address: accounts.first().copied(),
                        chain_id,
                    }),
                    Some(ProviderEvent::Disconnected { .. }) => {
                        self.publish_disconnected(Some(generation));
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                },
                _ = next_tick(&mut ticker) => Source::Poll,
            };
            self.observe(adapter.as_ref(), source, generation).await;
        }
        tracing::debug!(generation, "Wallet tracking stopped");
    }

    /// Compose one observation and emit it if it differs from the last emission.
    async fn observe(&self, adapter: &dyn ProviderAdapter, source: Source, generation: u64) {
        let identity = match resolve_identity(adapter, source).await {
            Ok(identity) => identity,
            Err(e) => {
                self.publish_error(generation, e);
                return;
            }
        };

        {
            let state = self.lock();
            if state.generation != generation || !state.dedup.would_emit(&Emission::State(identity)) {
                return;
            }
        }

        match fetch_balance(adapter, identity.address).await {
            Ok(balance_wei) => self.publish_state(
                generation,
                WalletState {
                    address: identity.address,
                    balance_wei,
                    chain_id: identity.chain_id,
                },
            ),
            Err(e) => self.publish_error(generation, e),
        }
    }

    /// `generation` of `None` publishes regardless of the current run.
    fn admit(&self, generation: Option<u64>, emission: Emission) -> bool {
        let mut state = self.lock();
        if generation.is_some_and(|g| g != state.generation) {
            return false;
        }
        state.dedup.admit(emission)
    }

    fn publish_state(&self, generation: u64, wallet: WalletState) {
        let identity = Identity {
            address: wallet.address,
            chain_id: wallet.chain_id,
        };
        if !self.admit(Some(generation), Emission::State(identity)) {
            return;
        }
        tracing::info!(address = ?wallet.address, chain_id = wallet.chain_id, "Wallet state changed");
        metrics::record_wallet_emission("state");
        self.latest.store(Some(Arc::new(wallet.clone())));
        self.notifier.publish(Notification::WalletState(wallet));
    }

    fn publish_error(&self, generation: u64, error: WalletError) {
        if !self.admit(Some(generation), Emission::Error(error.kind())) {
            return;
        }
        tracing::warn!(error = %error, "Wallet observation failed");
        metrics::record_wallet_emission(error.kind().as_str());
        self.notifier.publish(Notification::WalletError {
            error: error.kind(),
            message: error.to_string(),
        });
    }

    fn publish_disconnected(&self, generation: Option<u64>) {
        if !self.admit(generation, Emission::State(Identity::DISCONNECTED)) {
            return;
        }
        metrics::record_wallet_emission("disconnected");
        self.latest.store(None);
        self.notifier.publish(Notification::WalletState(WalletState::disconnected()));
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<ProviderEvent>>) -> Option<ProviderEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn resolve_identity(adapter: &dyn ProviderAdapter, source: Source) -> WalletResult<Identity> {
    match source {
        Source::Known(identity) => Ok(identity),
        Source::Accounts(accounts) => Ok(Identity {
            address: accounts.first().copied(),
            chain_id: read_chain_id(adapter).await?,
        }),
        Source::Chain(chain_id) => Ok(Identity {
            address: read_primary_account(adapter).await?,
            chain_id,
        }),
        Source::Poll => {
            let address = read_primary_account(adapter).await?;
            let chain_id = read_chain_id(adapter).await?;
            Ok(Identity { address, chain_id })
        }
    }
}

async fn read_primary_account(adapter: &dyn ProviderAdapter) -> WalletResult<Option<Address>> {
    let accounts = adapter.request(wire::ETH_ACCOUNTS, json!([])).await?;
    Ok(wire::parse_accounts(&accounts)?.first().copied())
}

async fn read_chain_id(adapter: &dyn ProviderAdapter) -> WalletResult<u64> {
    let version = adapter.request(wire::NET_VERSION, json!([])).await?;
    wire::parse_chain_id(&version)
}

async fn fetch_balance(adapter: &dyn ProviderAdapter, address: Option<Address>) -> WalletResult<String> {
    let Some(address) = address else {
        return Ok("0".to_string());
    };
    let balance = adapter
        .request(wire::ETH_GET_BALANCE, json!([address, "latest"]))
        .await?;
    Ok(wire::parse_quantity(&balance)?.to_string())
}
