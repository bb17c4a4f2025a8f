//! Shared mocks for integration tests: a host wallet and an in-memory bridge relay.

#![allow(dead_code)]

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use wallet_sentry::config::SentryConfig;
use wallet_sentry::provider::relay::{FrameKind, RelayChannel, RelayConnector, RelayFrame};
use wallet_sentry::provider::{
    BackendKind, HostEvent, HostWallet, InjectedAdapter, ProviderAdapter, RemoteSessionAdapter, WalletError, WalletResult,
};
use wallet_sentry::session::{Backends, MemorySessionStore, SessionStore};
use wallet_sentry::ui::NotificationReceiver;
use wallet_sentry::{Notification, WalletSentry};

pub const ONE_ETHER_HEX: &str = "0xde0b6b3a7640000";
pub const ONE_ETHER_WEI: &str = "1000000000000000000";
pub const BRIDGE: &str = "https://bridge.test";

pub fn account(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

/// Config tuned for fast tests: in-memory sessions, short intervals.
pub fn test_config() -> SentryConfig {
    let mut config = SentryConfig::default();
    config.session.store_path = None;
    config.tracker.poll_interval_ms = 20;
    config.reconnect.max_attempts = 3;
    config.reconnect.base_delay_ms = 10;
    config.reconnect.max_delay_ms = 40;
    config.relay.timeout_secs = 5;
    config.remote.bridge_url = BRIDGE.to_string();
    config.remote.chain_id = Some(100);
    config
}

/// Wait for the first notification matching `pred`, skipping others.
pub async fn wait_for<F>(rx: &mut NotificationReceiver, mut pred: F) -> Notification
where
    F: FnMut(&Notification) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(notification) if pred(&notification) => return notification,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("notifier closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for notification")
}

/// Everything published within `window`.
pub async fn drain_for(rx: &mut NotificationReceiver, window: Duration) -> Vec<Notification> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(window, async {
        while let Ok(notification) = rx.recv().await {
            seen.push(notification);
        }
    })
    .await;
    seen
}

pub fn wallet_states(notifications: &[Notification]) -> Vec<&wallet_sentry::WalletState> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::WalletState(state) => Some(state),
            _ => None,
        })
        .collect()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ----------------------------------------------------------------------------
// Host wallet
// ----------------------------------------------------------------------------

struct HostState {
    accounts: Vec<Address>,
    chain_id: u64,
    balance: String,
    grant: bool,
    granted: bool,
    tx_outcomes: VecDeque<WalletResult<Value>>,
    tx_delay: Duration,
    failing: Vec<(String, i64)>,
}

/// Scriptable injected wallet.
pub struct MockHost {
    state: Mutex<HostState>,
    events: Option<broadcast::Sender<HostEvent>>,
    calls: Mutex<Vec<(String, Value)>>,
    tx_counter: AtomicU64,
}

impl MockHost {
    /// Wallet without a push channel; the tracker has to poll it.
    pub fn polling(accounts: Vec<Address>, chain_id: u64) -> Arc<Self> {
        Arc::new(Self::build(accounts, chain_id, None))
    }

    /// Wallet that pushes accountsChanged / chainChanged / disconnect.
    pub fn pushing(accounts: Vec<Address>, chain_id: u64) -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(Self::build(accounts, chain_id, Some(tx)))
    }

    fn build(accounts: Vec<Address>, chain_id: u64, events: Option<broadcast::Sender<HostEvent>>) -> Self {
        Self {
            state: Mutex::new(HostState {
                accounts,
                chain_id,
                balance: ONE_ETHER_HEX.to_string(),
                grant: true,
                granted: false,
                tx_outcomes: VecDeque::new(),
                tx_delay: Duration::ZERO,
                failing: Vec::new(),
            }),
            events,
            calls: Mutex::new(Vec::new()),
            tx_counter: AtomicU64::new(0),
        }
    }

    /// Decline the next permission prompts with EIP-1193 code 4001.
    pub fn reject_permission(&self) {
        self.state.lock().unwrap().grant = false;
    }

    /// Pretend permission was granted in an earlier run.
    pub fn pre_grant(&self) {
        self.state.lock().unwrap().granted = true;
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().unwrap().accounts = accounts.clone();
        self.push("accountsChanged", json!(accounts));
    }

    pub fn set_chain(&self, chain_id: u64) {
        self.state.lock().unwrap().chain_id = chain_id;
        self.push("chainChanged", json!(format!("0x{chain_id:x}")));
    }

    pub fn emit_disconnect(&self) {
        self.push("disconnect", json!({"code": 4900, "message": "wallet locked"}));
    }

    /// Queue the outcome of the next `eth_sendTransaction`.
    pub fn script_tx(&self, outcome: WalletResult<Value>) {
        self.state.lock().unwrap().tx_outcomes.push_back(outcome);
    }

    pub fn set_tx_delay(&self, delay: Duration) {
        self.state.lock().unwrap().tx_delay = delay;
    }

    /// Make every call to `method` fail with `code`.
    pub fn fail_method(&self, method: &str, code: i64) {
        self.state.lock().unwrap().failing.push((method.to_string(), code));
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(m, _)| m == method).count()
    }

    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
    }

    fn push(&self, name: &str, payload: Value) {
        if let Some(events) = &self.events {
            let _ = events.send(HostEvent::new(name, payload));
        }
    }
}

#[async_trait]
impl HostWallet for MockHost {
    async fn request(&self, method: &str, params: Value) -> WalletResult<Value> {
        self.calls.lock().unwrap().push((method.to_string(), params.clone()));

        if method == "eth_sendTransaction" {
            let (delay, scripted) = {
                let mut state = self.state.lock().unwrap();
                (state.tx_delay, state.tx_outcomes.pop_front())
            };
            tokio::time::sleep(delay).await;
            return scripted.unwrap_or_else(|| {
                let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!(format!("0x{n:064x}")))
            });
        }

        let mut state = self.state.lock().unwrap();
        if let Some((_, code)) = state.failing.iter().find(|(m, _)| m == method) {
            return Err(WalletError::from_rpc(*code, format!("{method} failed")));
        }
        match method {
            "eth_requestAccounts" => {
                if !state.grant {
                    return Err(WalletError::from_rpc(4001, "User rejected the request."));
                }
                state.granted = true;
                Ok(json!(state.accounts))
            }
            "eth_accounts" => Ok(if state.granted { json!(state.accounts) } else { json!([]) }),
            "net_version" => Ok(json!(state.chain_id.to_string())),
            "eth_getBalance" => Ok(json!(state.balance)),
            "wallet_addEthereumChain" => Ok(Value::Null),
            _ => Err(WalletError::from_rpc(-32601, "method not found")),
        }
    }

    fn events(&self) -> Option<broadcast::Receiver<HostEvent>> {
        self.events.as_ref().map(|tx| tx.subscribe())
    }
}

// ----------------------------------------------------------------------------
// Bridge relay with a scripted wallet peer
// ----------------------------------------------------------------------------

pub const PEER_ID: &str = "mock-wallet-peer";

struct PeerScript {
    respond: bool,
    approve: bool,
    accounts: Vec<Address>,
    chain_id: u64,
    tx_hash: String,
    tx_delay: Duration,
}

struct Link {
    client_topic: Option<String>,
    to_client: Option<mpsc::UnboundedSender<RelayFrame>>,
}

struct RelayState {
    peer: PeerScript,
    links: Vec<Link>,
    fail_open: bool,
    opens: usize,
    pairing_requests: usize,
    peer_saw_disconnect: bool,
    forwarded: Vec<String>,
}

/// In-memory bridge whose far side is a scripted wallet.
#[derive(Clone)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState {
                peer: PeerScript {
                    respond: true,
                    approve: true,
                    accounts,
                    chain_id,
                    tx_hash: "0xabc".to_string(),
                    tx_delay: Duration::ZERO,
                },
                links: Vec::new(),
                fail_open: false,
                opens: 0,
                pairing_requests: 0,
                peer_saw_disconnect: false,
                forwarded: Vec::new(),
            })),
        }
    }

    /// The wallet never answers pairing requests.
    pub fn silent_peer(&self) {
        self.state.lock().unwrap().peer.respond = false;
    }

    pub fn decline_pairing(&self) {
        self.state.lock().unwrap().peer.approve = false;
    }

    /// The wallet takes `delay` to answer `eth_sendTransaction`.
    pub fn set_tx_delay(&self, delay: Duration) {
        self.state.lock().unwrap().peer.tx_delay = delay;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn pairing_requests(&self) -> usize {
        self.state.lock().unwrap().pairing_requests
    }

    pub fn peer_saw_disconnect(&self) -> bool {
        self.state.lock().unwrap().peer_saw_disconnect
    }

    /// Methods the peer received besides the pairing handshake.
    pub fn forwarded(&self) -> Vec<String> {
        self.state.lock().unwrap().forwarded.clone()
    }

    /// Cut the live link as if the bridge went away.
    pub fn drop_link(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(link) = state.links.last_mut() {
            link.to_client = None;
        }
    }

    /// Wallet-initiated `wc_sessionUpdate`.
    pub fn push_session_update(&self, approved: bool, accounts: Vec<Address>, chain_id: u64) {
        let payload = json!({
            "id": 1,
            "jsonrpc": "2.0",
            "method": "wc_sessionUpdate",
            "params": [{"approved": approved, "accounts": accounts, "chainId": chain_id}],
        });
        let mut state = self.state.lock().unwrap();
        state.peer.accounts = accounts;
        state.peer.chain_id = chain_id;
        deliver(&state, state.links.len().saturating_sub(1), &payload);
    }
}

fn deliver(state: &RelayState, link: usize, payload: &Value) {
    let Some(link) = state.links.get(link) else {
        return;
    };
    if let (Some(topic), Some(tx)) = (&link.client_topic, &link.to_client) {
        let _ = tx.send(RelayFrame::publish(topic.clone(), payload.to_string(), true));
    }
}

fn answer(state: &mut RelayState, request: &Value) -> Option<Value> {
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or_default().to_string();
    match method.as_str() {
        "wc_sessionRequest" => state.pairing_requests += 1,
        "wc_sessionUpdate" => {
            state.peer_saw_disconnect = true;
            return None;
        }
        _ => state.forwarded.push(method.clone()),
    }

    let peer = &state.peer;
    let reply = match method.as_str() {
        "wc_sessionRequest" => {
            if !peer.respond {
                return None;
            }
            json!({
                "id": id,
                "jsonrpc": "2.0",
                "result": {
                    "approved": peer.approve,
                    "accounts": if peer.approve { json!(peer.accounts) } else { Value::Null },
                    "chainId": peer.chain_id,
                    "peerId": PEER_ID,
                    "peerMeta": {"name": "Mock Wallet"},
                },
            })
        }
        "eth_sendTransaction" => json!({"id": id, "jsonrpc": "2.0", "result": peer.tx_hash}),
        "eth_getBalance" => json!({"id": id, "jsonrpc": "2.0", "result": ONE_ETHER_HEX}),
        "eth_accounts" => json!({"id": id, "jsonrpc": "2.0", "result": peer.accounts}),
        "net_version" => json!({"id": id, "jsonrpc": "2.0", "result": peer.chain_id.to_string()}),
        _ => json!({"id": id, "jsonrpc": "2.0", "error": {"code": -32601, "message": "method not found"}}),
    };
    Some(reply)
}

#[async_trait]
impl RelayConnector for MemoryRelay {
    fn bridge_url(&self) -> &str {
        BRIDGE
    }

    async fn open(&self) -> WalletResult<RelayChannel> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<RelayFrame>();

        let index = {
            let mut state = self.state.lock().unwrap();
            if state.fail_open {
                return Err(WalletError::Transport("bridge unreachable".into()));
            }
            state.opens += 1;
            state.links.push(Link {
                client_topic: None,
                to_client: Some(in_tx),
            });
            state.links.len() - 1
        };

        let shared = self.state.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let mut state = shared.lock().unwrap();
                match frame.kind {
                    FrameKind::Sub => state.links[index].client_topic = Some(frame.topic),
                    FrameKind::Pub => {
                        let Ok(request) = serde_json::from_str::<Value>(&frame.payload) else {
                            continue;
                        };
                        let Some(reply) = answer(&mut state, &request) else {
                            continue;
                        };
                        let delay = state.peer.tx_delay;
                        if request["method"] == "eth_sendTransaction" && !delay.is_zero() {
                            let shared = shared.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                deliver(&shared.lock().unwrap(), index, &reply);
                            });
                        } else {
                            deliver(&state, index, &reply);
                        }
                    }
                    FrameKind::Ack => {}
                }
            }
        });

        Ok(RelayChannel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ----------------------------------------------------------------------------
// Assembly
// ----------------------------------------------------------------------------

pub struct Harness {
    pub sentry: WalletSentry,
    pub store: Arc<MemorySessionStore>,
}

impl Harness {
    pub fn subscribe(&self) -> NotificationReceiver {
        self.sentry.notifier().subscribe()
    }

    /// No persisted record for any backend.
    pub fn store_is_empty(&self) -> bool {
        [BackendKind::Injected, BackendKind::Remote]
            .into_iter()
            .all(|kind| self.store.load(kind).unwrap().is_none())
    }
}

pub fn injected_adapter(host: Arc<MockHost>, store: Arc<MemorySessionStore>, config: &SentryConfig) -> Arc<dyn ProviderAdapter> {
    Arc::new(InjectedAdapter::new(host, store, config.session.ttl_secs))
}

pub fn remote_adapter(relay: &MemoryRelay, store: Arc<MemorySessionStore>, config: &SentryConfig) -> Arc<dyn ProviderAdapter> {
    Arc::new(RemoteSessionAdapter::new(
        Arc::new(relay.clone()),
        store,
        &config.remote,
        config.session.ttl_secs,
    ))
}

/// Core with the given backends sharing one in-memory store.
pub fn harness(config: SentryConfig, host: Option<Arc<MockHost>>, relay: Option<&MemoryRelay>) -> Harness {
    harness_with_store(config, host, relay, Arc::new(MemorySessionStore::new()))
}

pub fn harness_with_store(
    config: SentryConfig,
    host: Option<Arc<MockHost>>,
    relay: Option<&MemoryRelay>,
    store: Arc<MemorySessionStore>,
) -> Harness {
    let backends = Backends {
        injected: host.map(|host| injected_adapter(host, store.clone(), &config)),
        remote: relay.map(|relay| remote_adapter(relay, store.clone(), &config)),
        preferred: config.backend.preferred,
    };
    let shared: Arc<dyn SessionStore> = store.clone();
    Harness {
        sentry: WalletSentry::assemble(config, backends, shared),
        store,
    }
}
