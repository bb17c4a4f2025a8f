//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the session store, host wallet client and relay connector from config
//! - Assemble manager, tracker, relay and dispatcher around one notifier
//! - Restore a persisted session, then serve the UI boundary
//!
//! # Design Decisions
//! - Fail fast on bad backend settings; never on a bad persisted session
//! - Listeners start last (commands only once the core is ready)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{ConfigError, SentryConfig};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::provider::{InjectedAdapter, ProviderAdapter, RemoteSessionAdapter, RpcHostWallet, WalletError, WsRelayConnector};
use crate::relay::TransactionRelay;
use crate::session::{Backends, ConnectionManager, FileSessionStore, MemorySessionStore, SessionStore};
use crate::tracker::WalletStateTracker;
use crate::ui::{Dispatcher, Notifier, UiServer};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Backend setup failed: {0}")]
    Backend(#[from] WalletError),

    #[error("Failed to bind UI listener on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("UI server error: {0}")]
    Server(#[from] std::io::Error),
}

/// The assembled wallet connectivity core.
pub struct WalletSentry {
    config: SentryConfig,
    notifier: Notifier,
    manager: ConnectionManager,
    relay: TransactionRelay,
    dispatcher: Dispatcher,
}

impl WalletSentry {
    /// Build every backend the configuration enables.
    pub fn from_config(config: SentryConfig) -> Result<Self, StartupError> {
        let store: Arc<dyn SessionStore> = match &config.session.store_path {
            Some(path) => Arc::new(FileSessionStore::new(path)),
            None => Arc::new(MemorySessionStore::new()),
        };
        let ttl = config.session.ttl_secs;

        let injected = match &config.backend.injected_rpc_url {
            Some(url) => {
                let host = RpcHostWallet::new(url, config.backend.request_timeout_secs)?;
                let adapter: Arc<dyn ProviderAdapter> = Arc::new(InjectedAdapter::new(Arc::new(host), store.clone(), ttl));
                Some(adapter)
            }
            None => None,
        };

        let remote = if config.remote.enabled {
            let connector = WsRelayConnector::new(&config.remote.bridge_url)?;
            let adapter: Arc<dyn ProviderAdapter> =
                Arc::new(RemoteSessionAdapter::new(Arc::new(connector), store.clone(), &config.remote, ttl));
            Some(adapter)
        } else {
            None
        };

        tracing::info!(
            injected = injected.is_some(),
            remote = remote.is_some(),
            preferred = ?config.backend.preferred,
            "Wallet backends configured"
        );

        let backends = Backends {
            injected,
            remote,
            preferred: config.backend.preferred,
        };
        Ok(Self::assemble(config, backends, store))
    }

    /// Assemble the core around caller-provided adapters and store.
    pub fn assemble(config: SentryConfig, backends: Backends, store: Arc<dyn SessionStore>) -> Self {
        let notifier = Notifier::new(config.ui.notification_capacity);
        let tracker = WalletStateTracker::new(notifier.clone(), Duration::from_millis(config.tracker.poll_interval_ms));
        let manager = ConnectionManager::new(backends, store, tracker, notifier.clone(), config.reconnect.clone());
        let relay = TransactionRelay::new(manager.clone(), notifier.clone(), &config.relay);
        let dispatcher = Dispatcher::new(manager.clone(), relay.clone(), notifier.clone());

        Self {
            config,
            notifier,
            manager,
            relay,
            dispatcher,
        }
    }

    pub fn config(&self) -> &SentryConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn relay(&self) -> &TransactionRelay {
        &self.relay
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn ui_server(&self) -> UiServer {
        UiServer::new(self.dispatcher.clone(), self.manager.clone(), self.notifier.clone())
    }

    /// Restore any persisted session and serve the UI until `shutdown` fires.
    ///
    /// Sessions stay persisted across a shutdown so the next start can resume them.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let observability = &self.config.observability;
        if observability.metrics_enabled {
            match observability.metrics_address.parse::<SocketAddr>() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(e) => tracing::error!(
                    metrics_address = %observability.metrics_address,
                    error = %e,
                    "Failed to parse metrics address"
                ),
            }
        }

        let address = self.config.ui.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;

        match self.manager.restore().await {
            Some(session) => tracing::info!(backend = %session.backend, chain_id = session.chain_id, "Session restored"),
            None => tracing::info!("No session to restore"),
        }

        self.ui_server().run(listener, shutdown.subscribe()).await?;
        Ok(())
    }
}
