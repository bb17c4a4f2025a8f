//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sentry.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::provider::types::BackendKind;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SentryConfig {
    /// Backend selection and the injected host wallet.
    pub backend: BackendConfig,

    /// Remote bridge relay settings.
    pub remote: RemoteConfig,

    /// Wallet state tracking.
    pub tracker: TrackerConfig,

    /// Transaction relay settings.
    pub relay: RelayConfig,

    /// Remote transport re-establishment.
    pub reconnect: ReconnectConfig,

    /// Session persistence.
    pub session: SessionConfig,

    /// UI boundary listener.
    pub ui: UiConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend used when a connect command names none.
    pub preferred: Option<BackendKind>,

    /// JSON-RPC endpoint of the injected host wallet. Absent means no host wallet.
    pub injected_rpc_url: Option<String>,

    /// Timeout for host wallet reads. Approval prompts are not bounded by it.
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            preferred: None,
            injected_rpc_url: None,
            request_timeout_secs: 30,
        }
    }
}

/// Metadata announced to a remote wallet during pairing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientMeta {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

impl Default for ClientMeta {
    fn default() -> Self {
        Self {
            name: "wallet-sentry".to_string(),
            description: "Wallet connectivity core".to_string(),
            url: "http://localhost".to_string(),
            icons: Vec::new(),
        }
    }
}

/// Remote bridge relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Enable the remote backend.
    pub enabled: bool,

    /// Bridge URL (http(s) form, advertised in pairing URIs).
    pub bridge_url: String,

    /// Chain requested during pairing.
    pub chain_id: Option<u64>,

    /// Give up on an unanswered pairing after this many seconds (0 = wait forever).
    pub handshake_timeout_secs: u64,

    pub client_meta: ClientMeta,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bridge_url: "https://bridge.walletconnect.org".to_string(),
            chain_id: None,
            handshake_timeout_secs: 0,
            client_meta: ClientMeta::default(),
        }
    }
}

/// Wallet state tracker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Poll interval for backends without push events.
    pub poll_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 500 }
    }
}

/// Transaction relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Resolve a submission that got no answer after this many seconds (0 = never).
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

/// Reconnect policy after a remote transport drop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Session persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// JSON file holding persisted sessions. Absent keeps sessions in memory only.
    pub store_path: Option<String>,

    /// Maximum age of a persisted session that may be resumed (0 = unlimited).
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: Some("wallet-sentry-session.json".to_string()),
            ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// UI boundary listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UiConfig {
    /// Bind address for `/ws` and `/health`.
    pub bind_address: String,

    /// Notifications buffered per slow client before it lags.
    pub notification_capacity: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8645".to_string(),
            notification_capacity: 256,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
