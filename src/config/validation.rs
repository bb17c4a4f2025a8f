//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, backoff bounds ordered)
//! - Check URLs and bind addresses parse
//! - Ensure at least one backend can be selected
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SentryConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::SentryConfig;
use crate::provider::types::BackendKind;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &'static str, raw: &str, schemes: &[&str]) {
    match Url::parse(raw) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{raw}': {e}"))),
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, raw: &str) {
    if raw.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{raw}'")));
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &SentryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(url) = &config.backend.injected_rpc_url {
        check_url(&mut errors, "backend.injected_rpc_url", url, &["http", "https"]);
    }
    if config.backend.request_timeout_secs == 0 {
        errors.push(ValidationError::new("backend.request_timeout_secs", "must be greater than 0"));
    }

    if config.remote.enabled {
        check_url(&mut errors, "remote.bridge_url", &config.remote.bridge_url, &["http", "https", "ws", "wss"]);
    }

    let injected = config.backend.injected_rpc_url.is_some();
    if !injected && !config.remote.enabled {
        errors.push(ValidationError::new("backend", "no wallet backend is configured"));
    }
    match config.backend.preferred {
        Some(BackendKind::Injected) if !injected => errors.push(ValidationError::new(
            "backend.preferred",
            "injected backend preferred but no injected_rpc_url is set",
        )),
        Some(BackendKind::Remote) if !config.remote.enabled => errors.push(ValidationError::new(
            "backend.preferred",
            "remote backend preferred but remote is disabled",
        )),
        _ => {}
    }

    if config.tracker.poll_interval_ms == 0 {
        errors.push(ValidationError::new("tracker.poll_interval_ms", "must be greater than 0"));
    }

    if config.reconnect.base_delay_ms == 0 {
        errors.push(ValidationError::new("reconnect.base_delay_ms", "must be greater than 0"));
    }
    if config.reconnect.max_delay_ms < config.reconnect.base_delay_ms {
        errors.push(ValidationError::new(
            "reconnect.max_delay_ms",
            "must not be smaller than reconnect.base_delay_ms",
        ));
    }

    if config.session.store_path.as_deref().is_some_and(str::is_empty) {
        errors.push(ValidationError::new("session.store_path", "must not be empty"));
    }

    check_addr(&mut errors, "ui.bind_address", &config.ui.bind_address);
    if config.ui.notification_capacity == 0 {
        errors.push(ValidationError::new("ui.notification_capacity", "must be greater than 0"));
    }

    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&SentryConfig::default()).is_ok());
    }

    #[test]
    fn test_no_backend() {
        let mut config = SentryConfig::default();
        config.remote.enabled = false;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::new("backend", "no wallet backend is configured")]);
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = SentryConfig::default();
        config.backend.injected_rpc_url = Some("not a url".into());
        config.reconnect.max_delay_ms = 1;
        config.remote.bridge_url = "ftp://bridge".into();
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["backend.injected_rpc_url", "remote.bridge_url", "reconnect.max_delay_ms"]
        );
    }

    #[test]
    fn test_preferred_backend_must_exist() {
        let mut config = SentryConfig::default();
        config.backend.preferred = Some(BackendKind::Injected);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "backend.preferred");
    }
}
