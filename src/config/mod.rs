//! Configuration loading and management
//!
//! ```yaml
//! server:
//!   bind_addr: "0.0.0.0:8080"
//!   path: "/ws"
//!   outbound_capacity: 256
//! broker:
//!   dispatch_interval_ms: 3000
//!   initial_delay_ms: 5000
//!   send_workers: 4
//!   send_backlog: 1024
//! auth:
//!   tokens:
//!     - token: "dev-token"
//!       login: "jane"
//!       authority: "example.org"
//! ```
//!
//! Every field has a default, so `{}` is a valid configuration.

use crate::core::NotifyError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete configuration for the notification server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub auth: AuthConfig,
}

/// HTTP / WebSocket listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind, e.g. "127.0.0.1:8080"
    pub bind_addr: String,

    /// Route serving the WebSocket upgrade
    pub path: String,

    /// Messages queued per connection before new ones are dropped
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            path: "/ws".to_string(),
            outbound_capacity: 256,
        }
    }
}

/// Message broker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Period of the dispatch cycle
    pub dispatch_interval_ms: u64,

    /// Delay before the first dispatch cycle
    pub initial_delay_ms: u64,

    /// Number of send workers; defaults to the available parallelism
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_workers: Option<usize>,

    /// Capacity of the send backlog; sends beyond it are dropped
    pub send_backlog: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: 3000,
            initial_delay_ms: 5000,
            send_workers: None,
            send_backlog: 1024,
        }
    }
}

impl BrokerConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Effective worker count
    pub fn workers(&self) -> usize {
        self.send_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Static token table for the built-in authenticator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<TokenEntry>,
}

/// One accepted token and the identity it resolves to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub login: String,
    pub authority: String,
}

impl NotifyConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the broker cannot run with
    pub fn validate(&self) -> Result<(), NotifyError> {
        if self.broker.dispatch_interval_ms == 0 {
            return Err(NotifyError::Config(
                "broker.dispatch_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.broker.send_backlog == 0 {
            return Err(NotifyError::Config(
                "broker.send_backlog must be greater than zero".to_string(),
            ));
        }
        if self.broker.send_workers == Some(0) {
            return Err(NotifyError::Config(
                "broker.send_workers must be greater than zero".to_string(),
            ));
        }
        if self.server.outbound_capacity == 0 {
            return Err(NotifyError::Config(
                "server.outbound_capacity must be greater than zero".to_string(),
            ));
        }
        if !self.server.path.starts_with('/') {
            return Err(NotifyError::Config(format!(
                "server.path must start with '/', got '{}'",
                self.server.path
            )));
        }
        if matches!(self.server.path.as_str(), "/health" | "/healthz")
            || self.server.path.starts_with("/annotations/")
        {
            return Err(NotifyError::Config(format!(
                "server.path '{}' collides with a REST route",
                self.server.path
            )));
        }
        if let Some(entry) = self.auth.tokens.iter().find(|t| t.token.is_empty()) {
            return Err(NotifyError::Config(format!(
                "auth token for '{}' must not be empty",
                entry.login
            )));
        }
        Ok(())
    }
}
