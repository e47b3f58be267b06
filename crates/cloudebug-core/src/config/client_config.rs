use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::defaults;
use crate::error::{ClientError, Result};

/// Client configuration
///
/// Provides centralized configuration management with:
/// - Serde support for loading from JSON files
/// - Builder pattern for customization
/// - Sensible defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Session (connection) settings
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Address used when none is given
    pub default_address: String,

    /// Bound on the WebSocket handshake (milliseconds)
    pub handshake_timeout_ms: u64,

    /// How long a reconnect waits for the previous connection to close (milliseconds)
    pub close_timeout_ms: u64,

    /// Capacity of the session and tree broadcast channels
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_address: defaults::DEFAULT_ADDRESS.to_string(),
            handshake_timeout_ms: defaults::DEFAULT_HANDSHAKE_TIMEOUT_MS,
            close_timeout_ms: defaults::DEFAULT_CLOSE_TIMEOUT_MS,
            event_capacity: defaults::DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Resolve a user-entered address; blank input means the default address
    pub fn resolve_address<'a>(&'a self, entered: Option<&'a str>) -> &'a str {
        match entered.map(str::trim) {
            Some(address) if !address.is_empty() => address,
            _ => &self.default_address,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))
    }

    /// Builder method for the handshake timeout
    pub fn with_handshake_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.session.handshake_timeout_ms = timeout_ms;
        self
    }
}
