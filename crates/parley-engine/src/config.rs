//! Configuration types for parley engine.
//!
//! This module defines the client configuration: where the backend lives,
//! how often open conversations are refreshed, and how the inbox ranks
//! threads.

use crate::inbox::PreviewPolicy;
use crate::message::Channel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding [`ClientConfig::api_base_url`].
pub const API_URL_ENV: &str = "PARLEY_API_URL";

/// Main configuration for the parley client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the marketplace REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Refresh interval for direct conversations, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Refresh interval for support tickets, in seconds.
    #[serde(default = "default_ticket_poll_interval_secs")]
    pub ticket_poll_interval_secs: u64,

    /// Per-request timeout. Unset means requests may hang indefinitely;
    /// the poller keeps ticking regardless.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// How inbox previews are ranked.
    #[serde(default)]
    pub preview_policy: PreviewPolicy,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".into()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_ticket_poll_interval_secs() -> u64 {
    3
}

impl ClientConfig {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        std::fs::write(path, content).map_err(ConfigError::Io)
    }

    /// Apply environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
        self
    }

    /// Refresh interval for a channel. Zero is treated as one second.
    pub fn poll_interval(&self, channel: Channel) -> Duration {
        let secs = match channel {
            Channel::Direct => self.poll_interval_secs,
            Channel::Ticket => self.ticket_poll_interval_secs,
        };
        Duration::from_secs(secs.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            poll_interval_secs: default_poll_interval_secs(),
            ticket_poll_interval_secs: default_ticket_poll_interval_secs(),
            request_timeout_secs: None,
            preview_policy: PreviewPolicy::default(),
        }
    }
}

/// Errors that can occur when working with configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading or writing config.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing config JSON.
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),

    /// Error serializing config to JSON.
    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
}
