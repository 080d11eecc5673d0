// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.
//!
//! Configuration is read from TOML. Only the two endpoint URLs are required;
//! every tuning knob has a default:
//!
//! ```toml
//! api_url = "https://api.example.com"
//! websocket_url = "wss://websockets.example.com"
//!
//! [online]
//! ping_frequency_ms = 100000
//!
//! [sync]
//! max_retries = 20
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Root of the REST API (`http://` or `https://`).
    pub api_url: String,
    /// Socket endpoint (`ws://` or `wss://`).
    pub websocket_url: String,
    #[serde(default)]
    pub online: OnlineConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub requests: RequestConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Connectivity polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineConfig {
    /// Poll interval while online.
    #[serde(default = "default_online_ping_frequency_ms")]
    pub ping_frequency_ms: u64,
    /// Cap on the backoff between checks while offline.
    #[serde(default = "default_max_offline_wait_secs")]
    pub max_offline_wait_secs: u64,
    /// Offline periods longer than this ask consumers to discard cached state.
    #[serde(default = "default_reset_after_offline_hours")]
    pub reset_after_offline_hours: u64,
    /// URL probed by connectivity checks; defaults to `{api_url}/ping`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_url: Option<String>,
}

/// Socket connection management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Interval between `Counter.read` liveness pings.
    #[serde(default = "default_socket_ping_frequency_ms")]
    pub ping_frequency_ms: u64,
    #[serde(default = "default_max_reconnect_wait_secs")]
    pub max_reconnect_wait_secs: u64,
    /// Delay before retrying a failed replay.
    #[serde(default = "default_replay_retry_delay_ms")]
    pub replay_retry_delay_ms: u64,
}

/// Socket request bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Age after which an unanswered request is considered stale.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Per-request timeout for REST calls; an expiry reads as a 408.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

/// Outbound mutation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Reconnects seen while offline before a request is treated as blocked.
    #[serde(default = "default_cors_reconnect_threshold")]
    pub cors_reconnect_threshold: u32,
    /// Cap on the backoff after 502/503/504 responses.
    #[serde(default = "default_max_unavailable_wait_secs")]
    pub max_unavailable_wait_secs: u64,
    /// Delay before refiring the queue head after a reconnect.
    #[serde(default = "default_refire_delay_ms")]
    pub refire_delay_ms: u64,
}

fn default_online_ping_frequency_ms() -> u64 {
    100_000
}

fn default_max_offline_wait_secs() -> u64 {
    60
}

fn default_reset_after_offline_hours() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_socket_ping_frequency_ms() -> u64 {
    30_000
}

fn default_max_reconnect_wait_secs() -> u64 {
    30
}

fn default_replay_retry_delay_ms() -> u64 {
    1_000
}

fn default_request_timeout_secs() -> u64 {
    3_600
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    20
}

fn default_cors_reconnect_threshold() -> u32 {
    3
}

fn default_max_unavailable_wait_secs() -> u64 {
    900
}

fn default_refire_delay_ms() -> u64 {
    100
}

impl Default for OnlineConfig {
    fn default() -> Self {
        OnlineConfig {
            ping_frequency_ms: default_online_ping_frequency_ms(),
            max_offline_wait_secs: default_max_offline_wait_secs(),
            reset_after_offline_hours: default_reset_after_offline_hours(),
            test_url: None,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            connect_timeout_ms: default_connect_timeout_ms(),
            ping_frequency_ms: default_socket_ping_frequency_ms(),
            max_reconnect_wait_secs: default_max_reconnect_wait_secs(),
            replay_retry_delay_ms: default_replay_retry_delay_ms(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig {
            timeout_secs: default_request_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_retries: default_max_retries(),
            cors_reconnect_threshold: default_cors_reconnect_threshold(),
            max_unavailable_wait_secs: default_max_unavailable_wait_secs(),
            refire_delay_ms: default_refire_delay_ms(),
        }
    }
}

impl OnlineConfig {
    pub fn ping_frequency(&self) -> Duration {
        Duration::from_millis(self.ping_frequency_ms)
    }

    pub fn reset_after(&self) -> Duration {
        Duration::from_secs(self.reset_after_offline_hours.saturating_mul(3_600))
    }
}

impl SocketConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ping_frequency(&self) -> Duration {
        Duration::from_millis(self.ping_frequency_ms)
    }

    pub fn replay_retry_delay(&self) -> Duration {
        Duration::from_millis(self.replay_retry_delay_ms)
    }
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl SyncConfig {
    pub fn refire_delay(&self) -> Duration {
        Duration::from_millis(self.refire_delay_ms)
    }
}

impl ClientConfig {
    /// Creates a config with default tuning for the given endpoints.
    pub fn new(api_url: impl Into<String>, websocket_url: impl Into<String>) -> Self {
        ClientConfig {
            api_url: api_url.into(),
            websocket_url: websocket_url.into(),
            online: OnlineConfig::default(),
            socket: SocketConfig::default(),
            requests: RequestConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks endpoint URL schemes.
    pub fn validate(&self) -> Result<()> {
        check_scheme("api_url", &self.api_url, &["http", "https"])?;
        check_scheme("websocket_url", &self.websocket_url, &["ws", "wss"])?;
        if let Some(test_url) = &self.online.test_url {
            check_scheme("online.test_url", test_url, &["http", "https"])?;
        }
        Ok(())
    }

    /// URL probed by connectivity checks.
    pub fn test_url(&self) -> String {
        match &self.online.test_url {
            Some(url) => url.clone(),
            None => format!("{}/ping", self.api_url.trim_end_matches('/')),
        }
    }

    /// Resolves a request path against the API root; absolute URLs pass through.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.api_url.trim_end_matches('/'), url)
        } else {
            url.to_string()
        }
    }
}

fn check_scheme(field: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| Error::Config(format!("invalid {} '{}': {}", field, value, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(Error::Config(format!(
            "invalid {} '{}': scheme must be one of {}",
            field,
            value,
            schemes.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
