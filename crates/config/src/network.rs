//! Configuration for the worker's remote endpoints.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordinator HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Base url of the coordinator.
    pub url: String,
    /// Timeout applied to every request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { url: "http://localhost:13000".to_string(), request_timeout: Duration::from_secs(10) }
    }
}

/// Push notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Websocket url of the coordinator's STOMP endpoint.
    pub url: String,
    /// Heartbeat advertised in the CONNECT frame.
    #[serde(with = "humantime_serde")]
    pub heartbeat: Duration,
    /// Give up connecting at startup after this long.
    #[serde(with = "humantime_serde")]
    pub max_connect_time: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:13000/connect".to_string(),
            heartbeat: Duration::from_secs(10),
            max_connect_time: Duration::from_secs(60),
        }
    }
}

/// Secrets and session service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self { url: "http://localhost:15000".to_string(), request_timeout: Duration::from_secs(10) }
    }
}
