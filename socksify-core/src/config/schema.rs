//! Configuration schema types

use crate::log::{LogLevel, DEFAULT_LOG_EVENT_INTERVAL, DEFAULT_LOG_LIMIT};
use crate::registry::{Credentials, SupportedProtocols};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Never proxy private, multicast and link-local destinations
    #[serde(default)]
    pub bypass_lan: bool,
    /// Processes whose traffic always goes direct
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Event log settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default = "default_log_limit")]
    pub limit: usize,
    #[serde(default = "default_event_interval_ms")]
    pub event_interval_ms: u64,
    /// Append-only JSON Lines copy of the event log
    #[serde(default)]
    pub mirror: Option<PathBuf>,
}

fn default_log_limit() -> usize {
    DEFAULT_LOG_LIMIT
}

fn default_event_interval_ms() -> u64 {
    DEFAULT_LOG_EVENT_INTERVAL.as_millis() as u64
}

impl LoggingConfig {
    pub fn event_interval(&self) -> Duration {
        Duration::from_millis(self.event_interval_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            limit: default_log_limit(),
            event_interval_ms: default_event_interval_ms(),
            mirror: None,
        }
    }
}

/// An upstream SOCKS5 proxy and the processes routed through it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// `ip:port` of the SOCKS5 server
    pub endpoint: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub protocols: SupportedProtocols,
    /// Start the relay whenever the gateway starts
    #[serde(default = "default_true")]
    pub start: bool,
    #[serde(default)]
    pub processes: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl ProxyConfig {
    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::from_parts(self.username.as_deref(), self.password.as_deref())
    }
}

/// Destination restrictions for one process
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    pub process: String,
    /// Only these destinations are proxied when non-empty
    #[serde(default)]
    pub include_cidrs: Vec<String>,
    /// These destinations are never proxied
    #[serde(default)]
    pub exclude_cidrs: Vec<String>,
}
