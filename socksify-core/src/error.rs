//! Error types for gateway operations

use crate::registry::ProxyHandle;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid proxy endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },

    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Unknown proxy: {handle}")]
    UnknownProxy { handle: ProxyHandle },

    #[error("CIDR {cidr} not found for process {process}")]
    NotFound { process: String, cidr: String },

    #[error("Failed to start proxy {handle}: {reason}")]
    ProxyStartFailed { handle: ProxyHandle, reason: String },

    #[error("Gateway is already running")]
    AlreadyRunning,

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid proxy endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },

    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Process {process} is associated with more than one proxy")]
    ConflictingAssociation { process: String },

    #[error("Log limit must be at least 1")]
    InvalidLogLimit,
}

/// Failures of the persistent log mirror. These never leave the mirror.
#[derive(Debug, Error)]
pub(crate) enum PersistSinkError {
    #[error("log mirror write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("log mirror serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
